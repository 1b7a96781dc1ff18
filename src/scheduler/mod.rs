//! Priority scheduler: a min-heap keyed by `(priority, arrival)` plus the
//! crawling-pause rule.
//!
//! A single priority heap behind a `parking_lot::Mutex`+`Condvar`, rather
//! than two independently-fair channels, since the ordering requirement here
//! (immediate before batch, FIFO within a class, plus a pause window) can't
//! be expressed as two independently-fair queues selected between.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use std::collections::BinaryHeap;

use crate::domain::{EmbeddingRequest, EmbeddingResponse, KeyphraseRequest, KeyphraseResponse, Priority, QueuedRequest};
use crate::error::WorkerError;
use crate::lifecycle::LifecycleController;

/// A unit of work the scheduler's worker thread will eventually hand to the
/// encoder. Each variant carries its own single-assignment reply channel
///.
pub enum SchedulerJob {
    Embed {
        request: EmbeddingRequest,
        reply: Sender<EmbeddingResponse>,
    },
    Keyphrase {
        request: KeyphraseRequest,
        reply: Sender<KeyphraseResponse>,
    },
}

impl SchedulerJob {
    fn fail_not_ready(self, err: &WorkerError) {
        match self {
            SchedulerJob::Embed { request, reply } => {
                let _ = reply.send(EmbeddingResponse::failure(request.request_id, err.to_string()));
            }
            SchedulerJob::Keyphrase { reply, .. } => {
                let _ = reply.send(KeyphraseResponse::failure(err.to_string()));
            }
        }
    }
}

/// Two-class priority queue with the crawling-pause rule. A single worker
/// thread calls [`Scheduler::run`]; all other threads only ever call
/// [`Scheduler::enqueue`] or [`Scheduler::request_shutdown`].
pub struct Scheduler {
    heap: Mutex<BinaryHeap<QueuedRequest<SchedulerJob>>>,
    cond: Condvar,
    shutdown: AtomicBool,
    last_immediate: Mutex<Option<Instant>>,
    pause_window: Duration,
    lifecycle: Arc<LifecycleController>,
}

impl Scheduler {
    pub fn new(lifecycle: Arc<LifecycleController>, pause_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            last_immediate: Mutex::new(None),
            pause_window,
            lifecycle,
        })
    }

    pub fn enqueue(&self, priority: Priority, job: SchedulerJob) {
        let mut heap = self.heap.lock();
        if priority == Priority::Immediate {
            *self.last_immediate.lock() = Some(Instant::now());
        }
        heap.push(QueuedRequest::new(priority, job));
        self.lifecycle.set_queue_len(heap.len());
        self.cond.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    /// True while a recent immediate arrival still holds the pause window
    /// open.
    fn crawling_paused(&self) -> bool {
        match *self.last_immediate.lock() {
            Some(t) => t.elapsed() < self.pause_window,
            None => false,
        }
    }

    /// Drain queued batch requests once the lifecycle controller has begun
    /// a model swap/unload. They cannot run against a model that is about
    /// to disappear.
    pub fn abort_queued_batch(&self) {
        let mut heap = self.heap.lock();
        let mut kept = BinaryHeap::new();
        while let Some(queued) = heap.pop() {
            if queued.priority == Priority::Batch {
                queued
                    .request
                    .fail_not_ready(&WorkerError::ShuttingDown("model swap in progress".into()));
            } else {
                kept.push(queued);
            }
        }
        *heap = kept;
        self.lifecycle.set_queue_len(heap.len());
    }

    /// Worker loop: run on a single dedicated thread for the lifetime of the
    /// process. `process` performs the actual encode and is responsible for
    /// sending the reply on the job's own channel; it must never panic.
    pub fn run(self: &Arc<Self>, mut process: impl FnMut(SchedulerJob)) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let queued = {
                let mut heap = self.heap.lock();
                loop {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    match heap.peek() {
                        Some(top) if top.priority == Priority::Batch && self.crawling_paused() => {
                            self.cond.wait_for(&mut heap, Duration::from_millis(50));
                        }
                        Some(_) => break,
                        None => {
                            self.cond.wait_for(&mut heap, Duration::from_millis(200));
                        }
                    }
                }
                let popped = heap.pop();
                self.lifecycle.set_queue_len(heap.len());
                popped
            };

            let Some(queued) = queued else { continue };
            let immediate = queued.priority == Priority::Immediate;

            if let Err(e) = self.lifecycle.try_admit(immediate) {
                queued.request.fail_not_ready(&e);
                continue;
            }

            process(queued.request);

            let queue_empty = self.heap.lock().is_empty();
            self.lifecycle.complete_admission(queue_empty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread::sleep;

    fn make_scheduler(pause: Duration) -> Arc<Scheduler> {
        let (lifecycle, _rx) = LifecycleController::new(Duration::from_secs(3600));
        lifecycle.begin_load("test-model").unwrap();
        lifecycle.complete_load(Ok(()));
        Scheduler::new(lifecycle, pause)
    }

    #[test]
    fn immediate_runs_before_batch_enqueued_first() {
        let scheduler = make_scheduler(Duration::from_millis(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (b_tx, _b_rx) = unbounded();
        let (i_tx, _i_rx) = unbounded();
        scheduler.enqueue(
            Priority::Batch,
            SchedulerJob::Embed {
                request: EmbeddingRequest {
                    texts: vec!["batch".into()],
                    immediate: false,
                    model_name: None,
                    request_id: Some("b1".into()),
                },
                reply: b_tx,
            },
        );
        scheduler.enqueue(
            Priority::Immediate,
            SchedulerJob::Embed {
                request: EmbeddingRequest {
                    texts: vec!["immediate".into()],
                    immediate: true,
                    model_name: None,
                    request_id: Some("i1".into()),
                },
                reply: i_tx,
            },
        );

        let order_clone = Arc::clone(&order);
        let scheduler_clone = Arc::clone(&scheduler);
        let handle = std::thread::spawn(move || {
            let mut count = 0;
            scheduler_clone.run(|job| {
                if let SchedulerJob::Embed { request, .. } = job {
                    order_clone.lock().push(request.request_id.unwrap());
                }
                count += 1;
                if count >= 2 {
                    scheduler_clone.request_shutdown();
                }
            });
        });
        sleep(Duration::from_millis(100));
        scheduler.request_shutdown();
        handle.join().unwrap();

        assert_eq!(order.lock()[0], "i1");
    }

    #[test]
    fn crawling_pause_delays_batch_dispatch_after_immediate_arrival() {
        let pause = Duration::from_millis(300);
        let scheduler = make_scheduler(pause);

        let (b_tx, _b_rx) = unbounded();
        let (i_tx, _i_rx) = unbounded();
        scheduler.enqueue(
            Priority::Batch,
            SchedulerJob::Embed {
                request: EmbeddingRequest {
                    texts: vec!["batch".into()],
                    immediate: false,
                    model_name: None,
                    request_id: Some("b1".into()),
                },
                reply: b_tx,
            },
        );
        scheduler.enqueue(
            Priority::Immediate,
            SchedulerJob::Embed {
                request: EmbeddingRequest {
                    texts: vec!["immediate".into()],
                    immediate: true,
                    model_name: None,
                    request_id: Some("i1".into()),
                },
                reply: i_tx,
            },
        );

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let dispatched_clone = Arc::clone(&dispatched);
        let scheduler_clone = Arc::clone(&scheduler);
        let handle = std::thread::spawn(move || {
            let mut count = 0;
            scheduler_clone.run(|job| {
                if let SchedulerJob::Embed { request, .. } = job {
                    dispatched_clone.lock().push((request.request_id.unwrap(), Instant::now()));
                }
                count += 1;
                if count >= 2 {
                    scheduler_clone.request_shutdown();
                }
            });
        });
        handle.join().unwrap();

        let dispatched = dispatched.lock();
        assert_eq!(dispatched[0].0, "i1");
        assert_eq!(dispatched[1].0, "b1");
        let gap = dispatched[1].1.duration_since(dispatched[0].1);
        assert!(gap >= pause, "batch dispatched after only {gap:?}, before the {pause:?} pause window elapsed");
    }
}
