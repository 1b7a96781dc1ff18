//! Lifecycle controller: the worker's top-level state machine, serialized
//! under a single mutex.
//!
//! A `parking_lot::Mutex`-guarded struct with a transition-validity table,
//! rather than a lock-free atomic state machine: this worker carries more
//! per-transition payload (model id, progress, last error) than a bare
//! atomic tag can hold, and single-mutex serialization of transitions is
//! simpler to reason about than lock-free CAS here.

pub mod state;

pub use state::WorkerState;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{info, warn};
use parking_lot::Mutex;

use crate::error::{WorkerError, WorkerResult};

/// Point-in-time view of the lifecycle controller, used to answer
/// `get_status` and `health_check`.
#[derive(Debug, Clone)]
pub struct LifecycleSnapshot {
    pub state: WorkerState,
    pub model_id: Option<String>,
    pub progress: u8,
    pub last_error: Option<String>,
    pub uptime: Duration,
    pub queue_size: usize,
    pub total_requests: u64,
    pub immediate_requests: u64,
    pub batch_requests: u64,
}

struct Inner {
    state: WorkerState,
    model_id: Option<String>,
    progress: u8,
    last_error: Option<String>,
    queue_len: usize,
    in_flight: u32,
    /// Bumped on every state transition; an idle-timer fire compares against
    /// the generation it was armed with so a stale timer harmlessly no-ops.
    generation: u64,
}

/// Serializes `IDLE → LOADING → READY → WORKING → UNLOADING → IDLE`.
pub struct LifecycleController {
    inner: Mutex<Inner>,
    start_time: Instant,
    idle_timeout: Duration,
    total_requests: AtomicU64,
    immediate_requests: AtomicU64,
    batch_requests: AtomicU64,
    /// Fired when the idle-unload timer decides eviction should actually
    /// happen; the receiving end (wired in `main`) owns the `TextEncoder`
    /// and performs the real release, then calls `complete_unload`.
    idle_unload_tx: Sender<()>,
}

impl LifecycleController {
    pub fn new(idle_timeout: Duration) -> (Arc<Self>, Receiver<()>) {
        let (tx, rx) = unbounded();
        let controller = Arc::new(Self {
            inner: Mutex::new(Inner {
                state: WorkerState::Idle,
                model_id: None,
                progress: 0,
                last_error: None,
                queue_len: 0,
                in_flight: 0,
                generation: 0,
            }),
            start_time: Instant::now(),
            idle_timeout,
            total_requests: AtomicU64::new(0),
            immediate_requests: AtomicU64::new(0),
            batch_requests: AtomicU64::new(0),
            idle_unload_tx: tx,
        });
        (controller, rx)
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let inner = self.inner.lock();
        LifecycleSnapshot {
            state: inner.state,
            model_id: inner.model_id.clone(),
            progress: inner.progress,
            last_error: inner.last_error.clone(),
            uptime: self.start_time.elapsed(),
            queue_size: inner.queue_len,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            immediate_requests: self.immediate_requests.load(Ordering::Relaxed),
            batch_requests: self.batch_requests.load(Ordering::Relaxed),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// Keep the controller's idle-check accurate; the scheduler calls this
    /// whenever its queue length changes.
    pub fn set_queue_len(&self, len: usize) {
        self.inner.lock().queue_len = len;
    }

    /// `IDLE → LOADING`. Rejects if a model is already loading/loaded (the
    /// caller, the RPC handler, must route through `begin_unload` first for a
    /// swap).
    pub fn begin_load(&self, model_id: &str) -> WorkerResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(WorkerState::Loading) {
            return Err(WorkerError::Lifecycle(format!(
                "cannot begin load from state {:?}",
                inner.state
            )));
        }
        inner.state = WorkerState::Loading;
        inner.model_id = Some(model_id.to_string());
        inner.progress = 0;
        inner.last_error = None;
        inner.generation += 1;
        info!("lifecycle: IDLE -> LOADING ({model_id})");
        Ok(())
    }

    pub fn report_load_progress(&self, percent: u8) {
        let mut inner = self.inner.lock();
        if inner.state == WorkerState::Loading {
            inner.progress = percent.min(100);
        }
    }

    /// `LOADING → READY` on success, `LOADING → ERROR` on failure.
    pub fn complete_load(self: &Arc<Self>, result: Result<(), String>) {
        let mut inner = self.inner.lock();
        match result {
            Ok(()) => {
                inner.state = WorkerState::Ready;
                inner.progress = 100;
                inner.generation += 1;
                info!("lifecycle: LOADING -> READY");
                drop(inner);
                self.arm_idle_timer();
            }
            Err(cause) => {
                inner.state = WorkerState::Error;
                inner.last_error = Some(cause.clone());
                inner.generation += 1;
                warn!("lifecycle: LOADING -> ERROR ({cause})");
            }
        }
    }

    /// `READY → WORKING`. Returns a guard the caller must hand back to
    /// [`Self::complete_admission`] exactly once. Fails with `NotReady` if
    /// the worker is not presently `READY`.
    pub fn try_admit(&self, immediate: bool) -> WorkerResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != WorkerState::Ready {
            return Err(WorkerError::NotReady(format!(
                "state is {:?}, not READY",
                inner.state
            )));
        }
        inner.state = WorkerState::Working;
        inner.in_flight += 1;
        inner.generation += 1;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if immediate {
            self.immediate_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batch_requests.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Called once per request after encode completes (success or failure).
    /// `queue_empty` reflects the scheduler's queue *after* this request was
    /// popped. `WORKING → READY` if nothing else is in flight and the queue
    /// is empty; otherwise stays `WORKING` to keep draining.
    pub fn complete_admission(self: &Arc<Self>, queue_empty: bool) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 && queue_empty && inner.state == WorkerState::Working {
            inner.state = WorkerState::Ready;
            inner.generation += 1;
            drop(inner);
            self.arm_idle_timer();
        }
    }

    /// `READY/WORKING/ERROR → UNLOADING`. Used by both the explicit
    /// `unload_model` RPC and a firing idle timer.
    pub fn begin_unload(&self) -> WorkerResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(WorkerState::Unloading) {
            return Err(WorkerError::Lifecycle(format!(
                "cannot unload from state {:?}",
                inner.state
            )));
        }
        let prev = inner.state;
        inner.state = WorkerState::Unloading;
        inner.generation += 1;
        info!("lifecycle: {:?} -> UNLOADING", prev);
        Ok(())
    }

    /// `UNLOADING → IDLE`.
    pub fn complete_unload(&self) {
        let mut inner = self.inner.lock();
        inner.state = WorkerState::Idle;
        inner.model_id = None;
        inner.progress = 0;
        inner.generation += 1;
        info!("lifecycle: UNLOADING -> IDLE");
    }

    /// Spawn (or re-spawn) the idle-unload countdown. Only meaningful while
    /// `READY`; a stale generation at fire time means something happened in
    /// the interim and the timer simply does not act.
    fn arm_idle_timer(self: &Arc<Self>) {
        let armed_generation = {
            let inner = self.inner.lock();
            if inner.state != WorkerState::Ready || inner.queue_len != 0 {
                return;
            }
            inner.generation
        };
        let this = Arc::clone(self);
        let timeout = self.idle_timeout;
        std::thread::spawn(move || {
            std::thread::sleep(timeout);
            this.try_fire_idle_unload(armed_generation);
        });
    }

    fn try_fire_idle_unload(self: &Arc<Self>, armed_generation: u64) {
        let inner = self.inner.lock();
        if inner.generation != armed_generation {
            return; // something happened since arming; a fresh timer (if any) owns this check
        }
        if inner.state != WorkerState::Ready || inner.queue_len != 0 || inner.in_flight != 0 {
            return;
        }
        drop(inner);
        info!("lifecycle: idle timeout elapsed, signaling unload");
        let _ = self.idle_unload_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_controller_starts_idle() {
        let (controller, _rx) = LifecycleController::new(Duration::from_secs(60));
        assert_eq!(controller.state(), WorkerState::Idle);
    }

    #[test]
    fn admission_requires_ready() {
        let (controller, _rx) = LifecycleController::new(Duration::from_secs(60));
        assert!(controller.try_admit(true).is_err());
    }

    #[test]
    fn load_then_admit_then_complete_round_trip() {
        let (controller, _rx) = LifecycleController::new(Duration::from_secs(60));
        controller.begin_load("model-a").unwrap();
        controller.complete_load(Ok(()));
        assert_eq!(controller.state(), WorkerState::Ready);

        controller.try_admit(true).unwrap();
        assert_eq!(controller.state(), WorkerState::Working);

        controller.complete_admission(true);
        assert_eq!(controller.state(), WorkerState::Ready);

        let snap = controller.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.immediate_requests, 1);
    }

    #[test]
    fn failed_load_lands_in_error() {
        let (controller, _rx) = LifecycleController::new(Duration::from_secs(60));
        controller.begin_load("model-a").unwrap();
        controller.complete_load(Err("boom".to_string()));
        assert_eq!(controller.state(), WorkerState::Error);

        // error only escapes via explicit unload
        assert!(controller.try_admit(true).is_err());
        controller.begin_unload().unwrap();
        controller.complete_unload();
        assert_eq!(controller.state(), WorkerState::Idle);
    }
}
