//! Owns the resident `TextEncoder`/`KeyphraseExtractor` pair and drives the
//! lifecycle controller through load/unload/swap.
//!
//! Both the load path and the encode path take the same
//! `Mutex<Box<dyn TextEncoder>>`, rather than handing the encoder off
//! between a dedicated loader thread and the scheduler worker thread: the
//! lifecycle controller already serializes *when* loads, unloads, and
//! admissions may happen (a load only starts from `IDLE`, an admission only
//! from `READY`), so the mutex is never actually contended; it exists for
//! `Send`/`Sync` bookkeeping, not as the real exclusion mechanism.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::capability::{KeyphraseExtractor, TextEncoder};
use crate::device::ProbedDevice;
use crate::error::WorkerResult;
use crate::lifecycle::{LifecycleController, WorkerState};
use crate::progress::ProgressEmitter;
use crate::scheduler::Scheduler;

pub struct ModelManager {
    encoder: Arc<Mutex<Box<dyn TextEncoder>>>,
    keyphrase: Box<dyn KeyphraseExtractor>,
    lifecycle: Arc<LifecycleController>,
    progress: Arc<ProgressEmitter>,
    device: ProbedDevice,
}

impl ModelManager {
    pub fn new(
        encoder: Box<dyn TextEncoder>,
        keyphrase: Box<dyn KeyphraseExtractor>,
        lifecycle: Arc<LifecycleController>,
        progress: Arc<ProgressEmitter>,
        device: ProbedDevice,
    ) -> Arc<Self> {
        Arc::new(Self {
            encoder: Arc::new(Mutex::new(encoder)),
            keyphrase,
            lifecycle,
            progress,
            device,
        })
    }

    pub fn encoder_handle(&self) -> Arc<Mutex<Box<dyn TextEncoder>>> {
        Arc::clone(&self.encoder)
    }

    pub fn keyphrase_extractor(&self) -> &dyn KeyphraseExtractor {
        self.keyphrase.as_ref()
    }

    /// Spawn the transient model-loader thread. Fire-and-forget;
    /// the caller observes completion through lifecycle state / progress
    /// notifications, not a return value.
    pub fn spawn_load(self: &Arc<Self>, model_id: String) {
        let this = Arc::clone(self);
        std::thread::spawn(move || this.load_blocking(&model_id));
    }

    fn load_blocking(&self, model_id: &str) {
        if let Err(e) = self.lifecycle.begin_load(model_id) {
            log::warn!("load_model('{model_id}') rejected: {e}");
            return;
        }
        self.progress.model_load_start(model_id);

        let result = {
            let mut encoder = self.encoder.lock();
            encoder.load(model_id, &self.device)
        };

        match result {
            Ok(()) => {
                self.lifecycle.report_load_progress(100);
                self.progress.model_load_complete(model_id);
                self.lifecycle.complete_load(Ok(()));
            }
            Err(e) => {
                log::error!("load_model('{model_id}') failed: {e}");
                self.lifecycle.complete_load(Err(e.to_string()));
            }
        }
    }

    /// `load_model(new)` when a model is already loaded: unload-then-load
    /// within one call. Queued batch work is
    /// aborted with a lifecycle error before the unload begins.
    pub fn swap_or_load(self: &Arc<Self>, model_id: String, scheduler: &Scheduler) {
        if self.lifecycle.state() != WorkerState::Idle {
            scheduler.abort_queued_batch();
            let _ = self.unload();
        }
        self.spawn_load(model_id);
    }

    pub fn unload(&self) -> WorkerResult<()> {
        let model_id = self.lifecycle.snapshot().model_id.clone().unwrap_or_default();
        self.lifecycle.begin_unload()?;
        self.progress.unload_start(&model_id);
        self.encoder.lock().unload();
        self.lifecycle.complete_unload();
        self.progress.unload_complete();
        Ok(())
    }
}
