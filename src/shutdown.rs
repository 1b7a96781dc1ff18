//! Shutdown convergence.
//!
//! SIGINT/SIGTERM, EOF on stdin, and the `shutdown` RPC method are three
//! different triggers for the same sequence: stop admitting new scheduler
//! work, best-effort unload within the configured grace period, then exit.
//! A scheduler still draining batch work when the grace period elapses is
//! tolerated rather than awaited; the process exits regardless.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model_manager::ModelManager;
use crate::scheduler::Scheduler;

/// Install a SIGINT/SIGTERM handler that runs [`shutdown_now`] and exits.
/// Called once from `main` before the dispatcher loop starts.
pub fn install(scheduler: Arc<Scheduler>, model_manager: Arc<ModelManager>, grace_period: Duration) {
    ctrlc::set_handler(move || {
        log::info!("received termination signal; shutting down");
        shutdown_now(&scheduler, &model_manager, grace_period);
        std::process::exit(0);
    })
    .expect("failed to install signal handler");
}

/// Stop admitting new work, wait up to `grace_period` for the scheduler's
/// queue to drain, then unload whatever is resident regardless of whether
/// the queue actually emptied in time.
pub fn shutdown_now(scheduler: &Scheduler, model_manager: &ModelManager, grace_period: Duration) {
    scheduler.request_shutdown();

    let deadline = Instant::now() + grace_period;
    while scheduler.queue_len() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    if let Err(e) = model_manager.unload() {
        log::warn!("best-effort unload during shutdown failed: {e}");
    }
}
