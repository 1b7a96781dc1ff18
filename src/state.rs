//! The worker's single long-lived object, built once in `main` and passed
//! explicitly into RPC handlers.

use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::device::ProbedDevice;
use crate::lifecycle::LifecycleController;
use crate::memory::MemoryGovernor;
use crate::model_manager::ModelManager;
use crate::progress::ProgressEmitter;
use crate::registry::ModelRegistry;
use crate::scheduler::Scheduler;
use crate::stdout_writer::StdoutWriter;

pub struct AppState {
    pub config: WorkerConfig,
    pub lifecycle: Arc<LifecycleController>,
    pub scheduler: Arc<Scheduler>,
    pub model_manager: Arc<ModelManager>,
    pub registry: ModelRegistry,
    pub memory_governor: Arc<MemoryGovernor>,
    pub progress: Arc<ProgressEmitter>,
    pub stdout: Arc<StdoutWriter>,
    pub device: ProbedDevice,
}
