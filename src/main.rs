//! Entry point: dependency preflight, subsystem wiring, and the two
//! long-lived threads (scheduler worker, JSON-RPC dispatcher) plus the
//! idle-unload drain thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use embedding_worker::capability::bert_encoder::CandleBertEncoder;
use embedding_worker::capability::keyphrase::KeyBertExtractor;
use embedding_worker::config::WorkerConfig;
use embedding_worker::device::{self, DeviceClass};
use embedding_worker::domain::{EmbeddingResponse, EmbeddingVector, KeyphraseResponse};
use embedding_worker::lifecycle::LifecycleController;
use embedding_worker::memory::MemoryGovernor;
use embedding_worker::model_manager::ModelManager;
use embedding_worker::progress::ProgressEmitter;
use embedding_worker::registry::ModelRegistry;
use embedding_worker::rpc;
use embedding_worker::scheduler::{Scheduler, SchedulerJob};
use embedding_worker::shutdown;
use embedding_worker::state::AppState;
use embedding_worker::stdout_writer::StdoutWriter;

/// Validate the curated-models registry is readable and, if a model id was
/// passed on the command line, that it is a known id.
fn preflight(config: &WorkerConfig, model_id: Option<&str>) -> Result<ModelRegistry, String> {
    let registry = ModelRegistry::load(&config.model_registry_path)
        .map_err(|e| format!("curated model registry unavailable: {e}"))?;
    if let Some(id) = model_id {
        if !registry.is_valid(id) {
            return Err(format!("unknown model id '{id}'"));
        }
    }
    Ok(registry)
}

fn fail_preflight(detail: &str) -> ! {
    eprintln!("DEPENDENCY_ERROR: Missing packages: {detail}");
    std::process::exit(1);
}

fn main() {
    env_logger::init();

    let model_id_arg = std::env::args().nth(1);
    let config = WorkerConfig::from_env();

    let registry = match preflight(&config, model_id_arg.as_deref()) {
        Ok(r) => r,
        Err(e) => fail_preflight(&e),
    };
    let device = match device::detect_best_device() {
        Ok(d) => d,
        Err(e) => fail_preflight(&format!("device probe failed: {e}")),
    };

    let (lifecycle, idle_unload_rx) = LifecycleController::new(config.idle_unload_timeout);
    let scheduler = Scheduler::new(Arc::clone(&lifecycle), config.crawling_pause);
    let stdout = StdoutWriter::new();
    let progress = Arc::new(ProgressEmitter::new(Arc::clone(&stdout)));
    let memory_governor = Arc::new(MemoryGovernor::new());
    let model_manager = ModelManager::new(
        Box::new(CandleBertEncoder::new()),
        Box::new(KeyBertExtractor),
        Arc::clone(&lifecycle),
        Arc::clone(&progress),
        device.clone(),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        lifecycle: Arc::clone(&lifecycle),
        scheduler: Arc::clone(&scheduler),
        model_manager: Arc::clone(&model_manager),
        registry,
        memory_governor: Arc::clone(&memory_governor),
        progress: Arc::clone(&progress),
        stdout: Arc::clone(&stdout),
        device: device.clone(),
    });

    spawn_scheduler_worker(
        Arc::clone(&scheduler),
        Arc::clone(&model_manager),
        Arc::clone(&memory_governor),
        Arc::clone(&progress),
        device.class,
    );
    spawn_idle_unload_drain(idle_unload_rx, Arc::clone(&model_manager));
    shutdown::install(Arc::clone(&scheduler), Arc::clone(&model_manager), config.shutdown_grace_period);

    if let Some(model_id) = model_id_arg {
        model_manager.spawn_load(model_id);
    }

    rpc::run(Arc::clone(&state));

    // EOF or an explicit `shutdown` RPC both fall through to here; a signal
    // converges on `shutdown::shutdown_now` from its own handler instead and
    // never returns to this point.
    shutdown::shutdown_now(&scheduler, &model_manager, config.shutdown_grace_period);
}

/// Spawn the single dedicated thread that owns admission ordering: pops one
/// job at a time off the scheduler's priority heap and drives it through the
/// memory governor (embeddings) or the keyphrase extractor.
fn spawn_scheduler_worker(
    scheduler: Arc<Scheduler>,
    model_manager: Arc<ModelManager>,
    memory_governor: Arc<MemoryGovernor>,
    progress: Arc<ProgressEmitter>,
    device_class: DeviceClass,
) {
    std::thread::spawn(move || {
        scheduler.run(|job| match job {
            SchedulerJob::Embed { request, reply } => {
                let response = run_embed(&model_manager, &memory_governor, &progress, device_class, request);
                let _ = reply.send(response);
            }
            SchedulerJob::Keyphrase { request, reply } => {
                let encoder_handle = model_manager.encoder_handle();
                let mut encoder = encoder_handle.lock();
                let outcome = model_manager.keyphrase_extractor().extract(&mut **encoder, &request);
                drop(encoder);
                let response = match outcome {
                    Ok(keyphrases) => KeyphraseResponse {
                        keyphrases,
                        success: true,
                        error: None,
                    },
                    Err(e) => KeyphraseResponse::failure(e.to_string()),
                };
                let _ = reply.send(response);
            }
        });
    });
}

fn run_embed(
    model_manager: &ModelManager,
    memory_governor: &MemoryGovernor,
    progress: &ProgressEmitter,
    device_class: DeviceClass,
    request: embedding_worker::domain::EmbeddingRequest,
) -> EmbeddingResponse {
    let start = Instant::now();
    let encoder_handle = model_manager.encoder_handle();
    let mut encoder = encoder_handle.lock();
    let model_id = encoder.current_model_id().unwrap_or("unknown").to_string();
    let embedding_dim = encoder.embedding_dim().unwrap_or(0);

    let outcome = memory_governor.encode(&mut **encoder, &request.texts, device_class, progress);
    drop(encoder);

    match outcome {
        Ok(vectors) => {
            let created_at = chrono::Utc::now().to_rfc3339();
            let embeddings = vectors
                .into_iter()
                .enumerate()
                .map(|(i, vector)| EmbeddingVector {
                    dimensions: vector.len(),
                    vector,
                    model: model_id.clone(),
                    created_at: created_at.clone(),
                    chunk_id: request
                        .request_id
                        .clone()
                        .map(|id| format!("{id}-{i}"))
                        .unwrap_or_else(|| i.to_string()),
                })
                .collect();

            let mut model_info: HashMap<String, Value> = HashMap::new();
            model_info.insert("model".to_string(), Value::String(model_id));
            model_info.insert("embedding_dim".to_string(), Value::from(embedding_dim));

            EmbeddingResponse {
                embeddings,
                success: true,
                processing_time_ms: start.elapsed().as_millis() as u64,
                model_info,
                request_id: request.request_id,
                error: None,
            }
        }
        Err(e) => EmbeddingResponse::failure(request.request_id, e.to_string()),
    }
}

/// Drain the lifecycle controller's idle-unload channel: whenever the
/// idle timer decides eviction should happen, actually release the encoder.
fn spawn_idle_unload_drain(
    idle_unload_rx: crossbeam_channel::Receiver<()>,
    model_manager: Arc<ModelManager>,
) {
    std::thread::spawn(move || {
        while idle_unload_rx.recv().is_ok() {
            if let Err(e) = model_manager.unload() {
                log::warn!("idle unload failed: {e}");
            }
        }
    });
}
