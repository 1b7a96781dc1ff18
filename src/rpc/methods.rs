//! Method handlers for the JSON-RPC dispatcher.

use std::time::Instant;

use crossbeam_channel::bounded;
use serde_json::{Value, json};
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

use crate::domain::{EmbeddingRequest, KeyphraseBatchRequest, KeyphraseBatchResponse, KeyphraseRequest, Priority};
use crate::rpc::DispatchError;
use crate::scheduler::SchedulerJob;
use crate::state::AppState;

pub fn dispatch(state: &AppState, method: &str, params: Value) -> Result<Value, DispatchError> {
    match method {
        "generate_embeddings" => generate_embeddings(state, params),
        "extract_keyphrases_keybert" => extract_keyphrases(state, params),
        "extract_keyphrases_keybert_batch" => extract_keyphrases_batch(state, params),
        "is_keybert_available" => Ok(json!({ "available": true })),
        "health_check" => health_check(state, params),
        "get_status" => get_status(state),
        "load_model" => load_model(state, params),
        "unload_model" => unload_model(state),
        "is_model_cached" => is_model_cached(params),
        "download_model" => download_model(params),
        "shutdown" => Ok(json!({ "status": "shutting_down" })),
        _ => Err(DispatchError::MethodNotFound),
    }
}

fn invalid_params(e: impl std::fmt::Display) -> DispatchError {
    DispatchError::Internal(format!("invalid params: {e}"))
}

fn generate_embeddings(state: &AppState, params: Value) -> Result<Value, DispatchError> {
    let request: EmbeddingRequest = serde_json::from_value(params).map_err(invalid_params)?;
    if request.texts.is_empty() {
        return Err(DispatchError::Internal("texts must be non-empty".to_string()));
    }
    let priority = Priority::from_immediate_flag(request.immediate);
    let (reply_tx, reply_rx) = bounded(1);
    state.scheduler.enqueue(priority, SchedulerJob::Embed { request, reply: reply_tx });

    let response = reply_rx
        .recv()
        .map_err(|e| DispatchError::Internal(format!("scheduler disconnected: {e}")))?;
    serde_json::to_value(response).map_err(|e| DispatchError::Internal(e.to_string()))
}

fn extract_keyphrases(state: &AppState, params: Value) -> Result<Value, DispatchError> {
    let request: KeyphraseRequest = serde_json::from_value(params).map_err(invalid_params)?;
    let (reply_tx, reply_rx) = bounded(1);
    // Keyphrase extraction serves interactive (search/chat) call sites in
    // practice, so it is always treated as immediate priority. There is no
    // "background keyphrase crawl" analogous to batch embedding.
    state
        .scheduler
        .enqueue(Priority::Immediate, SchedulerJob::Keyphrase { request, reply: reply_tx });

    let response = reply_rx
        .recv()
        .map_err(|e| DispatchError::Internal(format!("scheduler disconnected: {e}")))?;
    serde_json::to_value(response).map_err(|e| DispatchError::Internal(e.to_string()))
}

fn extract_keyphrases_batch(state: &AppState, params: Value) -> Result<Value, DispatchError> {
    let request: KeyphraseBatchRequest = serde_json::from_value(params).map_err(invalid_params)?;
    let start = Instant::now();
    let mut keyphrases_batch = Vec::with_capacity(request.texts.len());

    for text in &request.texts {
        let single = KeyphraseRequest {
            text: text.clone(),
            ngram_range: request.ngram_range,
            use_mmr: request.use_mmr,
            diversity: request.diversity,
            top_n: request.top_n,
            stop_words: request.stop_words.clone(),
            structured_candidates: None,
        };
        let (reply_tx, reply_rx) = bounded(1);
        state
            .scheduler
            .enqueue(Priority::Immediate, SchedulerJob::Keyphrase { request: single, reply: reply_tx });

        match reply_rx.recv() {
            Ok(resp) if resp.success => keyphrases_batch.push(resp.keyphrases),
            _ => keyphrases_batch.push(Vec::new()),
        }
    }

    let response = KeyphraseBatchResponse {
        keyphrases_batch,
        success: true,
        processing_time_ms: start.elapsed().as_millis() as u64,
    };
    serde_json::to_value(response).map_err(|e| DispatchError::Internal(e.to_string()))
}

fn current_process_memory_mb() -> u64 {
    let mut system = System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::everything()));
    let pid = Pid::from_u32(std::process::id());
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory() / 1024 / 1024).unwrap_or(0)
}

fn health_check(state: &AppState, params: Value) -> Result<Value, DispatchError> {
    let request_id = params.get("request_id").and_then(Value::as_str).map(str::to_string);
    let snapshot = state.lifecycle.snapshot();

    Ok(json!({
        "status": snapshot.state.as_status_str(),
        "state": snapshot.state.as_state_str(),
        "loading_progress": snapshot.progress,
        "current_model": snapshot.model_id,
        "model_loaded": snapshot.model_id.is_some(),
        "gpu_available": state.device.class.is_gpu(),
        "memory_usage_mb": current_process_memory_mb(),
        "uptime_seconds": snapshot.uptime.as_secs(),
        "queue_size": snapshot.queue_size,
        "request_id": request_id,
    }))
}

fn get_status(state: &AppState) -> Result<Value, DispatchError> {
    let snapshot = state.lifecycle.snapshot();
    Ok(json!({
        "state": snapshot.state.as_state_str(),
        "model": snapshot.model_id,
        "progress": snapshot.progress,
    }))
}

fn load_model(state: &AppState, params: Value) -> Result<Value, DispatchError> {
    let model_id = params
        .get("model_id")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Internal("missing model_id".to_string()))?;

    if !state.registry.is_valid(model_id) {
        return Err(DispatchError::Internal(format!("invalid model id: {model_id}")));
    }
    crate::model_cache::set_offline_if_cached(model_id);
    state.model_manager.swap_or_load(model_id.to_string(), &state.scheduler);
    Ok(json!({ "status": "loading", "model": model_id }))
}

fn unload_model(state: &AppState) -> Result<Value, DispatchError> {
    state
        .model_manager
        .unload()
        .map(|()| json!({ "status": "unloaded" }))
        .map_err(|e| DispatchError::Internal(e.to_string()))
}

fn is_model_cached(params: Value) -> Result<Value, DispatchError> {
    let model_id = params
        .get("model_id")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Internal("missing model_id".to_string()))?;
    Ok(json!({ "cached": crate::model_cache::is_model_cached(model_id) }))
}

fn download_model(params: Value) -> Result<Value, DispatchError> {
    let model_id = params
        .get("model_id")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Internal("missing model_id".to_string()))?;

    if crate::model_cache::is_model_cached(model_id) {
        return Ok(json!({ "status": "already_cached", "model": model_id }));
    }
    crate::capability::bert_encoder::prefetch_to_cache(model_id)
        .map(|()| json!({ "status": "downloaded", "model": model_id }))
        .map_err(|e| DispatchError::Internal(e.to_string()))
}
