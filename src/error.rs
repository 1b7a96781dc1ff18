//! Crate-wide error types.
//!
//! A flat enum of the failure modes internal components can produce,
//! converted to a structured JSON-RPC error or response field at the
//! dispatcher boundary rather than propagated as a panic or bare
//! `Box<dyn Error>`.

use thiserror::Error;

/// Errors produced by the lifecycle controller, scheduler, and memory governor.
#[derive(Debug, Error, Clone)]
pub enum WorkerError {
    #[error("model not ready: {0}")]
    NotReady(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("failed to enqueue request: {0}")]
    SendError(String),

    #[error("failed to receive response: {0}")]
    RecvError(String),

    #[error("model error: {0}")]
    ModelError(String),

    #[error("worker shutting down: {0}")]
    ShuttingDown(String),

    #[error("invalid model id: {0}")]
    InvalidModel(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("encode failure: {0}")]
    EncodeFailure(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self {
        WorkerError::Io(e.to_string())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
