//! Progress notification emitter.
//!
//! Emits unsolicited `{"jsonrpc":"2.0","method":"progress_update",...}`
//! lines onto the shared stdout writer at: model-load start/completion,
//! batch start/end within an encode, memory-reclaim between batches, and
//! unload start/completion.

use std::sync::Arc;

use serde_json::json;

use crate::stdout_writer::StdoutWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressType {
    ModelLoad,
    Encode,
    MemoryReclaim,
    ModelUnload,
}

impl ProgressType {
    fn as_str(self) -> &'static str {
        match self {
            ProgressType::ModelLoad => "model_load",
            ProgressType::Encode => "encode",
            ProgressType::MemoryReclaim => "memory_reclaim",
            ProgressType::ModelUnload => "model_unload",
        }
    }
}

pub struct ProgressEmitter {
    writer: Arc<StdoutWriter>,
}

impl ProgressEmitter {
    pub fn new(writer: Arc<StdoutWriter>) -> Self {
        Self { writer }
    }

    pub fn emit(&self, kind: ProgressType, status: &str, current: u64, total: u64, message: &str) {
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": "progress_update",
            "params": {
                "type": kind.as_str(),
                "status": status,
                "current": current,
                "total": total,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "details": {},
                "message": message,
            }
        });
        if let Err(e) = self.writer.write_line(&envelope) {
            log::warn!("failed to emit progress notification: {e}");
        }
    }

    pub fn model_load_start(&self, model_id: &str) {
        self.emit(ProgressType::ModelLoad, "starting", 0, 100, &format!("loading {model_id}"));
    }

    pub fn model_load_complete(&self, model_id: &str) {
        self.emit(ProgressType::ModelLoad, "complete", 100, 100, &format!("{model_id} ready"));
    }

    pub fn batch_start(&self, current: u64, total: u64) {
        self.emit(ProgressType::Encode, "batch_start", current, total, "encoding batch");
    }

    pub fn batch_end(&self, current: u64, total: u64) {
        self.emit(ProgressType::Encode, "batch_end", current, total, "batch complete");
    }

    pub fn cleaning_memory(&self) {
        self.emit(ProgressType::MemoryReclaim, "cleaning_memory", 0, 0, "reclaiming accelerator memory");
    }

    pub fn unload_start(&self, model_id: &str) {
        self.emit(ProgressType::ModelUnload, "starting", 0, 100, &format!("unloading {model_id}"));
    }

    pub fn unload_complete(&self) {
        self.emit(ProgressType::ModelUnload, "complete", 100, 100, "unloaded");
    }
}
