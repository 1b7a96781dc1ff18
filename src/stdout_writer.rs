//! Serialized stdout access.
//!
//! Stdout carries both JSON-RPC replies and unsolicited `progress_update`
//! notifications; both must produce one complete JSON object
//! per line with no interleaving. A single mutex-guarded writer shared by
//! the dispatcher and the progress emitter is the simplest thing that
//! satisfies that.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::WorkerResult;

pub struct StdoutWriter {
    inner: Mutex<Box<dyn Write + Send>>,
}

impl StdoutWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Box::new(std::io::stdout())),
        })
    }

    #[cfg(test)]
    pub fn for_writer(writer: Box<dyn Write + Send>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(writer),
        })
    }

    pub fn write_line(&self, value: &Value) -> WorkerResult<()> {
        let mut out = self.inner.lock();
        serde_json::to_writer(&mut *out, value).map_err(|e| crate::error::WorkerError::Io(e.to_string()))?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
