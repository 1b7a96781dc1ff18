//! Capability traits consumed by the core.
//!
//! These are the external-collaborator seams: the core (lifecycle,
//! scheduler, memory governor) is written against the traits here, never
//! against a concrete model library directly. Synchronous rather than
//! `Future`-returning, since the scheduler worker thread in this
//! worker is a single blocking OS thread, not a tokio task.

pub mod bert_encoder;
pub mod keyphrase;

use crate::device::ProbedDevice;
use crate::error::WorkerResult;

/// Adapter around the embedding library: load/unload weights on a device,
/// encode a list of strings to a fixed-dimension unit-norm matrix
///.
pub trait TextEncoder: Send {
    /// Load weights for `model_id` onto `device`. May take minutes; only
    /// cancellation-safe at the coarse boundary of "hasn't started yet".
    fn load(&mut self, model_id: &str, device: &ProbedDevice) -> WorkerResult<()>;

    /// Encode `texts` in a single call of at most `batch_size` items. Must
    /// use the device chosen at `load`. May return `Err` whose message
    /// contains an OOM marker; the memory governor inspects the message to
    /// decide whether to halve and retry.
    fn encode(&mut self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>>;

    /// Release all device-resident buffers. Idempotent.
    fn unload(&mut self);

    /// Retry the full request on CPU after a non-OOM accelerator failure
    ///. The default implementation
    /// reports the degradation path as unsupported; encoders backed by a
    /// device-portable framework should override this.
    fn encode_cpu(&mut self, _texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
        Err(crate::error::WorkerError::EncodeFailure(
            "CPU fallback not supported by this encoder".to_string(),
        ))
    }

    fn is_loaded(&self) -> bool;

    /// Post-load constant; `None` before the first successful `load`.
    fn embedding_dim(&self) -> Option<usize>;

    /// Post-load constant; `None` before the first successful `load`.
    fn context_window(&self) -> Option<usize>;

    fn current_model_id(&self) -> Option<&str>;
}

/// Given the currently loaded encoder, produce ranked keyphrases
///.
pub trait KeyphraseExtractor: Send {
    fn extract(
        &self,
        encoder: &mut dyn TextEncoder,
        request: &crate::domain::KeyphraseRequest,
    ) -> WorkerResult<Vec<crate::domain::Keyphrase>>;
}
