//! Adaptive batched encode under the memory governor.
//!
//! An allocation-guarding layer the encode path runs through, with counters
//! exposed for `health_check`-style introspection, narrowed to a
//! single-resident-model, per-call OOM-halving governor. This worker never
//! hosts more than one model at a time, so there is no eviction-candidate
//! bookkeeping to do.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::capability::TextEncoder;
use crate::config::MAX_OOM_RETRIES;
use crate::device::DeviceClass;
use crate::error::{WorkerError, WorkerResult};
use crate::memory::{classify_model_size, compute_max_chars, initial_batch_size, truncate_inputs};
use crate::progress::ProgressEmitter;

const OOM_MARKERS: &[&str] = &[
    "out of memory",
    "cuda out of memory",
    "resource_exhausted",
    "cannot allocate memory",
    "oom",
];

fn is_oom_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    OOM_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[derive(Debug, Default)]
pub struct GovernorStats {
    truncated_inputs: AtomicU64,
    cpu_degradations: AtomicU64,
}

impl GovernorStats {
    pub fn truncated_inputs(&self) -> u64 {
        self.truncated_inputs.load(Ordering::Relaxed)
    }

    pub fn cpu_degradations(&self) -> u64 {
        self.cpu_degradations.load(Ordering::Relaxed)
    }
}

pub struct MemoryGovernor {
    stats: GovernorStats,
}

impl Default for MemoryGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGovernor {
    pub fn new() -> Self {
        Self {
            stats: GovernorStats::default(),
        }
    }

    pub fn stats(&self) -> &GovernorStats {
        &self.stats
    }

    /// Truncate, batch, and encode `texts`, halving the batch size on OOM
    /// and falling back to CPU once on any other accelerator failure.
    pub fn encode(
        &self,
        encoder: &mut dyn TextEncoder,
        texts: &[String],
        device_class: DeviceClass,
        progress: &ProgressEmitter,
    ) -> WorkerResult<Vec<Vec<f32>>> {
        let context_window = encoder.context_window().unwrap_or(512);
        let embedding_dim = encoder.embedding_dim().unwrap_or(384);
        let size_class = classify_model_size(embedding_dim);

        let max_chars = compute_max_chars(context_window);
        let (texts, truncated) = truncate_inputs(texts, max_chars);
        if truncated > 0 {
            self.stats.truncated_inputs.fetch_add(truncated, Ordering::Relaxed);
            log::warn!("truncated {truncated} of {} inputs to {max_chars} chars", texts.len());
        }

        let total = texts.len() as u64;
        match self.encode_batches(encoder, &texts, device_class, size_class, total, progress) {
            Ok(vectors) => Ok(vectors),
            Err(GovernorError::Oom(e)) => Err(e),
            Err(GovernorError::Other(e)) => {
                log::warn!("accelerator encode failed ({e}); retrying full request on CPU");
                self.stats.cpu_degradations.fetch_add(1, Ordering::Relaxed);
                encoder.encode_cpu(&texts)
            }
        }
    }

    fn encode_batches(
        &self,
        encoder: &mut dyn TextEncoder,
        texts: &[String],
        device_class: DeviceClass,
        size_class: crate::memory::ModelSizeClass,
        total: u64,
        progress: &ProgressEmitter,
    ) -> Result<Vec<Vec<f32>>, GovernorError> {
        let context_window = encoder.context_window().unwrap_or(512);
        let mut batch_size = initial_batch_size(device_class, context_window, size_class);
        let mut results = Vec::with_capacity(texts.len());
        let mut offset = 0usize;

        while offset < texts.len() {
            let mut retries: u32 = 0;
            loop {
                let end = (offset + batch_size).min(texts.len());
                let slice = &texts[offset..end];
                progress.batch_start(offset as u64, total);

                match encoder.encode(slice) {
                    Ok(vectors) => {
                        results.extend(vectors);
                        progress.batch_end(end as u64, total);
                        progress.cleaning_memory();
                        offset = end;
                        break;
                    }
                    Err(e) if is_oom_error(&e.to_string()) && retries < MAX_OOM_RETRIES => {
                        retries += 1;
                        batch_size = (batch_size / 2).max(1);
                        log::warn!(
                            "OOM at batch size {} (attempt {retries}/{MAX_OOM_RETRIES}); halving to {batch_size}",
                            end - offset
                        );
                        progress.cleaning_memory();
                    }
                    Err(e) if is_oom_error(&e.to_string()) => {
                        return Err(GovernorError::Oom(WorkerError::EncodeFailure(format!(
                            "OOM persists at batch size 1: {e}"
                        ))));
                    }
                    Err(e) => return Err(GovernorError::Other(e)),
                }
            }
        }
        Ok(results)
    }
}

enum GovernorError {
    Oom(WorkerError),
    Other(WorkerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProbedDevice;
    use std::sync::Mutex;

    /// Fault-injectable encoder: raises an OOM-shaped error whenever a call
    /// receives more than `max_ok` inputs, used to exercise the halving loop.
    struct FaultInjectedEncoder {
        max_ok: usize,
        dim: usize,
        context_window: usize,
        observed_batch_sizes: Mutex<Vec<usize>>,
    }

    impl TextEncoder for FaultInjectedEncoder {
        fn load(&mut self, _model_id: &str, _device: &ProbedDevice) -> WorkerResult<()> {
            Ok(())
        }

        fn encode(&mut self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
            self.observed_batch_sizes.lock().unwrap().push(texts.len());
            if texts.len() > self.max_ok {
                return Err(WorkerError::EncodeFailure("CUDA out of memory".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.1f32; self.dim]).collect())
        }

        fn unload(&mut self) {}
        fn is_loaded(&self) -> bool {
            true
        }
        fn embedding_dim(&self) -> Option<usize> {
            Some(self.dim)
        }
        fn context_window(&self) -> Option<usize> {
            Some(self.context_window)
        }
        fn current_model_id(&self) -> Option<&str> {
            Some("fault-injected")
        }
    }

    fn test_progress() -> ProgressEmitter {
        ProgressEmitter::new(crate::stdout_writer::StdoutWriter::for_writer(Box::new(std::io::sink())))
    }

    #[test]
    fn oom_halving_converges_and_produces_full_length_response() {
        let mut encoder = FaultInjectedEncoder {
            max_ok: 2,
            dim: 8,
            context_window: 512,
            observed_batch_sizes: Mutex::new(Vec::new()),
        };
        let governor = MemoryGovernor::new();
        let texts: Vec<String> = (0..16).map(|i| format!("text-{i}")).collect();
        let progress = test_progress();

        // Force initial batch size to 8 by using CUDA + small model + normal context.
        let result = governor
            .encode_batches(&mut encoder, &texts, DeviceClass::Cuda, crate::memory::ModelSizeClass::Small, 16, &progress)
            .unwrap_or_else(|_| panic!("encode_batches should converge"));

        assert_eq!(result.len(), 16);
        let observed = encoder.observed_batch_sizes.into_inner().unwrap();
        assert_eq!(&observed[..3], &[8, 4, 2]);
    }

    #[test]
    fn truncation_counter_increments_for_oversized_input() {
        let mut encoder = FaultInjectedEncoder {
            max_ok: 100,
            dim: 8,
            context_window: 512,
            observed_batch_sizes: Mutex::new(Vec::new()),
        };
        let governor = MemoryGovernor::new();
        let huge = "x".repeat(100_000);
        let progress = test_progress();

        let result = governor.encode(&mut encoder, &[huge], DeviceClass::Cpu, &progress).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(governor.stats().truncated_inputs(), 1);
    }
}
