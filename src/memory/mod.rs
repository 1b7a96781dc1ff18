//! Memory governor: context-window truncation, device-aware initial batch
//! sizing, and adaptive OOM halving.

pub mod governor;

pub use governor::MemoryGovernor;

use crate::config::{CHARS_PER_TOKEN, MAX_BATCH_SIZE, MAX_TRUNCATION_CHARS, MIN_BATCH_SIZE, MIN_TRUNCATION_CHARS};
use crate::device::DeviceClass;

/// Coarse model-size bucket used only for the batch-size heuristic table
///; not the embedding dimension itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSizeClass {
    Small,
    Large,
}

/// `large` above this hidden-state dimension. Models in this class alone
/// (e.g. e5-large, bge-large) run a markedly heavier forward pass per token
/// than the MiniLM-class defaults the table's "Small model" column assumes.
const LARGE_MODEL_DIM_THRESHOLD: usize = 768;

pub fn classify_model_size(embedding_dim: usize) -> ModelSizeClass {
    if embedding_dim > LARGE_MODEL_DIM_THRESHOLD {
        ModelSizeClass::Large
    } else {
        ModelSizeClass::Small
    }
}

/// `max_chars = max(1000, min(3·C, 12000))`.
pub fn compute_max_chars(context_window_tokens: usize) -> usize {
    let estimated = context_window_tokens.saturating_mul(CHARS_PER_TOKEN);
    estimated.clamp(MIN_TRUNCATION_CHARS, MAX_TRUNCATION_CHARS)
}

/// Truncate any input exceeding `max_chars`, keeping the prefix. Returns the
/// (possibly truncated) strings and a count of how many were truncated.
pub fn truncate_inputs(texts: &[String], max_chars: usize) -> (Vec<String>, u64) {
    let mut truncated_count = 0u64;
    let out = texts
        .iter()
        .map(|t| {
            if t.chars().count() > max_chars {
                truncated_count += 1;
                t.chars().take(max_chars).collect()
            } else {
                t.clone()
            }
        })
        .collect();
    (out, truncated_count)
}

const VERY_LARGE_CONTEXT_THRESHOLD: usize = 8192;

/// Device- and model-class-dependent initial batch size, clamped to `[1, 32]`.
pub fn initial_batch_size(device: DeviceClass, context_window: usize, size_class: ModelSizeClass) -> usize {
    let raw = match device {
        DeviceClass::Cuda => {
            if context_window >= VERY_LARGE_CONTEXT_THRESHOLD {
                8
            } else if size_class == ModelSizeClass::Large {
                8
            } else {
                16
            }
        }
        DeviceClass::Metal => {
            if context_window >= VERY_LARGE_CONTEXT_THRESHOLD {
                1
            } else if size_class == ModelSizeClass::Large {
                2
            } else {
                4
            }
        }
        DeviceClass::Cpu => 4,
    };
    raw.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}
