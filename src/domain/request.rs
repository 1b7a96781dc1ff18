//! Wire-level request/response types.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority class for an inbound encode request. `Immediate` is
/// latency-sensitive (user-visible path); `Batch` is throughput-sensitive
/// (background crawl/index). Numeric value doubles as the scheduler's heap
/// key: lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Immediate = 0,
    Batch = 1,
}

impl Priority {
    pub fn from_immediate_flag(immediate: bool) -> Self {
        if immediate {
            Priority::Immediate
        } else {
            Priority::Batch
        }
    }
}

/// Request for embedding generation.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// A unit-norm embedding vector with provenance metadata.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub dimensions: usize,
    pub model: String,
    pub created_at: String,
    pub chunk_id: String,
}

/// Response to `generate_embeddings`.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<EmbeddingVector>,
    pub success: bool,
    pub processing_time_ms: u64,
    pub model_info: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbeddingResponse {
    pub fn failure(request_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            embeddings: Vec::new(),
            success: false,
            processing_time_ms: 0,
            model_info: HashMap::new(),
            request_id,
            error: Some(error.into()),
        }
    }
}

/// Request for KeyBERT-style keyphrase extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyphraseRequest {
    pub text: String,
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),
    #[serde(default = "default_true")]
    pub use_mmr: bool,
    #[serde(default = "default_diversity")]
    pub diversity: f32,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub stop_words: Option<String>,
    #[serde(default)]
    pub structured_candidates: Option<StructuredCandidates>,
}

fn default_ngram_range() -> (usize, usize) {
    (1, 3)
}
fn default_true() -> bool {
    true
}
fn default_diversity() -> f32 {
    0.5
}
fn default_top_n() -> usize {
    10
}

/// Optional structured-candidate sets used for weighted re-ranking.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredCandidates {
    #[serde(default)]
    pub metadata: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub emphasized: Vec<String>,
    #[serde(default)]
    pub captions: Vec<String>,
}

/// A single ranked keyphrase.
#[derive(Debug, Clone, Serialize)]
pub struct Keyphrase {
    pub text: String,
    pub score: f32,
}

/// Response to `extract_keyphrases_keybert`.
#[derive(Debug, Clone, Serialize)]
pub struct KeyphraseResponse {
    pub keyphrases: Vec<Keyphrase>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeyphraseResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            keyphrases: Vec::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Batch request for `extract_keyphrases_keybert_batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyphraseBatchRequest {
    pub texts: Vec<String>,
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),
    #[serde(default = "default_true")]
    pub use_mmr: bool,
    #[serde(default = "default_diversity")]
    pub diversity: f32,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub stop_words: Option<String>,
}

/// Response to `extract_keyphrases_keybert_batch`. A single text's failure
/// yields an empty list for that slot, never an RPC-level error.
#[derive(Debug, Clone, Serialize)]
pub struct KeyphraseBatchResponse {
    pub keyphrases_batch: Vec<Vec<Keyphrase>>,
    pub success: bool,
    pub processing_time_ms: u64,
}

/// Internal envelope carried through the priority scheduler's queue.
///
/// Ordering: lower `priority` first, ties broken by earlier `arrival`
///. `std::collections::BinaryHeap` is a
/// max-heap, so `Ord` is implemented inverted here: the item that should pop
/// first compares as "greatest".
pub struct QueuedRequest<Req> {
    pub priority: Priority,
    pub arrival: Instant,
    pub request: Req,
}

impl<Req> QueuedRequest<Req> {
    pub fn new(priority: Priority, request: Req) -> Self {
        Self {
            priority,
            arrival: Instant::now(),
            request,
        }
    }
}

impl<Req> PartialEq for QueuedRequest<Req> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.arrival == other.arrival
    }
}
impl<Req> Eq for QueuedRequest<Req> {}

impl<Req> PartialOrd for QueuedRequest<Req> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Req> Ord for QueuedRequest<Req> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: lower priority value and earlier arrival should be "greater"
        // so BinaryHeap::pop() returns it first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.arrival.cmp(&self.arrival))
    }
}
