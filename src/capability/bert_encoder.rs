//! BERT-backed [`TextEncoder`] using candle.
//!
//! Tokenize → forward → attention-mask-aware mean pooling → L2 normalize,
//! exposed as a single synchronous `encode` the scheduler worker thread
//! calls directly, extended with a cached CPU fallback path.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use std::path::PathBuf;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams, TruncationStrategy};

use crate::capability::TextEncoder;
use crate::device::{DeviceClass, ProbedDevice};
use crate::error::{WorkerError, WorkerResult};

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    embedding_dim: usize,
    context_window: usize,
    weights_path: PathBuf,
    config: BertConfig,
}

/// CPU-resident clone of the loaded model used only for the accelerator
/// degradation path. Built lazily on first fallback and kept
/// for the remainder of the model's residency: rebuilding it fresh every
/// degraded request would reload safetensors from disk each time.
struct CpuFallback {
    model: BertModel,
    tokenizer: Tokenizer,
}

pub struct CandleBertEncoder {
    loaded: Option<LoadedModel>,
    cpu_fallback: Option<CpuFallback>,
}

impl Default for CandleBertEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleBertEncoder {
    pub fn new() -> Self {
        Self {
            loaded: None,
            cpu_fallback: None,
        }
    }

    /// Encode using the cached CPU fallback, building it on first use.
    fn cpu_fallback_encode(&mut self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
        let loaded = self
            .loaded
            .as_ref()
            .ok_or_else(|| WorkerError::NotReady("encoder not loaded".into()))?;

        if self.cpu_fallback.is_none() {
            log::warn!("building CPU fallback copy of '{}' for degraded request", loaded.model_id);
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[loaded.weights_path.clone()], DType::F32, &Device::Cpu)
                    .map_err(|e| WorkerError::ModelError(format!("CPU fallback load failed: {e}")))?
            };
            let model = BertModel::load(vb, &loaded.config)
                .map_err(|e| WorkerError::ModelError(format!("CPU fallback build failed: {e}")))?;
            self.cpu_fallback = Some(CpuFallback {
                model,
                tokenizer: loaded.tokenizer.clone(),
            });
        }

        let fallback = self.cpu_fallback.as_ref().expect("populated above");
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        forward_pass(&fallback.tokenizer, &fallback.model, &Device::Cpu, &refs)
    }
}

fn configure_tokenizer(tokenizer: &mut Tokenizer, max_length: usize) -> WorkerResult<()> {
    if let Some(pad_id) = tokenizer.get_vocab(true).get("[PAD]").copied() {
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: tokenizers::PaddingDirection::Right,
            pad_to_multiple_of: None,
            pad_id,
            pad_type_id: 0,
            pad_token: "[PAD]".to_string(),
        }));
    }
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            strategy: TruncationStrategy::LongestFirst,
            stride: 0,
            direction: tokenizers::TruncationDirection::Right,
        }))
        .map_err(|e| WorkerError::ModelError(format!("failed to set tokenizer truncation: {e}")))?;
    Ok(())
}

/// Tokenize → forward → attention-mask-aware mean pooling → L2 normalize.
fn forward_pass(
    tokenizer: &Tokenizer,
    model: &BertModel,
    device: &Device,
    texts: &[&str],
) -> WorkerResult<Vec<Vec<f32>>> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| WorkerError::EncodeFailure(format!("tokenization failed: {e}")))?;

    let token_ids = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_ids(), device))
        .collect::<candle_core::Result<Vec<_>>>()
        .map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;
    let attention_mask = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_attention_mask(), device))
        .collect::<candle_core::Result<Vec<_>>>()
        .map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;

    let token_ids = Tensor::stack(&token_ids, 0).map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;
    let attention_mask =
        Tensor::stack(&attention_mask, 0).map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;
    let token_type_ids = token_ids
        .zeros_like()
        .map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;

    let hidden = model
        .forward(&token_ids, &token_type_ids, Some(&attention_mask))
        .map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;

    let pooled = mean_pooling(&hidden, &attention_mask, device)
        .map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;
    let normalized = normalize_l2(&pooled).map_err(|e| WorkerError::EncodeFailure(e.to_string()))?;

    normalized
        .to_vec2::<f32>()
        .map_err(|e| WorkerError::EncodeFailure(format!("failed to materialize embeddings: {e}")))
}

fn mean_pooling(hidden: &Tensor, attention_mask: &Tensor, device: &Device) -> candle_core::Result<Tensor> {
    let mask = attention_mask.to_dtype(DType::F32)?;
    let expanded = mask.unsqueeze(2)?.expand(hidden.shape())?;
    let summed = (hidden * &expanded)?.sum(1)?;
    let counts = expanded.sum(1)?;
    let epsilon = Tensor::new(&[1e-9f32], device)?.broadcast_as(counts.shape())?;
    let safe_counts = (counts + epsilon)?;
    summed.div(&safe_counts)
}

fn normalize_l2(embeddings: &Tensor) -> candle_core::Result<Tensor> {
    embeddings.broadcast_div(&embeddings.sqr()?.sum_keepdim(1)?.sqrt()?)
}

/// Fetch a model's weights/tokenizer/config into the local hf-hub cache
/// without building a `BertModel` from them. Used by the `download_model`
/// RPC, which pre-warms the cache independently of whatever is currently
/// resident.
#[cfg(feature = "download-hf-hub")]
pub fn prefetch_to_cache(model_id: &str) -> WorkerResult<()> {
    let api = hf_hub::api::tokio::Api::new().map_err(|e| WorkerError::ModelError(format!("hf-hub api init failed: {e}")))?;
    let repo = api.model(model_id.to_string());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| WorkerError::Io(e.to_string()))?;
    runtime
        .block_on(async {
            repo.get("model.safetensors").await?;
            repo.get("tokenizer.json").await?;
            repo.get("config.json").await?;
            Ok::<_, hf_hub::api::tokio::ApiError>(())
        })
        .map_err(|e| WorkerError::ModelError(format!("model download failed: {e}")))
}

#[cfg(not(feature = "download-hf-hub"))]
pub fn prefetch_to_cache(_model_id: &str) -> WorkerResult<()> {
    Err(WorkerError::ModelError(
        "download-hf-hub feature disabled; models must be placed in the local cache manually".to_string(),
    ))
}

impl TextEncoder for CandleBertEncoder {
    fn load(&mut self, model_id: &str, device: &ProbedDevice) -> WorkerResult<()> {
        self.unload();

        #[cfg(feature = "download-hf-hub")]
        let (weights_path, tokenizer_path, config_path) = {
            let api = hf_hub::api::tokio::Api::new()
                .map_err(|e| WorkerError::ModelError(format!("hf-hub api init failed: {e}")))?;
            let repo = api.model(model_id.to_string());
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| WorkerError::Io(e.to_string()))?;
            runtime
                .block_on(async {
                    let weights = repo.get("model.safetensors").await?;
                    let tokenizer = repo.get("tokenizer.json").await?;
                    let config = repo.get("config.json").await?;
                    Ok::<_, hf_hub::api::tokio::ApiError>((weights, tokenizer, config))
                })
                .map_err(|e| WorkerError::ModelError(format!("model download failed: {e}")))?
        };

        #[cfg(not(feature = "download-hf-hub"))]
        let (weights_path, tokenizer_path, config_path): (PathBuf, PathBuf, PathBuf) = {
            let base = PathBuf::from(model_id);
            (
                base.join("model.safetensors"),
                base.join("tokenizer.json"),
                base.join("config.json"),
            )
        };

        let config_json = std::fs::read_to_string(&config_path)?;
        let bert_config: BertConfig = serde_json::from_str(&config_json)
            .map_err(|e| WorkerError::ModelError(format!("failed to parse config.json: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| WorkerError::ModelError(format!("failed to load tokenizer: {e}")))?;
        configure_tokenizer(&mut tokenizer, bert_config.max_position_embeddings)?;

        let dtype = if device.class == DeviceClass::Cuda {
            DType::F16
        } else {
            DType::F32
        };
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.clone()], dtype, &device.device)
                .map_err(|e| WorkerError::ModelError(format!("failed to load model weights: {e}")))?
        };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| WorkerError::ModelError(format!("failed to build BERT model: {e}")))?;

        self.loaded = Some(LoadedModel {
            model,
            tokenizer,
            device: device.device.clone(),
            model_id: model_id.to_string(),
            embedding_dim: bert_config.hidden_size,
            context_window: bert_config.max_position_embeddings,
            weights_path,
            config: bert_config,
        });
        Ok(())
    }

    fn encode(&mut self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
        let loaded = self
            .loaded
            .as_ref()
            .ok_or_else(|| WorkerError::NotReady("encoder not loaded".into()))?;
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        forward_pass(&loaded.tokenizer, &loaded.model, &loaded.device, &refs)
    }

    fn unload(&mut self) {
        self.loaded = None;
        self.cpu_fallback = None;
    }

    fn encode_cpu(&mut self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
        self.cpu_fallback_encode(texts)
    }

    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.loaded.as_ref().map(|l| l.embedding_dim)
    }

    fn context_window(&self) -> Option<usize> {
        self.loaded.as_ref().map(|l| l.context_window)
    }

    fn current_model_id(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.model_id.as_str())
    }
}
