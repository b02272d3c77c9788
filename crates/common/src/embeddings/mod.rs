//! Embedding client
//!
//! `encode(text) -> vector<f32, D>`, unit-normalised, deterministic modulo
//! model version. The core calls this at most twice per request: once for
//! the user's query text, and once for a similar-by-id lookup only when
//! the retriever cannot reuse an existing chunk embedding. A local
//! sentence-embedding model (via `candle`) backs production use; failures
//! here only happen at load time, so steady-state calls are expected to
//! always succeed.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use std::path::PathBuf;
use std::sync::Arc;
use tokenizers::{PaddingParams, Tokenizer};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate a unit-normalised embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts; implementations are free to
    /// batch.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed dimension D of this embedder's output vectors.
    fn dimension(&self) -> usize;
}

/// Local sentence-embedding model loaded once at startup via `candle`.
///
/// Loading failure (missing files, insufficient memory) is the only
/// expected failure mode; `CandleEmbedder::load` surfaces it as
/// `AppError::EmbeddingError` and the caller treats the process as
/// unhealthy until it's retried.
pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl CandleEmbedder {
    /// Download (if needed) and load `repo_id` from the HuggingFace Hub,
    /// running on CPU. This blocks the caller, matching the "loading
    /// blocks that call" contract shared with the LLM gateway.
    pub async fn load(repo_id: &str, dimension: usize) -> Result<Self> {
        let repo_id = repo_id.to_string();
        tokio::task::spawn_blocking(move || Self::load_blocking(&repo_id, dimension))
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("embedder load task panicked: {e}"),
            })?
    }

    fn load_blocking(repo_id: &str, dimension: usize) -> Result<Self> {
        let api = hf_hub::api::sync::Api::new().map_err(|e| AppError::EmbeddingError {
            message: format!("failed to initialise hub client: {e}"),
        })?;
        let repo = api.model(repo_id.to_string());

        let fetch = |file: &str| -> Result<PathBuf> {
            repo.get(file).map_err(|e| AppError::EmbeddingError {
                message: format!("failed to fetch {file}: {e}"),
            })
        };

        let config_path = fetch("config.json")?;
        let tokenizer_path = fetch("tokenizer.json")?;
        let weights_path = fetch("model.safetensors")?;

        let config: BertConfig = serde_json::from_str(
            &std::fs::read_to_string(config_path).map_err(|e| AppError::EmbeddingError {
                message: format!("failed to read config: {e}"),
            })?,
        )
        .map_err(|e| AppError::EmbeddingError {
            message: format!("failed to parse bert config: {e}"),
        })?;

        let mut tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| AppError::EmbeddingError {
                message: format!("failed to load tokenizer: {e}"),
            })?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device).map_err(|e| {
                AppError::EmbeddingError {
                    message: format!("failed to load weights: {e}"),
                }
            })?
        };
        let model = BertModel::load(vb, &config).map_err(|e| AppError::EmbeddingError {
            message: format!("failed to build model: {e}"),
        })?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    fn encode_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::EmbeddingError {
                message: format!("tokenization failed: {e}"),
            })?;

        let token_ids: Vec<Tensor> = encodings
            .iter()
            .map(|enc| {
                Tensor::new(enc.get_ids(), &self.device).map_err(|e| AppError::EmbeddingError {
                    message: format!("tensor build failed: {e}"),
                })
            })
            .collect::<Result<_>>()?;
        let token_ids = Tensor::stack(&token_ids, 0).map_err(|e| AppError::EmbeddingError {
            message: format!("stack failed: {e}"),
        })?;
        let token_type_ids = token_ids.zeros_like().map_err(|e| AppError::EmbeddingError {
            message: format!("token type build failed: {e}"),
        })?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(|e| AppError::EmbeddingError {
                message: format!("forward pass failed: {e}"),
            })?;

        // Mean-pool token embeddings, then L2-normalise: all embeddings in
        // one deployment must be unit-length for cosine similarity to be
        // meaningful against the stored corpus vectors.
        let (_n, seq_len, _hidden) =
            output.dims3().map_err(|e| AppError::EmbeddingError {
                message: format!("unexpected output shape: {e}"),
            })?;
        let pooled = (output.sum(1).map_err(|e| AppError::EmbeddingError {
            message: format!("pooling failed: {e}"),
        })? / (seq_len as f64))
            .map_err(|e| AppError::EmbeddingError {
                message: format!("pooling scale failed: {e}"),
            })?;

        let pooled = pooled
            .to_dtype(DType::F32)
            .map_err(|e| AppError::EmbeddingError {
                message: format!("dtype cast failed: {e}"),
            })?;

        let raw: Vec<Vec<f32>> = pooled.to_vec2().map_err(|e| AppError::EmbeddingError {
            message: format!("tensor extraction failed: {e}"),
        })?;

        Ok(raw.into_iter().map(|v| normalize(&v)).collect())
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

#[async_trait]
impl Embedder for CandleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch.pop().ok_or_else(|| AppError::EmbeddingError {
            message: "empty embedding batch".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // candle's forward pass is CPU-bound and would ideally run on a
        // blocking worker pool to avoid starving the async I/O threads.
        // The model is `Send` but not cheaply `Sync`-shareable across a
        // spawned closure without cloning, so the pass runs synchronously
        // here; callers share this embedder behind an `Arc`.
        let started = std::time::Instant::now();
        let result = self.encode_blocking(texts);
        crate::metrics::record_embedding(started.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder used in tests: hashes the input into a
/// reproducible unit vector instead of calling a model, so query-parser
/// and retriever unit tests don't need a downloaded model.
pub struct DeterministicEmbedder {
    dimension: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut raw = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let bits = hasher.finish();
            raw.push(((bits % 2000) as f32 - 1000.0) / 1000.0);
        }
        Ok(normalize(&raw))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Construct the configured embedder. `"candle"` loads the real local
/// model; anything else (including test configuration) falls back to the
/// deterministic embedder with a warning.
pub async fn create_embedder(provider: &str, model_repo: &str, dimension: usize) -> Result<Arc<dyn Embedder>> {
    match provider {
        "candle" => Ok(Arc::new(CandleEmbedder::load(model_repo, dimension).await?)),
        other => {
            tracing::warn!(provider = other, "unknown embedding provider, using deterministic fallback");
            Ok(Arc::new(DeterministicEmbedder::new(dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_embedder_dimension() {
        let embedder = DeterministicEmbedder::new(384);
        let v = embedder.embed("requests by Alice").await.unwrap();
        assert_eq!(v.len(), 384);
    }

    #[tokio::test]
    async fn test_deterministic_embedder_is_unit_normalised() {
        let embedder = DeterministicEmbedder::new(64);
        let v = embedder.embed("type 4").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_deterministic_embedder_is_deterministic() {
        let embedder = DeterministicEmbedder::new(32);
        let a = embedder.embed("same text").await.unwrap();
        let b = embedder.embed("same text").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_batch_matches_individual() {
        let embedder = DeterministicEmbedder::new(16);
        let single = embedder.embed("hello").await.unwrap();
        let batch = embedder
            .embed_batch(&["hello".to_string()])
            .await
            .unwrap();
        assert_eq!(batch[0], single);
    }
}
