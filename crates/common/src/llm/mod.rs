//! LLM Gateway (C7)
//!
//! Loads a causal language model lazily on first call, generates answers
//! given a prompt, and reports which device it ran on. Exactly one
//! instance exists process-wide: calls are serialised by holding the model
//! behind an async mutex for the duration of a generation, and a bounded
//! counter in front of that mutex rejects callers beyond the configured
//! queue depth with `Overloaded` instead of making them wait indefinitely.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen2::{Config as Qwen2Config, ModelForCausalLM};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokenizers::Tokenizer;
use tokio::sync::Mutex;

/// Device a generation call actually ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmDevice {
    Cpu,
    Gpu,
}

impl std::fmt::Display for LlmDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmDevice::Cpu => write!(f, "cpu"),
            LlmDevice::Gpu => write!(f, "gpu"),
        }
    }
}

/// The only polymorphism the gateway needs: how the next token is chosen
/// from a logits distribution. Two concrete strategies, not subclasses of
/// a generic LLM type.
pub trait DecodingStrategy: Send + Sync {
    fn next_token(&mut self, logits: &Tensor) -> Result<u32>;
    fn name(&self) -> &'static str;
}

/// Deterministic argmax decoding, used on CPU.
pub struct GreedyDecoding;

impl DecodingStrategy for GreedyDecoding {
    fn next_token(&mut self, logits: &Tensor) -> Result<u32> {
        let logits = logits.to_dtype(DType::F32).map_err(cast_err)?;
        let vals: Vec<f32> = logits.to_vec1().map_err(cast_err)?;
        let (idx, _) = vals
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or_else(|| AppError::Internal {
                message: "empty logits".to_string(),
            })?;
        Ok(idx as u32)
    }

    fn name(&self) -> &'static str {
        "greedy"
    }
}

/// Temperature-scaled sampling, used on an accelerator.
pub struct SamplingDecoding {
    pub temperature: f32,
    rng: rand_pcg_like::SmallRng,
}

/// A tiny xorshift-based RNG so sampling decoding does not pull in `rand`
/// purely for one call site; the LLM gateway's only source of randomness.
mod rand_pcg_like {
    pub struct SmallRng(u64);
    impl SmallRng {
        pub fn seeded(seed: u64) -> Self {
            Self(seed ^ 0x9E3779B97F4A7C15)
        }
        pub fn next_f32(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 11) as f32 / (1u64 << 53) as f32
        }
    }
}

impl SamplingDecoding {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature: temperature.max(0.05),
            rng: rand_pcg_like::SmallRng::seeded(0xA5A5_5A5A),
        }
    }
}

impl DecodingStrategy for SamplingDecoding {
    fn next_token(&mut self, logits: &Tensor) -> Result<u32> {
        let logits = (logits.to_dtype(DType::F32).map_err(cast_err)? / self.temperature as f64)
            .map_err(cast_err)?;
        let vals: Vec<f32> = logits.to_vec1().map_err(cast_err)?;
        let max = vals.iter().cloned().fold(f32::MIN, f32::max);
        let exp: Vec<f32> = vals.iter().map(|v| (v - max).exp()).collect();
        let sum: f32 = exp.iter().sum();
        let probs: Vec<f32> = exp.iter().map(|v| v / sum).collect();

        let draw = self.rng.next_f32();
        let mut cumulative = 0.0f32;
        for (idx, p) in probs.iter().enumerate() {
            cumulative += p;
            if draw <= cumulative {
                return Ok(idx as u32);
            }
        }
        Ok((probs.len() - 1) as u32)
    }

    fn name(&self) -> &'static str {
        "sampling"
    }
}

fn cast_err(e: candle_core::Error) -> AppError {
    AppError::Internal {
        message: format!("tensor error: {e}"),
    }
}

pub struct GenerationResult {
    pub text: String,
    pub device: LlmDevice,
    pub duration: Duration,
}

struct LoadedModel {
    model: ModelForCausalLM,
    tokenizer: Tokenizer,
    device: Device,
    device_kind: LlmDevice,
    max_new_tokens: usize,
    eos_token_id: u32,
}

enum LlmState {
    Unloaded,
    Loaded(Box<LoadedModel>),
    /// Terminal: a load attempt failed. No auto-recovery.
    Unavailable(String),
}

/// The LLM Gateway: a process-wide singleton, constructed once at startup
/// and shared via `Arc`.
pub struct LlmGateway {
    config: LlmConfig,
    model_repo: String,
    state: Mutex<LlmState>,
    queued: AtomicUsize,
}

impl LlmGateway {
    /// Construct the gateway without loading the model — loading happens
    /// lazily on first `generate` call.
    pub fn new(model_repo: String, config: LlmConfig) -> Self {
        Self {
            config,
            model_repo,
            state: Mutex::new(LlmState::Unloaded),
            queued: AtomicUsize::new(0),
        }
    }

    /// Current status for `/health`, without blocking on the LLM.
    pub fn status(&self) -> &'static str {
        match self.state.try_lock() {
            Ok(guard) => match &*guard {
                LlmState::Unloaded => "unloaded",
                LlmState::Loaded(_) => "loaded",
                LlmState::Unavailable(_) => "unavailable",
            },
            // Another call holds the lock mid-generation or mid-load;
            // report the best approximation without waiting.
            Err(_) => "loaded",
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GenerationResult> {
        let depth = self.config.queue_depth;
        let prev = self.queued.fetch_add(1, Ordering::SeqCst);
        crate::metrics::set_llm_queue_depth(prev + 1);
        if prev >= depth {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            crate::metrics::set_llm_queue_depth(prev);
            return Err(AppError::Overloaded);
        }

        let mut guard = self.state.lock().await;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        crate::metrics::set_llm_queue_depth(self.queued.load(Ordering::SeqCst));

        if let LlmState::Unavailable(message) = &*guard {
            return Err(AppError::LlmUnavailable {
                message: message.clone(),
            });
        }

        if matches!(&*guard, LlmState::Unloaded) {
            let repo = self.model_repo.clone();
            let gen_cfg = self.config.generation.clone();
            match tokio::task::spawn_blocking(move || load_blocking(&repo, &gen_cfg))
                .await
                .map_err(|e| AppError::LlmUnavailable {
                    message: format!("load task panicked: {e}"),
                })
                .and_then(|inner| inner)
            {
                Ok(loaded) => *guard = LlmState::Loaded(Box::new(loaded)),
                Err(e) => {
                    let message = e.to_string();
                    *guard = LlmState::Unavailable(message.clone());
                    return Err(AppError::LlmUnavailable { message });
                }
            }
        }

        let loaded = match &mut *guard {
            LlmState::Loaded(loaded) => loaded,
            _ => unreachable!("state was just established as Loaded"),
        };

        let start = Instant::now();
        let decoding_name = self.config.generation.decoding.clone();
        let mut strategy: Box<dyn DecodingStrategy> = match (loaded.device_kind, decoding_name.as_str()) {
            (_, "sampling") => Box::new(SamplingDecoding::new(self.config.generation.temperature)),
            (LlmDevice::Gpu, _) => Box::new(SamplingDecoding::new(self.config.generation.temperature)),
            _ => Box::new(GreedyDecoding),
        };

        let device_kind = loaded.device_kind;
        let result = run_generation(loaded, prompt, strategy.as_mut());
        crate::metrics::record_llm_generate(start.elapsed().as_secs_f64(), &device_kind.to_string(), result.is_ok());
        let text = result?;
        Ok(GenerationResult {
            text,
            device: device_kind,
            duration: start.elapsed(),
        })
    }
}

fn load_blocking(repo_id: &str, gen_cfg: &crate::config::GenerationConfig) -> Result<LoadedModel> {
    let device = Device::Cpu;
    let device_kind = LlmDevice::Cpu;

    let api = hf_hub::api::sync::Api::new().map_err(|e| AppError::LlmUnavailable {
        message: format!("failed to initialise hub client: {e}"),
    })?;
    let repo = api.model(repo_id.to_string());

    let fetch = |file: &str| -> Result<PathBuf> {
        repo.get(file).map_err(|e| AppError::LlmUnavailable {
            message: format!("failed to fetch {file}: {e}"),
        })
    };

    let config_path = fetch("config.json")?;
    let tokenizer_path = fetch("tokenizer.json")?;
    let weights_path = fetch("model.safetensors")?;

    let config: Qwen2Config = serde_json::from_str(
        &std::fs::read_to_string(config_path).map_err(|e| AppError::LlmUnavailable {
            message: format!("failed to read config: {e}"),
        })?,
    )
    .map_err(|e| AppError::LlmUnavailable {
        message: format!("failed to parse model config: {e}"),
    })?;

    let mut tokenizer =
        Tokenizer::from_file(tokenizer_path).map_err(|e| AppError::LlmUnavailable {
            message: format!("failed to load tokenizer: {e}"),
        })?;

    let eos_token_id = tokenizer
        .token_to_id("<|endoftext|>")
        .or_else(|| tokenizer.token_to_id("</s>"))
        .unwrap_or(0);

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device).map_err(|e| {
            AppError::LlmUnavailable {
                message: format!("failed to load weights: {e}"),
            }
        })?
    };
    let model = ModelForCausalLM::new(&config, vb).map_err(|e| AppError::LlmUnavailable {
        message: format!("failed to build model: {e}"),
    })?;

    let max_new_tokens = match device_kind {
        LlmDevice::Cpu => gen_cfg.max_new_tokens_cpu,
        LlmDevice::Gpu => gen_cfg.max_new_tokens_accel,
    };

    Ok(LoadedModel {
        model,
        tokenizer,
        device,
        device_kind,
        max_new_tokens,
        eos_token_id,
    })
}

fn run_generation(
    loaded: &mut LoadedModel,
    prompt: &str,
    strategy: &mut dyn DecodingStrategy,
) -> Result<String> {
    let encoding = loaded
        .tokenizer
        .encode(prompt, true)
        .map_err(|e| AppError::Internal {
            message: format!("tokenization failed: {e}"),
        })?;

    let mut tokens = encoding.get_ids().to_vec();
    let prompt_len = tokens.len();

    for index in 0..loaded.max_new_tokens {
        let context = Tensor::new(tokens.as_slice(), &loaded.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(cast_err)?;
        let logits = loaded
            .model
            .forward(&context, index)
            .map_err(|e| AppError::Internal {
                message: format!("forward pass failed: {e}"),
            })?;
        let logits = logits.squeeze(0).map_err(cast_err)?.squeeze(0).map_err(cast_err)?;
        let next = strategy.next_token(&logits)?;
        if next == loaded.eos_token_id {
            break;
        }
        tokens.push(next);
    }

    loaded
        .tokenizer
        .decode(&tokens[prompt_len..], true)
        .map_err(|e| AppError::Internal {
            message: format!("detokenization failed: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greedy_picks_max_logit() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[0.1f32, 5.0, -3.0, 2.0], &device).unwrap();
        let mut strategy = GreedyDecoding;
        assert_eq!(strategy.next_token(&logits).unwrap(), 1);
    }

    #[test]
    fn test_sampling_never_panics_and_is_in_range() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[1.0f32, 1.0, 1.0, 1.0], &device).unwrap();
        let mut strategy = SamplingDecoding::new(1.0);
        let token = strategy.next_token(&logits).unwrap();
        assert!(token < 4);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(LlmDevice::Cpu.to_string(), "cpu");
        assert_eq!(LlmDevice::Gpu.to_string(), "gpu");
    }
}
