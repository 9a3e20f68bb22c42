//! Transformer hyperparameters.
//!
//! Stored as JSON in the `config` entry of the container metadata.

use serde::{Deserialize, Serialize};

use crate::{ModelError, ModelResult};

fn default_rope_base() -> f32 {
    10_000.0
}

fn default_norm_eps() -> f32 {
    1e-5
}

/// Configuration for a Llama-style decoder-only transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub d_model: usize,
    pub n_heads: usize,
    pub n_layers: usize,
    /// Feed-forward hidden dimension.
    pub d_ff: usize,
    pub vocab_size: usize,
    /// Longest context any decode context may be created with.
    pub max_seq_len: usize,
    #[serde(default = "default_rope_base")]
    pub rope_base: f32,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f32,
}

impl ModelConfig {
    /// Small configuration used by the demo model and tests.
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            d_model: 32,
            n_heads: 4,
            n_layers: 2,
            d_ff: 64,
            vocab_size,
            max_seq_len: 512,
            rope_base: default_rope_base(),
            norm_eps: default_norm_eps(),
        }
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    pub fn validate(&self) -> ModelResult<()> {
        let zero = [
            ("d_model", self.d_model),
            ("n_heads", self.n_heads),
            ("n_layers", self.n_layers),
            ("d_ff", self.d_ff),
            ("vocab_size", self.vocab_size),
            ("max_seq_len", self.max_seq_len),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        if let Some((name, _)) = zero {
            return Err(ModelError::InvalidConfig(format!("{name} must be non-zero")));
        }
        if self.d_model % self.n_heads != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "d_model {} is not divisible by n_heads {}",
                self.d_model, self.n_heads
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "head_dim {} must be even for RoPE",
                self.head_dim()
            )));
        }
        if !(self.norm_eps > 0.0) || !(self.rope_base > 0.0) {
            return Err(ModelError::InvalidConfig(
                "norm_eps and rope_base must be positive".into(),
            ));
        }
        Ok(())
    }
}
