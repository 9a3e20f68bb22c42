//! # llama-models
//!
//! Pure-Rust CPU reference backend for llama-stream.
//!
//! Provides:
//! - **Kernels** ([`ops`]): RMSNorm, RoPE, causal attention, SwiGLU
//! - **Container** ([`safetensors`]): memory-mapped safetensors reader and a
//!   matching writer, with model config and vocabulary in `__metadata__`
//! - **Weights** ([`weights`]): named, shape-checked transformer weights
//! - **Backend** ([`cpu`]): [`CpuModel`] / [`CpuContext`], implementing the
//!   `llama-engine` traits
//! - **Loading** ([`loader`]): [`FileModelLoader`] and [`save_model`]
//!
//! Weights are `f32` only; quantized formats are out of scope.

pub mod config;
pub mod cpu;
pub mod loader;
pub mod ops;
pub mod safetensors;
pub mod weights;

pub use config::ModelConfig;
pub use cpu::{demo_vocab_spec, CpuContext, CpuModel};
pub use loader::{load_model, save_model, FileModelLoader};
pub use safetensors::{SafetensorsWriter, Tensor, TensorStore, FORMAT};
pub use weights::{LayerWeights, ModelWeights};

use llama_engine::TokenId;
use llama_kv::KVError;
use llama_tokenizer::TokenizerError;

/// Errors raised while reading, validating or running a model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("unsupported dtype {dtype} for tensor '{name}'")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("missing tensor '{0}'")]
    MissingTensor(String),

    #[error("tensor '{name}' has shape {got:?}, expected {expected:?}")]
    TensorShape {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("{what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    #[error("vocabulary: {0}")]
    Vocab(#[from] TokenizerError),

    #[error("KV cache: {0}")]
    KV(#[from] KVError),

    #[error("token id {token} outside vocabulary of {n_vocab}")]
    InvalidToken { token: TokenId, n_vocab: usize },
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
