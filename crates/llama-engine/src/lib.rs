//! # llama-engine
//!
//! The "narrow waist" of the llama-stream stack. Defines the traits that
//! describe the opaque inference capability (a loaded [`Model`], its
//! [`Vocabulary`], and a mutable [`DecodeContext`]) together with the shared
//! [`LlamaError`] taxonomy. The session layer only ever talks to these traits,
//! so the CPU reference backend can be swapped for an FFI backend without
//! changing application code.
//!
//! ## Design Notes
//!
//! ### Shared model, exclusive context
//! `Model` is `Send + Sync` and handed around as `Arc<dyn Model>`; it is never
//! mutated after load. `DecodeContext` takes `&mut self` everywhere: whoever
//! holds it has exclusive access, and the session serializes that access.
//!
//! ### Buffer protocols
//! Tokenization and piece rendering write into caller-owned buffers and report
//! [`TokenizeOutcome::Insufficient`] / [`PieceOutcome::Insufficient`] with the
//! required size instead of overflowing. Callers resize and retry.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are
//! logically non-negative.

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, LlamaError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Top-level error type for all engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlamaError {
    /// The process-wide runtime could not be brought up. Not retryable.
    #[error("backend initialization failed: {0}")]
    Initialization(String),

    /// The model file could not be loaded. Retrying with another path may work.
    #[error("failed to load model {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// The model is loaded but no decode context could be allocated for it.
    #[error("failed to create inference context: {0}")]
    ContextCreation(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    /// A decode call failed. Aborts the current request only.
    #[error("decode failed: {0}")]
    Decode(String),

    /// No model/context has been initialized for this session.
    #[error("engine not ready")]
    NotReady,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LlamaError {
    pub fn model_load(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        LlamaError::ModelLoad {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error only affects the request that raised it.
    pub fn is_per_request(&self) -> bool {
        matches!(
            self,
            LlamaError::Tokenization(_) | LlamaError::Decode(_) | LlamaError::NotReady
        )
    }
}

/// Sizes fixed when a decode context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Maximum number of positions the context can hold.
    pub n_ctx: usize,
    /// Maximum number of tokens accepted by a single `decode` call.
    pub n_batch: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 256,
            n_batch: 256,
        }
    }
}

/// Result of writing token ids into a caller-provided buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizeOutcome {
    /// `n` ids were written to the front of the buffer.
    Written(usize),
    /// The buffer was too small; nothing usable was written.
    Insufficient { required: usize },
}

/// Result of rendering one token's piece into a caller-provided byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceOutcome {
    Written(usize),
    Insufficient { required: usize },
}

/// Static facts about a loaded model, used for logging and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub path: PathBuf,
    pub n_vocab: usize,
    pub n_layers: usize,
    pub max_seq_len: usize,
}

/// Token vocabulary of a loaded model.
pub trait Vocabulary: Send + Sync {
    /// Number of entries in the vocabulary.
    fn n_tokens(&self) -> usize;

    /// Tokenize `text` into `out`.
    ///
    /// `add_special` prepends the beginning-of-sequence marker when the
    /// vocabulary is configured to use one; `parse_special` lets control
    /// token text (e.g. `<|eot_id|>`) map to its control id instead of bytes.
    fn tokenize_into(
        &self,
        text: &str,
        out: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> TokenizeOutcome;

    /// Render the bytes of one token into `out`.
    ///
    /// Control tokens render to their text only when `render_special` is set,
    /// and to zero bytes otherwise.
    fn token_to_piece(&self, token: TokenId, out: &mut [u8], render_special: bool) -> PieceOutcome;

    /// Whether `token` marks the end of generation.
    fn is_eog(&self, token: TokenId) -> bool;

    /// Beginning-of-sequence token, if the vocabulary has one.
    fn bos(&self) -> Option<TokenId>;
}

/// An immutable, loaded model.
pub trait Model: Send + Sync {
    fn info(&self) -> ModelInfo;

    fn vocab(&self) -> &dyn Vocabulary;

    /// Allocate a fresh decode context bound to this model.
    fn create_context(self: Arc<Self>, params: ContextParams) -> Result<Box<dyn DecodeContext>>;
}

/// Mutable decode state bound to one model.
pub trait DecodeContext: Send {
    /// Feed `batch` through the model, appending it to context memory.
    /// On success, [`DecodeContext::logits`] holds the distribution for the
    /// position after the last token of the batch.
    fn decode(&mut self, batch: &[TokenId]) -> Result<()>;

    /// Logits produced by the last successful `decode`.
    fn logits(&self) -> &[f32];

    /// Forget every position held in context memory.
    fn clear_memory(&mut self);

    /// Number of positions currently held.
    fn n_past(&self) -> usize;

    fn params(&self) -> ContextParams;
}

/// Loads models from the filesystem.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Model>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_load_error_carries_path() {
        let err = LlamaError::model_load("/models/missing.safetensors", "no such file");
        let msg = err.to_string();
        assert!(msg.contains("/models/missing.safetensors"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn context_creation_is_distinct_from_model_load() {
        let load = LlamaError::model_load("/m", "bad");
        let ctx = LlamaError::ContextCreation("n_ctx too large".into());
        assert_ne!(load, ctx);
        assert!(matches!(ctx, LlamaError::ContextCreation(_)));
    }

    #[test]
    fn per_request_errors() {
        assert!(LlamaError::Decode("x".into()).is_per_request());
        assert!(LlamaError::NotReady.is_per_request());
        assert!(!LlamaError::Initialization("x".into()).is_per_request());
        assert!(!LlamaError::ContextCreation("x".into()).is_per_request());
    }

    #[test]
    fn default_context_params() {
        let params = ContextParams::default();
        assert_eq!(params.n_ctx, 256);
        assert_eq!(params.n_batch, 256);
    }
}
