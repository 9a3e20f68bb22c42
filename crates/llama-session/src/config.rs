//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (`{}`) is a valid
//! configuration file.

use std::path::Path;

use llama_engine::{ContextParams, LlamaError, Result};
use llama_sampling::SamplingConfig;
use llama_tokenizer::{PieceOverflow, PromptTemplate, DEFAULT_PIECE_CAPACITY, DEFAULT_SYSTEM_INSTRUCTION};
use serde::{Deserialize, Serialize};

/// Settings fixed for the lifetime of an [`crate::EngineSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Context window, in tokens.
    pub n_ctx: usize,

    /// Largest batch accepted by a single decode call. The whole prompt is
    /// decoded as one batch, so this also bounds prompt length.
    pub n_batch: usize,

    /// Maximum tokens generated per request.
    pub max_tokens: usize,

    /// Capacity of the per-token piece buffer, in bytes.
    pub piece_capacity: usize,

    pub piece_overflow: PieceOverflow,

    /// Clear context memory before every request. When off, prompts are
    /// appended to whatever the previous request left behind.
    pub clear_memory_per_request: bool,

    /// Render control tokens as their text instead of dropping them.
    pub render_special: bool,

    pub sampling: SamplingConfig,

    pub system_instruction: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let params = ContextParams::default();
        Self {
            n_ctx: params.n_ctx,
            n_batch: params.n_batch,
            max_tokens: 128,
            piece_capacity: DEFAULT_PIECE_CAPACITY,
            piece_overflow: PieceOverflow::default(),
            clear_memory_per_request: true,
            render_special: true,
            sampling: SamplingConfig::default(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file. The result is validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LlamaError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw).map_err(|e| match e {
            LlamaError::Config(reason) => LlamaError::Config(format!("{}: {reason}", path.display())),
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| LlamaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_ctx == 0 {
            return Err(LlamaError::Config("n_ctx must be positive".into()));
        }
        if self.n_batch == 0 {
            return Err(LlamaError::Config("n_batch must be positive".into()));
        }
        if self.n_batch > self.n_ctx {
            return Err(LlamaError::Config(format!(
                "n_batch ({}) cannot exceed n_ctx ({})",
                self.n_batch, self.n_ctx
            )));
        }
        if self.max_tokens == 0 {
            return Err(LlamaError::Config("max_tokens must be positive".into()));
        }
        if self.piece_capacity == 0 {
            return Err(LlamaError::Config("piece_capacity must be positive".into()));
        }
        self.sampling
            .validate()
            .map_err(|e| LlamaError::Config(format!("sampling: {e}")))
    }

    pub fn context_params(&self) -> ContextParams {
        ContextParams {
            n_ctx: self.n_ctx,
            n_batch: self.n_batch,
        }
    }

    pub fn template(&self) -> PromptTemplate {
        PromptTemplate::new(self.system_instruction.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.n_ctx, 256);
        assert_eq!(config.n_batch, 256);
        assert_eq!(config.max_tokens, 128);
        assert_eq!(config.piece_capacity, 128);
        assert!(config.clear_memory_per_request);
        assert!(config.sampling.is_greedy());
        config.validate().unwrap();
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_json_overrides() {
        let config = EngineConfig::from_json(
            r#"{"max_tokens": 16, "piece_overflow": "reject", "sampling": {"temperature": 0.7}}"#,
        )
        .unwrap();
        assert_eq!(config.max_tokens, 16);
        assert_eq!(config.piece_overflow, PieceOverflow::Reject);
        assert_eq!(config.sampling.temperature, 0.7);
        assert_eq!(config.sampling.seed, 42);
        assert_eq!(config.n_ctx, 256);
    }

    #[test]
    fn rejects_invalid_sizes() {
        for raw in [
            r#"{"n_ctx": 0}"#,
            r#"{"n_batch": 0}"#,
            r#"{"n_ctx": 64, "n_batch": 128}"#,
            r#"{"max_tokens": 0}"#,
            r#"{"piece_capacity": 0}"#,
            r#"{"sampling": {"top_k": 0}}"#,
        ] {
            assert!(
                matches!(EngineConfig::from_json(raw), Err(LlamaError::Config(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(LlamaError::Config(_))
        ));
    }

    #[test]
    fn template_uses_system_instruction() {
        let config = EngineConfig {
            system_instruction: "Be brief.".into(),
            ..EngineConfig::default()
        };
        assert!(config.template().format("hi").contains("Be brief."));
    }
}
