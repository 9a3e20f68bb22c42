//! CPU reference backend.
//!
//! [`CpuModel`] holds immutable weights and the vocabulary and is shared as
//! `Arc`. Each [`CpuContext`] owns its KV cache and logits; decoding one
//! token runs the full stack:
//!
//! embed → (norm → attention → residual → norm → SwiGLU → residual) × n_layers
//! → norm → output projection

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llama_engine::{
    ContextParams, DecodeContext, LlamaError, Model, ModelInfo, Result, TokenId, Vocabulary,
};
use llama_kv::{KVError, SessionKVCache};
use llama_tokenizer::{Vocab, VocabSpec};

use crate::config::ModelConfig;
use crate::ops::{add_in_place, attention, matvec, mlp_swiglu, rms_norm, RoPE};
use crate::weights::ModelWeights;
use crate::{ModelError, ModelResult};

const DEMO_CORPUS: &str = "\
The cat sleeps on the warm mat. Le chat dort sur le tapis chaud. \
Good morning, how are you today? Bonjour, comment allez-vous aujourd'hui ? \
The weather is nice and the sun is shining. Il fait beau et le soleil brille. \
Thank you very much for your help. Merci beaucoup pour votre aide.";

/// Vocabulary used by the demo model: Llama 3 control tokens plus merges
/// learned from a small English/French corpus.
pub fn demo_vocab_spec() -> VocabSpec {
    VocabSpec::llama3(VocabSpec::learn_merges(DEMO_CORPUS, 64))
}

pub struct CpuModel {
    path: PathBuf,
    config: ModelConfig,
    vocab: Vocab,
    weights: ModelWeights,
    rope: RoPE,
}

impl std::fmt::Debug for CpuModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuModel")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CpuModel {
    pub fn new(
        path: impl Into<PathBuf>,
        config: ModelConfig,
        vocab: Vocab,
        weights: ModelWeights,
    ) -> ModelResult<Self> {
        config.validate()?;
        if vocab.n_tokens() != config.vocab_size {
            return Err(ModelError::InvalidConfig(format!(
                "vocab_size {} does not match vocabulary of {} tokens",
                config.vocab_size,
                vocab.n_tokens()
            )));
        }
        weights.validate(&config)?;

        let rope = RoPE::new(config.head_dim(), config.rope_base);
        Ok(Self {
            path: path.into(),
            config,
            vocab,
            weights,
            rope,
        })
    }

    /// Model with seeded random weights sized for `vocab_spec`.
    pub fn random(vocab_spec: VocabSpec, seed: u64) -> ModelResult<Self> {
        let vocab = Vocab::from_spec(vocab_spec)?;
        let config = ModelConfig::tiny(vocab.n_tokens());
        let weights = ModelWeights::random(&config, seed);
        Self::new("<memory>", config, vocab, weights)
    }

    /// Seeded random model over [`demo_vocab_spec`].
    pub fn demo(seed: u64) -> ModelResult<Self> {
        Self::random(demo_vocab_spec(), seed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Vocab {
        &self.vocab
    }

    pub fn weights(&self) -> &ModelWeights {
        &self.weights
    }

    /// Run one token at the cache's next position and commit it.
    ///
    /// Returns the logits for the following position.
    fn forward(&self, token: TokenId, cache: &mut SessionKVCache) -> ModelResult<Vec<f32>> {
        let c = &self.config;
        let d = c.d_model;
        if token < 0 || token as usize >= c.vocab_size {
            return Err(ModelError::InvalidToken {
                token,
                n_vocab: c.vocab_size,
            });
        }

        let t = token as usize;
        let mut x = self.weights.tok_embeddings[t * d..(t + 1) * d].to_vec();
        let pos = cache.seq_len();

        for (i, layer) in self.weights.layers.iter().enumerate() {
            let x_norm = rms_norm(&x, &layer.attn_norm, c.norm_eps)?;
            let mut q = matvec(&x_norm, &layer.wq, d, d)?;
            let mut k = matvec(&x_norm, &layer.wk, d, d)?;
            let v = matvec(&x_norm, &layer.wv, d, d)?;
            self.rope.apply(&mut q, pos)?;
            self.rope.apply(&mut k, pos)?;

            cache.write_pending(i, &k, &v)?;
            let layer_cache = cache.layer(i).ok_or(KVError::LayerOutOfRange {
                index: i,
                n_layers: cache.n_layers(),
            })?;
            let attn = attention(
                &q,
                layer_cache.keys(pos + 1),
                layer_cache.values(pos + 1),
                pos + 1,
                c.n_heads,
                c.head_dim(),
            )?;
            add_in_place(&mut x, &matvec(&attn, &layer.wo, d, d)?);

            let x_norm = rms_norm(&x, &layer.ffn_norm, c.norm_eps)?;
            let mlp = mlp_swiglu(&x_norm, &layer.w_gate, &layer.w_up, &layer.w_down, d, c.d_ff)?;
            add_in_place(&mut x, &mlp);
        }

        cache.advance()?;

        let hidden = rms_norm(&x, &self.weights.norm, c.norm_eps)?;
        matvec(&hidden, &self.weights.output, d, c.vocab_size)
    }
}

impl Model for CpuModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            path: self.path.clone(),
            n_vocab: self.config.vocab_size,
            n_layers: self.config.n_layers,
            max_seq_len: self.config.max_seq_len,
        }
    }

    fn vocab(&self) -> &dyn Vocabulary {
        &self.vocab
    }

    fn create_context(self: Arc<Self>, params: ContextParams) -> Result<Box<dyn DecodeContext>> {
        if params.n_ctx == 0 || params.n_batch == 0 {
            return Err(LlamaError::ContextCreation(format!(
                "n_ctx and n_batch must be non-zero (n_ctx={}, n_batch={})",
                params.n_ctx, params.n_batch
            )));
        }
        if params.n_ctx > self.config.max_seq_len {
            return Err(LlamaError::ContextCreation(format!(
                "n_ctx {} exceeds model max_seq_len {}",
                params.n_ctx, self.config.max_seq_len
            )));
        }

        let cache = SessionKVCache::new(
            self.config.n_layers,
            params.n_ctx,
            self.config.n_heads,
            self.config.head_dim(),
        );
        tracing::debug!(
            n_ctx = params.n_ctx,
            n_batch = params.n_batch,
            kv_bytes = cache.memory_bytes(),
            "created CPU decode context"
        );

        Ok(Box::new(CpuContext {
            model: self,
            params,
            cache,
            logits: Vec::new(),
        }))
    }
}

/// Decode state bound to one [`CpuModel`].
pub struct CpuContext {
    model: Arc<CpuModel>,
    params: ContextParams,
    cache: SessionKVCache,
    logits: Vec<f32>,
}

impl DecodeContext for CpuContext {
    /// Decode `batch` as a unit: on failure no position from it is kept.
    fn decode(&mut self, batch: &[TokenId]) -> Result<()> {
        if batch.is_empty() {
            return Err(LlamaError::Decode("empty batch".into()));
        }
        if batch.len() > self.params.n_batch {
            return Err(LlamaError::Decode(format!(
                "batch of {} tokens exceeds n_batch {}",
                batch.len(),
                self.params.n_batch
            )));
        }
        let start = self.cache.seq_len();
        if start + batch.len() > self.params.n_ctx {
            return Err(LlamaError::Decode(format!(
                "context full: {start} + {} positions exceeds n_ctx {}",
                batch.len(),
                self.params.n_ctx
            )));
        }

        let mut logits = Vec::new();
        for &token in batch {
            match self.model.forward(token, &mut self.cache) {
                Ok(l) => logits = l,
                Err(e) => {
                    self.cache.truncate(start);
                    return Err(LlamaError::Decode(e.to_string()));
                }
            }
        }

        tracing::trace!(n_tokens = batch.len(), n_past = self.cache.seq_len(), "decoded batch");
        self.logits = logits;
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn clear_memory(&mut self) {
        self.cache.clear();
        self.logits.clear();
    }

    fn n_past(&self) -> usize {
        self.cache.seq_len()
    }

    fn params(&self) -> ContextParams {
        self.params
    }
}
