//! Integration tests for llama-engine core traits and types.
//!
//! Validates:
//! - Model / Vocabulary / DecodeContext can be implemented by mock backends
//! - The buffer protocols report required sizes instead of overflowing
//! - Error types display correctly and carry context
//! - Trait objects work for dynamic dispatch (the "narrow waist" pattern)

use llama_engine::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Mock Backend
// ---------------------------------------------------------------------------

/// Character-level vocabulary: token id == char code, 0 is EOS.
struct CharVocab;

impl Vocabulary for CharVocab {
    fn n_tokens(&self) -> usize {
        128
    }

    fn tokenize_into(
        &self,
        text: &str,
        out: &mut [TokenId],
        _add_special: bool,
        _parse_special: bool,
    ) -> TokenizeOutcome {
        let ids: Vec<TokenId> = text.bytes().map(|b| b as TokenId).collect();
        if ids.len() > out.len() {
            return TokenizeOutcome::Insufficient {
                required: ids.len(),
            };
        }
        out[..ids.len()].copy_from_slice(&ids);
        TokenizeOutcome::Written(ids.len())
    }

    fn token_to_piece(&self, token: TokenId, out: &mut [u8], _render_special: bool) -> PieceOutcome {
        if token == 0 {
            return PieceOutcome::Written(0);
        }
        if out.is_empty() {
            return PieceOutcome::Insufficient { required: 1 };
        }
        out[0] = token as u8;
        PieceOutcome::Written(1)
    }

    fn is_eog(&self, token: TokenId) -> bool {
        token == 0
    }

    fn bos(&self) -> Option<TokenId> {
        None
    }
}

struct MockModel {
    vocab: CharVocab,
}

impl Model for MockModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            path: PathBuf::from("/models/mock.safetensors"),
            n_vocab: self.vocab.n_tokens(),
            n_layers: 1,
            max_seq_len: 64,
        }
    }

    fn vocab(&self) -> &dyn Vocabulary {
        &self.vocab
    }

    fn create_context(self: Arc<Self>, params: ContextParams) -> Result<Box<dyn DecodeContext>> {
        if params.n_ctx > 64 {
            return Err(LlamaError::ContextCreation(format!(
                "n_ctx {} exceeds model limit 64",
                params.n_ctx
            )));
        }
        Ok(Box::new(MockContext {
            params,
            n_past: 0,
            logits: vec![0.0; 128],
        }))
    }
}

/// Echoes the last decoded token as the argmax of the next distribution.
struct MockContext {
    params: ContextParams,
    n_past: usize,
    logits: Vec<f32>,
}

impl DecodeContext for MockContext {
    fn decode(&mut self, batch: &[TokenId]) -> Result<()> {
        if batch.is_empty() {
            return Err(LlamaError::Decode("empty batch".into()));
        }
        if batch.len() > self.params.n_batch {
            return Err(LlamaError::Decode("batch too large".into()));
        }
        if self.n_past + batch.len() > self.params.n_ctx {
            return Err(LlamaError::Decode("context full".into()));
        }
        self.n_past += batch.len();
        self.logits.iter_mut().for_each(|l| *l = 0.0);
        let last = batch[batch.len() - 1] as usize;
        self.logits[last] = 1.0;
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn clear_memory(&mut self) {
        self.n_past = 0;
    }

    fn n_past(&self) -> usize {
        self.n_past
    }

    fn params(&self) -> ContextParams {
        self.params
    }
}

struct MockLoader;

impl ModelLoader for MockLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Model>> {
        if path.as_os_str().is_empty() {
            return Err(LlamaError::model_load(path, "empty path"));
        }
        Ok(Arc::new(MockModel { vocab: CharVocab }))
    }
}

// ---------------------------------------------------------------------------
// Trait Implementation Tests
// ---------------------------------------------------------------------------

#[test]
fn loader_returns_shared_model() {
    let model = MockLoader.load(Path::new("/models/mock.safetensors")).unwrap();
    let clone = Arc::clone(&model);
    assert_eq!(model.info(), clone.info());
    assert_eq!(model.vocab().n_tokens(), 128);
}

#[test]
fn loader_empty_path_errors() {
    let err = MockLoader.load(Path::new("")).err().unwrap();
    assert!(matches!(err, LlamaError::ModelLoad { .. }));
}

#[test]
fn tokenize_reports_required_capacity() {
    let vocab = CharVocab;
    let mut small = [0; 2];
    assert_eq!(
        vocab.tokenize_into("hello", &mut small, true, true),
        TokenizeOutcome::Insufficient { required: 5 }
    );

    let mut exact = [0; 5];
    assert_eq!(
        vocab.tokenize_into("hello", &mut exact, true, true),
        TokenizeOutcome::Written(5)
    );
    assert_eq!(exact, [104, 101, 108, 108, 111]);
}

#[test]
fn piece_reports_required_capacity() {
    let vocab = CharVocab;
    let mut empty: [u8; 0] = [];
    assert_eq!(
        vocab.token_to_piece(65, &mut empty, true),
        PieceOutcome::Insufficient { required: 1 }
    );
    let mut buf = [0u8; 4];
    assert_eq!(vocab.token_to_piece(65, &mut buf, true), PieceOutcome::Written(1));
    assert_eq!(buf[0], b'A');
}

#[test]
fn context_creation_failure_is_distinct() {
    let model: Arc<dyn Model> = Arc::new(MockModel { vocab: CharVocab });
    let err = model
        .create_context(ContextParams {
            n_ctx: 1024,
            n_batch: 16,
        })
        .err()
        .unwrap();
    assert!(matches!(err, LlamaError::ContextCreation(_)));
}

#[test]
fn context_decode_and_clear() {
    let model: Arc<dyn Model> = Arc::new(MockModel { vocab: CharVocab });
    let mut ctx = model
        .create_context(ContextParams {
            n_ctx: 8,
            n_batch: 4,
        })
        .unwrap();

    ctx.decode(&[104, 105]).unwrap();
    assert_eq!(ctx.n_past(), 2);
    assert_eq!(ctx.logits()[105], 1.0);

    assert!(ctx.decode(&[1, 2, 3, 4, 5]).is_err(), "batch above n_batch");

    ctx.clear_memory();
    assert_eq!(ctx.n_past(), 0);
}

#[test]
fn context_rejects_overflowing_window() {
    let model: Arc<dyn Model> = Arc::new(MockModel { vocab: CharVocab });
    let mut ctx = model
        .create_context(ContextParams {
            n_ctx: 4,
            n_batch: 4,
        })
        .unwrap();
    ctx.decode(&[1, 2, 3]).unwrap();
    let err = ctx.decode(&[4, 5]).unwrap_err();
    assert!(matches!(err, LlamaError::Decode(_)));
    assert_eq!(ctx.n_past(), 3);
}

// ---------------------------------------------------------------------------
// Error Type Tests
// ---------------------------------------------------------------------------

#[test]
fn error_display_messages() {
    assert_eq!(
        LlamaError::Initialization("no kernels".into()).to_string(),
        "backend initialization failed: no kernels"
    );
    assert_eq!(
        LlamaError::model_load("/m/x.safetensors", "truncated header").to_string(),
        "failed to load model /m/x.safetensors: truncated header"
    );
    assert_eq!(LlamaError::NotReady.to_string(), "engine not ready");
}

#[test]
fn error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<LlamaError>();
}

#[test]
fn trait_objects_are_send() {
    fn assert_send<T: Send + ?Sized>() {}
    assert_send::<dyn DecodeContext>();
    assert_send::<dyn Model>();
}
