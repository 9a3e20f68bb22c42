//! The decode → sample → render → emit loop.

use std::fmt;

use llama_engine::{DecodeContext, LlamaError, Model, Result};
use llama_runtime::{InferenceMetrics, InferenceTimer};
use llama_sampling::Sampler;
use llama_tokenizer::{tokenize, PieceBuffer, Utf8Stream};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::sink::TokenSink;

/// Why a request stopped producing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model sampled an end-of-generation token.
    EndOfGeneration,
    /// The token budget (`max_tokens`, or what remains of the context
    /// window) was used up.
    MaxTokens,
    /// Decoding a sampled token, or sampling from the logits it produced,
    /// failed. Fragments already emitted stand.
    DecodeError,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfGeneration => write!(f, "end_of_generation"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::DecodeError => write!(f, "decode_error"),
        }
    }
}

/// Outcome of one completed request.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub request_id: Uuid,
    pub stop: StopReason,
    pub prompt_tokens: usize,
    /// Tokens sampled and emitted, not counting the end-of-generation token.
    pub generated_tokens: usize,
    /// Sink invocations.
    pub fragments: usize,
    pub truncated_pieces: usize,
    pub rejected_pieces: usize,
    /// Bytes of incomplete characters that were never emitted: a trailing
    /// partial character, or the cut tail of a truncated piece.
    pub dropped_bytes: usize,
    pub metrics: InferenceMetrics,
}

/// Run one request against `ctx`.
///
/// The caller holds exclusive access to `ctx` for the whole call.
pub(crate) fn run(
    model: &dyn Model,
    ctx: &mut dyn DecodeContext,
    config: &EngineConfig,
    user_text: &str,
    sink: &mut dyn TokenSink,
    mut timer: InferenceTimer,
    request_id: Uuid,
) -> Result<GenerationReport> {
    let vocab = model.vocab();
    let n_ctx = ctx.params().n_ctx;

    if config.clear_memory_per_request {
        ctx.clear_memory();
    }

    let prompt = config.template().format(user_text);
    let tokens = tokenize(vocab, &prompt, true, true).map_err(|e| {
        tracing::error!(prompt_bytes = prompt.len(), error = %e, "prompt tokenization failed");
        LlamaError::from(e)
    })?;
    timer.set_prompt_tokens(tokens.len());

    if !config.clear_memory_per_request && ctx.n_past() + tokens.len() > n_ctx {
        tracing::info!(
            n_past = ctx.n_past(),
            prompt_tokens = tokens.len(),
            n_ctx,
            "context memory full, clearing"
        );
        ctx.clear_memory();
    }

    if let Err(e) = ctx.decode(&tokens) {
        tracing::error!(prompt_tokens = tokens.len(), n_ctx, error = %e, "prompt decode failed");
        return Err(e);
    }
    timer.mark_prefill_complete();

    let budget = config.max_tokens.min(n_ctx.saturating_sub(ctx.n_past()));
    let mut sampler = Sampler::from_config(&config.sampling);
    let mut pieces = PieceBuffer::new(config.piece_capacity, config.piece_overflow);
    let mut utf8 = Utf8Stream::new();

    let mut generated = 0usize;
    let mut fragments = 0usize;
    let mut truncated_pieces = 0usize;
    let mut rejected_pieces = 0usize;
    let mut dropped_bytes = 0usize;

    let stop = loop {
        let token = match sampler.sample_checked(ctx.logits(), vocab.n_tokens()) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(generated, n_past = ctx.n_past(), error = %e, "sampling failed");
                break StopReason::DecodeError;
            }
        };

        if vocab.is_eog(token) {
            break StopReason::EndOfGeneration;
        }
        if generated >= budget {
            break StopReason::MaxTokens;
        }

        match pieces.render(vocab, token, config.render_special) {
            Ok(piece) => {
                if piece.truncated {
                    truncated_pieces += 1;
                }
                let text = utf8.push(piece.bytes);
                if !text.is_empty() {
                    sink.emit(&text);
                    fragments += 1;
                }
                // A cut piece never completes its last character.
                if piece.truncated {
                    dropped_bytes += utf8.finish();
                }
            }
            Err(e) => {
                tracing::warn!(token, error = %e, "token piece rejected");
                rejected_pieces += 1;
            }
        }
        generated += 1;
        timer.mark_token();

        if let Err(e) = ctx.decode(&[token]) {
            tracing::warn!(token, generated, n_past = ctx.n_past(), error = %e, "token decode failed");
            break StopReason::DecodeError;
        }
    };

    let tail = utf8.finish();
    if tail > 0 {
        tracing::debug!(dropped_bytes = tail, "incomplete character at end of stream");
    }
    dropped_bytes += tail;

    let prompt_tokens = tokens.len();
    let metrics = timer.finish();
    tracing::info!(prompt_tokens, generated, fragments, stop = ?stop, "request finished");

    Ok(GenerationReport {
        request_id,
        stop,
        prompt_tokens,
        generated_tokens: generated,
        fragments,
        truncated_pieces,
        rejected_pieces,
        dropped_bytes,
        metrics,
    })
}
