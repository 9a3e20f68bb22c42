//! Two-phase tokenization over a [`Vocabulary`].
//!
//! Byte length is not an upper bound on token count (control tokens, BOS),
//! so the first pass uses a generous buffer and, when the vocabulary reports
//! the exact requirement, a second pass retries with a buffer of that size.

use llama_engine::{TokenId, TokenizeOutcome, Vocabulary};

use crate::{TokenizerError, TokenizerResult};

/// Slack added to the byte length for the first-pass buffer.
pub const TOKENIZE_SLACK: usize = 16;

/// Tokenize `text`, growing the buffer at most once.
pub fn tokenize(
    vocab: &dyn Vocabulary,
    text: &str,
    add_special: bool,
    parse_special: bool,
) -> TokenizerResult<Vec<TokenId>> {
    let mut tokens: Vec<TokenId> = vec![0; text.len() + TOKENIZE_SLACK];

    let written = match vocab.tokenize_into(text, &mut tokens, add_special, parse_special) {
        TokenizeOutcome::Written(n) => n,
        TokenizeOutcome::Insufficient { required } => {
            tracing::debug!(
                initial = tokens.len(),
                required,
                "token buffer too small, retrying"
            );
            tokens.resize(required, 0);
            match vocab.tokenize_into(text, &mut tokens, add_special, parse_special) {
                TokenizeOutcome::Written(n) => n,
                TokenizeOutcome::Insufficient { required } => {
                    return Err(TokenizerError::BufferTooSmall {
                        required,
                        capacity: tokens.len(),
                    });
                }
            }
        }
    };

    tokens.truncate(written);
    Ok(tokens)
}
