//! Bounded scratch buffer for token pieces.

use llama_engine::{PieceOutcome, TokenId, Vocabulary};
use serde::{Deserialize, Serialize};

use crate::{TokenizerError, TokenizerResult};

/// Default piece capacity in bytes.
pub const DEFAULT_PIECE_CAPACITY: usize = 128;

/// What to do with a piece longer than the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceOverflow {
    /// Keep the first `capacity` bytes and flag the piece as truncated.
    #[default]
    Truncate,
    /// Refuse the piece with [`TokenizerError::PieceOverflow`].
    Reject,
}

/// A rendered piece borrowed from a [`PieceBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece<'a> {
    pub bytes: &'a [u8],
    pub truncated: bool,
}

impl Piece<'_> {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Fixed-capacity buffer reused for every piece of a generation.
#[derive(Debug, Clone)]
pub struct PieceBuffer {
    buf: Vec<u8>,
    policy: PieceOverflow,
}

impl PieceBuffer {
    pub fn new(capacity: usize, policy: PieceOverflow) -> Self {
        Self {
            buf: vec![0; capacity],
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Render `token` through `vocab`. The result never exceeds `capacity()`.
    pub fn render(
        &mut self,
        vocab: &dyn Vocabulary,
        token: TokenId,
        render_special: bool,
    ) -> TokenizerResult<Piece<'_>> {
        let capacity = self.buf.len();
        match vocab.token_to_piece(token, &mut self.buf, render_special) {
            PieceOutcome::Written(n) => Ok(Piece {
                bytes: &self.buf[..n.min(capacity)],
                truncated: false,
            }),
            PieceOutcome::Insufficient { required } => {
                let overflow = TokenizerError::PieceOverflow {
                    token,
                    required,
                    capacity,
                };
                if self.policy == PieceOverflow::Reject {
                    return Err(overflow);
                }

                let mut scratch = vec![0u8; required];
                match vocab.token_to_piece(token, &mut scratch, render_special) {
                    PieceOutcome::Written(n) => {
                        let keep = n.min(capacity);
                        self.buf[..keep].copy_from_slice(&scratch[..keep]);
                        tracing::warn!(token, required = n, capacity, "token piece truncated");
                        Ok(Piece {
                            bytes: &self.buf[..keep],
                            truncated: n > capacity,
                        })
                    }
                    PieceOutcome::Insufficient { .. } => Err(overflow),
                }
            }
        }
    }
}

impl Default for PieceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PIECE_CAPACITY, PieceOverflow::default())
    }
}
