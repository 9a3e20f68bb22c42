//! # llama-tokenizer
//!
//! Deterministic tokenization for llama-stream.
//!
//! This crate provides:
//! - [`Vocab`]: a byte-level BPE vocabulary with Llama 3 control tokens,
//!   implementing [`llama_engine::Vocabulary`]
//! - [`tokenize`]: the two-phase (size, resize, retry) tokenization bridge
//! - [`PieceBuffer`]: bounded scratch space for rendering token pieces
//! - [`Utf8Stream`]: streaming assembly of piece bytes into valid UTF-8
//! - [`PromptTemplate`]: the Llama 3 instruct chat format

pub mod bridge;
pub mod chat;
pub mod piece;
pub mod stream;
pub mod vocab;

pub use bridge::{tokenize, TOKENIZE_SLACK};
pub use chat::{special_tokens, ChatMessage, PromptTemplate, DEFAULT_SYSTEM_INSTRUCTION};
pub use piece::{Piece, PieceBuffer, PieceOverflow, DEFAULT_PIECE_CAPACITY};
pub use stream::Utf8Stream;
pub use vocab::{Vocab, VocabSpec};

use llama_engine::{LlamaError, TokenId};

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("Invalid token ID: {0}")]
    InvalidToken(TokenId),

    #[error("Token buffer too small after resize: need {required}, have {capacity}")]
    BufferTooSmall { required: usize, capacity: usize },

    #[error("Piece for token {token} needs {required} bytes, capacity is {capacity}")]
    PieceOverflow {
        token: TokenId,
        required: usize,
        capacity: usize,
    },

    #[error("Invalid vocabulary: {0}")]
    InvalidVocab(String),
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;

impl From<TokenizerError> for LlamaError {
    fn from(err: TokenizerError) -> Self {
        LlamaError::Tokenization(err.to_string())
    }
}
