//! # llama-session
//!
//! A single-model streaming generation session. [`EngineSession`] owns one
//! loaded model and one decode context, serializes requests behind a mutex,
//! and streams each reply to a [`TokenSink`] fragment by fragment.
//!
//! ```no_run
//! use llama_session::{EngineConfig, EngineSession};
//!
//! # fn main() -> llama_engine::Result<()> {
//! let session = EngineSession::new(EngineConfig::default())?;
//! session.initialize_engine("/models", "translator.safetensors")?;
//! session.generate("Hello", &mut |fragment: &str| print!("{fragment}"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Request lifecycle
//! 1. Context memory is cleared (unless `clear_memory_per_request` is off).
//! 2. The prompt template is tokenized and decoded as one batch.
//! 3. Tokens are sampled one at a time; each non-empty piece is emitted
//!    before the token is decoded back into the context.
//! 4. The loop stops on an end-of-generation token, when the token budget is
//!    spent, or when decoding a generated token fails.

pub mod config;
pub mod generate;
pub mod session;
pub mod sink;

pub use config::EngineConfig;
pub use generate::{GenerationReport, StopReason};
pub use session::{EngineSession, SessionStatus, NOT_READY_SENTINEL};
pub use sink::{CallbackError, CallbackHost, CallbackTarget, ChannelSink, TokenSink};
