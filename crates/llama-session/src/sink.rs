//! Streaming delivery of generated fragments.
//!
//! Provides:
//! - [`TokenSink`]: receives each non-empty fragment, in order, on the
//!   generating thread
//! - [`ChannelSink`]: forwards fragments to another thread
//! - [`CallbackHost`] / [`CallbackTarget`]: an external consumer whose
//!   delivery method is looked up once and cached

use crossbeam_channel::{Receiver, Sender};

/// Consumer of generated text.
///
/// `emit` runs while the session lock is held. A slow sink delays every
/// request queued behind the current one.
pub trait TokenSink {
    fn emit(&mut self, fragment: &str);
}

impl<F> TokenSink for F
where
    F: FnMut(&str),
{
    fn emit(&mut self, fragment: &str) {
        self(fragment)
    }
}

/// Sends each fragment over a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }

    /// Sink backed by a fresh unbounded channel.
    pub fn unbounded() -> (Self, Receiver<String>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    /// Sink backed by a bounded channel. `emit` blocks while it is full.
    pub fn bounded(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self::new(tx), rx)
    }
}

impl TokenSink for ChannelSink {
    fn emit(&mut self, fragment: &str) {
        if self.tx.send(fragment.to_owned()).is_err() {
            tracing::debug!(len = fragment.len(), "fragment receiver dropped");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("callback method '{0}' not found")]
    MethodNotFound(String),

    #[error("callback host unavailable: {0}")]
    HostUnavailable(String),
}

/// An application that accepts fragments through a named method.
pub trait CallbackHost {
    /// Resolved handle to a method.
    type Method;

    fn resolve(&mut self, name: &str) -> Result<Self::Method, CallbackError>;

    fn invoke(&mut self, method: &Self::Method, fragment: &str);
}

/// A [`CallbackHost`] plus the method fragments are delivered to.
///
/// The method is resolved on the first emission and reused for every later
/// fragment and request. If resolution fails the fragment is dropped and
/// resolution is attempted again on the next one.
pub struct CallbackTarget<H: CallbackHost> {
    host: H,
    method_name: String,
    method: Option<H::Method>,
    resolutions: usize,
}

impl<H: CallbackHost> CallbackTarget<H> {
    pub fn new(host: H, method_name: impl Into<String>) -> Self {
        Self {
            host,
            method_name: method_name.into(),
            method: None,
            resolutions: 0,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn is_resolved(&self) -> bool {
        self.method.is_some()
    }

    /// How many times the host was asked to resolve the method.
    pub fn resolutions(&self) -> usize {
        self.resolutions
    }

    pub fn into_host(self) -> H {
        self.host
    }
}

impl<H: CallbackHost> TokenSink for CallbackTarget<H> {
    fn emit(&mut self, fragment: &str) {
        if self.method.is_none() {
            self.resolutions += 1;
            match self.host.resolve(&self.method_name) {
                Ok(method) => self.method = Some(method),
                Err(e) => {
                    tracing::error!(method = %self.method_name, error = %e, "fragment dropped");
                    return;
                }
            }
        }
        if let Some(method) = &self.method {
            self.host.invoke(method, fragment);
        }
    }
}

impl<H: CallbackHost + std::fmt::Debug> std::fmt::Debug for CallbackTarget<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTarget")
            .field("host", &self.host)
            .field("method_name", &self.method_name)
            .field("resolved", &self.method.is_some())
            .field("resolutions", &self.resolutions)
            .finish()
    }
}
