//! The engine session: one model, one decode context, one lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use llama_engine::{DecodeContext, LlamaError, Model, ModelInfo, ModelLoader, Result};
use llama_models::FileModelLoader;
use llama_runtime::{Backend, InferenceTimer, NoopTelemetry, TelemetryHook};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::generate::{self, GenerationReport};
use crate::sink::TokenSink;

/// Fragment sent instead of output when no model is loaded.
pub const NOT_READY_SENTINEL: &str = "[LLaMA not loaded]";

/// Observable lifecycle state of an [`EngineSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Ready,
    /// The last initialization attempt failed.
    Failed(LlamaError),
}

struct Loaded {
    model: Arc<dyn Model>,
    context: Box<dyn DecodeContext>,
    backend: Backend,
    path: PathBuf,
}

enum SessionState {
    Uninitialized,
    Ready(Loaded),
    Failed(LlamaError),
}

/// A single-model generation session.
///
/// Requests are serialized: [`EngineSession::generate`] holds the session
/// lock for the entire generation, sink callbacks included.
pub struct EngineSession {
    config: EngineConfig,
    loader: Arc<dyn ModelLoader>,
    telemetry: Arc<dyn TelemetryHook>,
    state: Mutex<SessionState>,
}

impl EngineSession {
    /// Session that loads model files with [`FileModelLoader`].
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_loader(config, Arc::new(FileModelLoader))
    }

    pub fn with_loader(config: EngineConfig, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loader,
            telemetry: Arc::new(NoopTelemetry),
            state: Mutex::new(SessionState::Uninitialized),
        })
    }

    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load `model_filename` from `models_dir`.
    pub fn initialize_engine(&self, models_dir: impl AsRef<Path>, model_filename: &str) -> Result<()> {
        self.initialize(&models_dir.as_ref().join(model_filename))
    }

    /// Bring up the runtime, load the model at `path` and create the decode
    /// context.
    ///
    /// On success the session is ready, replacing any model loaded before.
    /// On failure the session moves to the failed state and the error is
    /// returned; a later call may retry.
    pub fn initialize(&self, path: &Path) -> Result<()> {
        let mut state = self.lock_state();
        match Self::load(&*self.loader, &self.config, path) {
            Ok(loaded) => {
                if let SessionState::Ready(previous) = &*state {
                    tracing::warn!(
                        previous = %previous.path.display(),
                        path = %path.display(),
                        "replacing loaded model"
                    );
                }
                tracing::info!(
                    path = %path.display(),
                    backend = %loaded.backend,
                    n_ctx = self.config.n_ctx,
                    n_batch = self.config.n_batch,
                    "engine ready"
                );
                *state = SessionState::Ready(loaded);
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "engine initialization failed");
                *state = SessionState::Failed(e.clone());
                Err(e)
            }
        }
    }

    fn load(loader: &dyn ModelLoader, config: &EngineConfig, path: &Path) -> Result<Loaded> {
        let runtime = llama_runtime::initialize()?;
        let model = loader.load(path)?;
        let context = Arc::clone(&model).create_context(config.context_params())?;
        Ok(Loaded {
            model,
            context,
            backend: runtime.backend(),
            path: path.to_path_buf(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        match &*self.lock_state() {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Ready(_) => SessionStatus::Ready,
            SessionState::Failed(e) => SessionStatus::Failed(e.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.lock_state(), SessionState::Ready(_))
    }

    /// Info for the loaded model, if any.
    pub fn model_info(&self) -> Option<ModelInfo> {
        match &*self.lock_state() {
            SessionState::Ready(loaded) => Some(loaded.model.info()),
            _ => None,
        }
    }

    /// Generate a reply to `text`, streaming fragments into `sink`.
    ///
    /// Without a loaded model, exactly one [`NOT_READY_SENTINEL`] fragment is
    /// emitted and [`LlamaError::NotReady`] returned. A failure decoding the
    /// prompt returns an error before anything is emitted. A failure decoding
    /// a generated token, or sampling from its logits, ends the request
    /// normally with [`crate::StopReason::DecodeError`].
    pub fn generate(&self, text: &str, sink: &mut dyn TokenSink) -> Result<GenerationReport> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("generate", request_id = %request_id);
        let _enter = span.enter();

        let mut state = self.lock_state();
        let loaded = match &mut *state {
            SessionState::Ready(loaded) => loaded,
            SessionState::Uninitialized => {
                tracing::warn!("generate called before initialization");
                sink.emit(NOT_READY_SENTINEL);
                return Err(LlamaError::NotReady);
            }
            SessionState::Failed(reason) => {
                tracing::warn!(reason = %reason, "generate called after failed initialization");
                sink.emit(NOT_READY_SENTINEL);
                return Err(LlamaError::NotReady);
            }
        };

        tracing::debug!(text_bytes = text.len(), path = %loaded.path.display(), "request started");
        let timer = InferenceTimer::new(loaded.backend, 0, Arc::clone(&self.telemetry));
        generate::run(
            &*loaded.model,
            &mut *loaded.context,
            &self.config,
            text,
            sink,
            timer,
            request_id,
        )
    }

    /// Collect a whole reply into one string.
    pub fn generate_to_string(&self, text: &str) -> Result<(String, GenerationReport)> {
        let mut out = String::new();
        let report = self.generate(text, &mut |fragment: &str| out.push_str(fragment))?;
        Ok((out, report))
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("session lock poisoned by a panicked request, recovering");
            poisoned.into_inner()
        })
    }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
