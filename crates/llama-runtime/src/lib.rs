//! # llama-runtime
//!
//! Process-wide backend lifecycle for llama-stream: backend selection, the
//! kernel availability probe, and telemetry hooks (TTFT, tok/s).
//!
//! [`initialize`] brings the runtime up at most once per process. Every
//! later call, from any thread, observes the same outcome; a failed probe
//! stays failed for the life of the process.

pub mod backend;
pub mod telemetry;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use llama_engine::{LlamaError, Result};

pub use backend::{Backend, BackendError, BackendSelector, KernelMatrix, KernelOp};
pub use telemetry::{InferenceMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook};

static RUNTIME: OnceLock<std::result::Result<Runtime, String>> = OnceLock::new();
static INIT_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide runtime state.
#[derive(Debug)]
pub struct Runtime {
    selector: BackendSelector,
    probe_time: Duration,
}

impl Runtime {
    /// Validate `matrix` and select a backend from it.
    pub fn start(matrix: KernelMatrix) -> std::result::Result<Self, BackendError> {
        let started_at = Instant::now();
        let selector = BackendSelector::from_matrix(matrix)?;
        Ok(Self {
            selector,
            probe_time: started_at.elapsed(),
        })
    }

    pub fn backend(&self) -> Backend {
        self.selector.active()
    }

    pub fn kernels(&self) -> &KernelMatrix {
        self.selector.matrix()
    }

    pub fn probe_time(&self) -> Duration {
        self.probe_time
    }
}

/// Bring up the process-wide runtime, or return the one already running.
pub fn initialize() -> Result<&'static Runtime> {
    let outcome = RUNTIME.get_or_init(|| {
        INIT_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
        match Runtime::start(KernelMatrix::probe()) {
            Ok(runtime) => {
                tracing::info!(
                    backend = %runtime.backend(),
                    kernels = runtime.kernels().supported_ops(runtime.backend()).len(),
                    probe_us = runtime.probe_time().as_micros() as u64,
                    "runtime initialized"
                );
                Ok(runtime)
            }
            Err(e) => {
                tracing::error!(error = %e, "runtime initialization failed");
                Err(e.to_string())
            }
        }
    });

    match outcome {
        Ok(runtime) => Ok(runtime),
        Err(reason) => Err(LlamaError::Initialization(reason.clone())),
    }
}

/// The runtime, if [`initialize`] has already succeeded.
pub fn runtime() -> Option<&'static Runtime> {
    RUNTIME.get().and_then(|r| r.as_ref().ok())
}

/// How many times the one-time initialization actually ran (0 or 1).
pub fn init_attempts() -> usize {
    INIT_ATTEMPTS.load(Ordering::SeqCst)
}
