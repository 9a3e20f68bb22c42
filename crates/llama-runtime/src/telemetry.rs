//! Telemetry hooks for generation performance.
//!
//! Provides:
//! - [`InferenceMetrics`]: TTFT, tokens/sec, and token counts for one request
//! - [`TelemetryHook`]: callback interface for metric events
//! - [`InferenceTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`]: built-in hooks

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::backend::Backend;

/// Aggregate metrics from one generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceMetrics {
    pub backend: Backend,
    /// Time from request start until the prompt was decoded, in milliseconds.
    pub ttft_ms: f64,
    /// Decode throughput, excluding the prompt.
    pub tokens_per_sec: f64,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub total_time_ms: f64,
}

/// Receives events during generation. Every method defaults to a no-op.
pub trait TelemetryHook: Send + Sync {
    fn on_prefill_complete(&self, _ttft_ms: f64) {}

    fn on_token_generated(&self, _token_idx: usize, _elapsed_ms: f64) {}

    fn on_generation_complete(&self, _metrics: &InferenceMetrics) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Logs each completed request and keeps the latest metrics.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<InferenceMetrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics of the last completed request.
    pub fn last_metrics(&self) -> Option<InferenceMetrics> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_prefill_complete(&self, ttft_ms: f64) {
        tracing::debug!(ttft_ms, "prompt decoded");
    }

    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        tracing::info!(
            backend = %metrics.backend,
            ttft_ms = metrics.ttft_ms,
            tokens_per_sec = metrics.tokens_per_sec,
            prompt_tokens = metrics.prompt_tokens,
            generated_tokens = metrics.generated_tokens,
            total_time_ms = metrics.total_time_ms,
            "generation complete"
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(metrics.clone());
    }
}

/// Records timestamps during one request to compute [`InferenceMetrics`].
///
/// Usage:
/// 1. [`InferenceTimer::new`] at request start
/// 2. [`InferenceTimer::mark_prefill_complete`] after the prompt is decoded
/// 3. [`InferenceTimer::mark_token`] after each emitted token
/// 4. [`InferenceTimer::finish`] to compute the metrics
pub struct InferenceTimer {
    backend: Backend,
    prompt_tokens: usize,
    start: Instant,
    prefill_end: Option<Instant>,
    token_count: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl InferenceTimer {
    pub fn new(backend: Backend, prompt_tokens: usize, hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            backend,
            prompt_tokens,
            start: Instant::now(),
            prefill_end: None,
            token_count: 0,
            hook,
        }
    }

    /// Fix the prompt length once it is known.
    pub fn set_prompt_tokens(&mut self, prompt_tokens: usize) {
        self.prompt_tokens = prompt_tokens;
    }

    pub fn mark_prefill_complete(&mut self) {
        let now = Instant::now();
        self.prefill_end = Some(now);
        let ttft_ms = now.duration_since(self.start).as_secs_f64() * 1000.0;
        self.hook.on_prefill_complete(ttft_ms);
    }

    pub fn mark_token(&mut self) {
        self.token_count += 1;
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.hook.on_token_generated(self.token_count, elapsed_ms);
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn finish(self) -> InferenceMetrics {
        let total_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        let ttft_ms = self
            .prefill_end
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_time_ms = total_time_ms - ttft_ms;
        let tokens_per_sec = if decode_time_ms > 0.0 && self.token_count > 0 {
            self.token_count as f64 / (decode_time_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = InferenceMetrics {
            backend: self.backend,
            ttft_ms,
            tokens_per_sec,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_count,
            total_time_ms,
        };

        self.hook.on_generation_complete(&metrics);
        metrics
    }
}
