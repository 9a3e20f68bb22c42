//! # llama-sampling
//!
//! Token selection for llama-stream.
//!
//! Supports:
//! - Greedy (argmax), the default: temperature `<= 0`
//! - Temperature scaling
//! - Top-k filtering
//! - Top-p (nucleus) filtering
//! - Deterministic seeded RNG for reproducible generation
//!
//! A [`Sampler`] is built per request from a [`SamplingConfig`], so two
//! requests with the same config and logits pick the same tokens.

use llama_engine::{LlamaError, TokenId};
use serde::{Deserialize, Serialize};

/// Sampling error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplingError {
    #[error("Invalid logits array")]
    InvalidLogits,

    #[error("Logits length {got} does not match vocabulary size {expected}")]
    VocabMismatch { expected: usize, got: usize },

    #[error("No valid tokens after filtering")]
    NoValidTokens,
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

impl From<SamplingError> for LlamaError {
    fn from(err: SamplingError) -> Self {
        LlamaError::Decode(format!("sampling: {err}"))
    }
}

/// Deterministic RNG for reproducible sampling (xorshift64).
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

fn default_seed() -> u64 {
    42
}

/// Serializable sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// `<= 0` selects greedy decoding.
    #[serde(default)]
    pub temperature: f32,

    #[serde(default)]
    pub top_k: Option<usize>,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl SamplingConfig {
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            top_k: None,
            top_p: None,
            seed: default_seed(),
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.temperature.is_finite() {
            return Err(format!("temperature must be finite, got {}", self.temperature));
        }
        if self.top_k == Some(0) {
            return Err("top_k must be at least 1".into());
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(format!("top_p must be in (0, 1], got {p}"));
            }
        }
        Ok(())
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self::greedy()
    }
}

/// Per-request sampler.
#[derive(Debug, Clone)]
pub struct Sampler {
    pub temperature: f32,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
    rng: SeededRng,
}

impl Sampler {
    /// Greedy sampler.
    pub fn new() -> Self {
        Self::from_config(&SamplingConfig::greedy())
    }

    pub fn from_config(config: &SamplingConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            rng: SeededRng::new(config.seed),
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SeededRng::new(seed);
        self
    }

    /// Pick a token id from `logits`.
    ///
    /// NaN logits are rejected; infinite ones are allowed.
    pub fn sample(&mut self, logits: &[f32]) -> SamplingResult<TokenId> {
        if logits.is_empty() || logits.iter().any(|l| l.is_nan()) {
            return Err(SamplingError::InvalidLogits);
        }

        let index = if self.temperature <= 0.0 {
            argmax(logits)
        } else {
            self.sample_stochastic(logits)?
        };
        Ok(index as TokenId)
    }

    /// Like [`Sampler::sample`], but checks the logits cover exactly `n_vocab` entries.
    pub fn sample_checked(&mut self, logits: &[f32], n_vocab: usize) -> SamplingResult<TokenId> {
        if logits.len() != n_vocab {
            return Err(SamplingError::VocabMismatch {
                expected: n_vocab,
                got: logits.len(),
            });
        }
        self.sample(logits)
    }

    fn sample_stochastic(&mut self, logits: &[f32]) -> SamplingResult<usize> {
        let mut work: Vec<f32> = logits.iter().map(|l| l / self.temperature).collect();

        if let Some(k) = self.top_k {
            apply_top_k(&mut work, k);
        }

        let mut probs = softmax(&work);
        if let Some(p) = self.top_p {
            probs = apply_top_p(&probs, p);
        }

        self.sample_from_distribution(&probs)
    }

    fn sample_from_distribution(&mut self, probs: &[f32]) -> SamplingResult<usize> {
        let r = self.rng.next_f32();
        let mut cumsum = 0.0;

        for (i, &prob) in probs.iter().enumerate() {
            cumsum += prob;
            if r < cumsum {
                return Ok(i);
            }
        }

        // Rounding left r above the total; take the last live token.
        probs
            .iter()
            .rposition(|&p| p > 0.0)
            .ok_or(SamplingError::NoValidTokens)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the largest logit; the lowest index wins ties.
pub fn argmax(logits: &[f32]) -> usize {
    let mut best = 0;
    for (i, &l) in logits.iter().enumerate().skip(1) {
        if l > logits[best] {
            best = i;
        }
    }
    best
}

fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }

    let mut sorted = logits.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for logit in logits.iter_mut() {
        if *logit < threshold {
            *logit = f32::NEG_INFINITY;
        }
    }
}

fn apply_top_p(probs: &[f32], p: f32) -> Vec<f32> {
    let mut sorted = probs.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumsum = 0.0;
    let mut cutoff = sorted.first().copied().unwrap_or(0.0);
    for prob in sorted {
        cumsum += prob;
        cutoff = prob;
        if cumsum >= p {
            break;
        }
    }

    let mut result: Vec<f32> = probs
        .iter()
        .map(|&pr| if pr >= cutoff { pr } else { 0.0 })
        .collect();

    let sum: f32 = result.iter().sum();
    if sum > 0.0 {
        for pr in &mut result {
            *pr /= sum;
        }
    }
    result
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if max_logit == f32::INFINITY {
        // Every +inf entry shares the mass.
        let n = logits.iter().filter(|l| **l == f32::INFINITY).count() as f32;
        return logits
            .iter()
            .map(|&l| if l == f32::INFINITY { 1.0 / n } else { 0.0 })
            .collect();
    }

    let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();

    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}
