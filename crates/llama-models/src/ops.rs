//! CPU tensor kernels: RMSNorm, RoPE, attention, SwiGLU.
//!
//! Tensors are flat row-major `f32` slices. Weight matrices are stored
//! `[in_dim, out_dim]`.

use crate::{ModelError, ModelResult};

/// Root Mean Square Layer Normalization.
///
/// `y = x / sqrt(mean(x^2) + eps) * weight`
///
/// # References
/// - Zhang & Sennrich (2019): "Root Mean Square Layer Normalization"
pub fn rms_norm(x: &[f32], weight: &[f32], eps: f32) -> ModelResult<Vec<f32>> {
    if x.len() != weight.len() {
        return Err(ModelError::ShapeMismatch {
            what: "rms_norm weight",
            expected: x.len(),
            got: weight.len(),
        });
    }

    let mean_sq: f32 = x.iter().map(|v| v * v).sum::<f32>() / x.len().max(1) as f32;
    let inv_rms = 1.0 / (mean_sq + eps).sqrt();
    Ok(x.iter().zip(weight).map(|(v, w)| v * inv_rms * w).collect())
}

/// Rotary Position Embeddings.
///
/// Rotates each `(x[2i], x[2i+1])` pair of every head by `pos * inv_freq[i]`.
///
/// # References
/// - Su et al. (2021): "RoFormer: Enhanced Transformer with Rotary Position Embedding"
#[derive(Debug, Clone)]
pub struct RoPE {
    pub head_dim: usize,
    /// `1 / base^(2i / head_dim)` for `i in 0..head_dim / 2`
    pub inv_freq: Vec<f32>,
}

impl RoPE {
    pub fn new(head_dim: usize, base: f32) -> Self {
        let inv_freq = (0..head_dim / 2)
            .map(|i| 1.0 / base.powf(2.0 * i as f32 / head_dim as f32))
            .collect();
        Self { head_dim, inv_freq }
    }

    /// Rotate one position's row `[n_heads * head_dim]` in place.
    pub fn apply(&self, row: &mut [f32], pos: usize) -> ModelResult<()> {
        if self.head_dim == 0 || row.len() % self.head_dim != 0 {
            return Err(ModelError::ShapeMismatch {
                what: "rope row",
                expected: self.head_dim,
                got: row.len(),
            });
        }

        for head in row.chunks_exact_mut(self.head_dim) {
            for (i, freq) in self.inv_freq.iter().enumerate() {
                let angle = pos as f32 * freq;
                let (sin, cos) = angle.sin_cos();
                let a = head[2 * i];
                let b = head[2 * i + 1];
                head[2 * i] = a * cos - b * sin;
                head[2 * i + 1] = a * sin + b * cos;
            }
        }
        Ok(())
    }
}

/// `x @ w` where `w` is `[in_dim, out_dim]` row-major.
pub fn matvec(x: &[f32], w: &[f32], in_dim: usize, out_dim: usize) -> ModelResult<Vec<f32>> {
    if x.len() != in_dim || w.len() != in_dim * out_dim {
        return Err(ModelError::ShapeMismatch {
            what: "matvec",
            expected: in_dim * out_dim,
            got: w.len(),
        });
    }

    let mut out = vec![0.0f32; out_dim];
    for (xi, row) in x.iter().zip(w.chunks_exact(out_dim)) {
        for (o, wij) in out.iter_mut().zip(row) {
            *o += xi * wij;
        }
    }
    Ok(out)
}

/// Numerically stable in-place softmax.
pub fn softmax_in_place(x: &mut [f32]) {
    let max = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in x.iter_mut() {
            *v /= sum;
        }
    }
}

/// Causal attention of one query row over `seq_len` cached positions.
///
/// `q` is `[n_heads * head_dim]`; `keys` and `values` are
/// `[seq_len, n_heads * head_dim]`.
pub fn attention(
    q: &[f32],
    keys: &[f32],
    values: &[f32],
    seq_len: usize,
    n_heads: usize,
    head_dim: usize,
) -> ModelResult<Vec<f32>> {
    let row = n_heads * head_dim;
    if q.len() != row || keys.len() != seq_len * row || values.len() != seq_len * row {
        return Err(ModelError::ShapeMismatch {
            what: "attention",
            expected: seq_len * row,
            got: keys.len(),
        });
    }

    let scale = 1.0 / (head_dim as f32).sqrt();
    let mut out = vec![0.0f32; row];
    let mut scores = vec![0.0f32; seq_len];

    for h in 0..n_heads {
        let qh = &q[h * head_dim..(h + 1) * head_dim];
        for (t, score) in scores.iter_mut().enumerate() {
            let kh = &keys[t * row + h * head_dim..t * row + (h + 1) * head_dim];
            *score = qh.iter().zip(kh).map(|(a, b)| a * b).sum::<f32>() * scale;
        }
        softmax_in_place(&mut scores);

        let oh = &mut out[h * head_dim..(h + 1) * head_dim];
        for (t, &p) in scores.iter().enumerate() {
            let vh = &values[t * row + h * head_dim..t * row + (h + 1) * head_dim];
            for (o, v) in oh.iter_mut().zip(vh) {
                *o += p * v;
            }
        }
    }

    Ok(out)
}

fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

/// SwiGLU feed-forward: `(silu(x @ gate) * (x @ up)) @ down`.
pub fn mlp_swiglu(
    x: &[f32],
    w_gate: &[f32],
    w_up: &[f32],
    w_down: &[f32],
    d_model: usize,
    d_ff: usize,
) -> ModelResult<Vec<f32>> {
    let gate = matvec(x, w_gate, d_model, d_ff)?;
    let up = matvec(x, w_up, d_model, d_ff)?;
    let hidden: Vec<f32> = gate.iter().zip(&up).map(|(g, u)| silu(*g) * u).collect();
    matvec(&hidden, w_down, d_ff, d_model)
}

pub fn add_in_place(acc: &mut [f32], x: &[f32]) {
    for (a, b) in acc.iter_mut().zip(x) {
        *a += b;
    }
}
