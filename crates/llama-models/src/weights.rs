//! Named transformer weights.
//!
//! Tensor names and shapes (`d` = `d_model`):
//!
//! | name                     | shape          |
//! |--------------------------|----------------|
//! | `tok_embeddings`         | `[vocab, d]`   |
//! | `layers.{i}.attn_norm`   | `[d]`          |
//! | `layers.{i}.wq/wk/wv/wo` | `[d, d]`       |
//! | `layers.{i}.ffn_norm`    | `[d]`          |
//! | `layers.{i}.w_gate/w_up` | `[d, d_ff]`    |
//! | `layers.{i}.w_down`      | `[d_ff, d]`    |
//! | `norm`                   | `[d]`          |
//! | `output`                 | `[d, vocab]`   |

use llama_sampling::SeededRng;

use crate::config::ModelConfig;
use crate::safetensors::{element_count, SafetensorsWriter, TensorStore};
use crate::{ModelError, ModelResult};

/// Small uniform weights in `[-0.1, 0.1)`.
fn fill(rng: &mut SeededRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| (rng.next_f32() - 0.5) * 0.2).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerWeights {
    pub attn_norm: Vec<f32>,
    pub wq: Vec<f32>,
    pub wk: Vec<f32>,
    pub wv: Vec<f32>,
    pub wo: Vec<f32>,
    pub ffn_norm: Vec<f32>,
    pub w_gate: Vec<f32>,
    pub w_up: Vec<f32>,
    pub w_down: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelWeights {
    pub tok_embeddings: Vec<f32>,
    pub layers: Vec<LayerWeights>,
    pub norm: Vec<f32>,
    pub output: Vec<f32>,
}

/// `(name, shape)` for every tensor of a model with `config`, in file order.
pub fn tensor_layout(config: &ModelConfig) -> Vec<(String, Vec<usize>)> {
    let d = config.d_model;
    let ff = config.d_ff;
    let v = config.vocab_size;

    let mut layout = vec![("tok_embeddings".to_string(), vec![v, d])];
    for i in 0..config.n_layers {
        let p = format!("layers.{i}");
        layout.extend([
            (format!("{p}.attn_norm"), vec![d]),
            (format!("{p}.wq"), vec![d, d]),
            (format!("{p}.wk"), vec![d, d]),
            (format!("{p}.wv"), vec![d, d]),
            (format!("{p}.wo"), vec![d, d]),
            (format!("{p}.ffn_norm"), vec![d]),
            (format!("{p}.w_gate"), vec![d, ff]),
            (format!("{p}.w_up"), vec![d, ff]),
            (format!("{p}.w_down"), vec![ff, d]),
        ]);
    }
    layout.push(("norm".to_string(), vec![d]));
    layout.push(("output".to_string(), vec![d, v]));
    layout
}

impl ModelWeights {
    /// Deterministic random weights; norms start at one.
    pub fn random(config: &ModelConfig, seed: u64) -> Self {
        let mut rng = SeededRng::new(seed);
        let d = config.d_model;
        let ff = config.d_ff;
        let v = config.vocab_size;

        let tok_embeddings = fill(&mut rng, v * d);
        let layers = (0..config.n_layers)
            .map(|_| LayerWeights {
                attn_norm: vec![1.0; d],
                wq: fill(&mut rng, d * d),
                wk: fill(&mut rng, d * d),
                wv: fill(&mut rng, d * d),
                wo: fill(&mut rng, d * d),
                ffn_norm: vec![1.0; d],
                w_gate: fill(&mut rng, d * ff),
                w_up: fill(&mut rng, d * ff),
                w_down: fill(&mut rng, ff * d),
            })
            .collect();

        Self {
            tok_embeddings,
            layers,
            norm: vec![1.0; d],
            output: fill(&mut rng, d * v),
        }
    }

    /// Pull every tensor named by [`tensor_layout`] out of `store`.
    pub fn from_store(store: &mut TensorStore, config: &ModelConfig) -> ModelResult<Self> {
        let d = config.d_model;
        let ff = config.d_ff;
        let v = config.vocab_size;

        let tok_embeddings = store.take("tok_embeddings", &[v, d])?;
        // Grows only as tensors are found; `n_layers` comes from the file.
        let mut layers = Vec::new();
        for i in 0..config.n_layers {
            let p = format!("layers.{i}");
            layers.push(LayerWeights {
                attn_norm: store.take(&format!("{p}.attn_norm"), &[d])?,
                wq: store.take(&format!("{p}.wq"), &[d, d])?,
                wk: store.take(&format!("{p}.wk"), &[d, d])?,
                wv: store.take(&format!("{p}.wv"), &[d, d])?,
                wo: store.take(&format!("{p}.wo"), &[d, d])?,
                ffn_norm: store.take(&format!("{p}.ffn_norm"), &[d])?,
                w_gate: store.take(&format!("{p}.w_gate"), &[d, ff])?,
                w_up: store.take(&format!("{p}.w_up"), &[d, ff])?,
                w_down: store.take(&format!("{p}.w_down"), &[ff, d])?,
            });
        }
        let norm = store.take("norm", &[d])?;
        let output = store.take("output", &[d, v])?;

        if !store.is_empty() {
            tracing::debug!(unused = store.len(), "ignoring extra tensors in model file");
        }

        Ok(Self {
            tok_embeddings,
            layers,
            norm,
            output,
        })
    }

    /// Tensor data in [`tensor_layout`] order.
    fn tensors(&self) -> Vec<&[f32]> {
        let mut out: Vec<&[f32]> = vec![self.tok_embeddings.as_slice()];
        for l in &self.layers {
            out.extend([
                l.attn_norm.as_slice(),
                l.wq.as_slice(),
                l.wk.as_slice(),
                l.wv.as_slice(),
                l.wo.as_slice(),
                l.ffn_norm.as_slice(),
                l.w_gate.as_slice(),
                l.w_up.as_slice(),
                l.w_down.as_slice(),
            ]);
        }
        out.push(&self.norm);
        out.push(&self.output);
        out
    }

    /// Check every tensor against the shapes `config` implies.
    pub fn validate(&self, config: &ModelConfig) -> ModelResult<()> {
        if config.n_layers != self.layers.len() {
            return Err(ModelError::InvalidConfig(format!(
                "expected {} layers, weights have {}",
                config.n_layers,
                self.layers.len()
            )));
        }
        for ((name, shape), data) in tensor_layout(config).iter().zip(self.tensors()) {
            if element_count(shape) != Some(data.len()) {
                return Err(ModelError::TensorShape {
                    name: name.clone(),
                    expected: shape.clone(),
                    got: vec![data.len()],
                });
            }
        }
        Ok(())
    }

    pub fn write_into(&self, config: &ModelConfig, writer: &mut SafetensorsWriter) -> ModelResult<()> {
        self.validate(config)?;
        for ((name, shape), data) in tensor_layout(config).into_iter().zip(self.tensors()) {
            writer.add_tensor(name, &shape, data)?;
        }
        Ok(())
    }

    pub fn n_params(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }
}
