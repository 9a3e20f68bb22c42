//! Reading and writing complete models.
//!
//! A model file is a safetensors container whose `__metadata__` holds
//! `format = "llama-stream"`, the JSON [`ModelConfig`] under `config`, and the
//! JSON [`VocabSpec`] under `vocab`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use llama_engine::{LlamaError, Model, ModelLoader, Result};
use llama_tokenizer::{Vocab, VocabSpec};

use crate::config::ModelConfig;
use crate::cpu::CpuModel;
use crate::safetensors::{SafetensorsWriter, TensorStore, FORMAT};
use crate::weights::ModelWeights;
use crate::{ModelError, ModelResult};

/// Loads [`CpuModel`]s from safetensors files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileModelLoader;

impl ModelLoader for FileModelLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Model>> {
        let model: Arc<dyn Model> = load_model(path)?;
        Ok(model)
    }
}

/// Load a model, reporting any failure as [`LlamaError::ModelLoad`].
pub fn load_model(path: &Path) -> Result<Arc<CpuModel>> {
    let started = Instant::now();
    let model = read_model(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "model load failed");
        LlamaError::model_load(path, e)
    })?;

    tracing::info!(
        path = %path.display(),
        n_layers = model.config().n_layers,
        d_model = model.config().d_model,
        n_vocab = model.config().vocab_size,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "model loaded"
    );
    Ok(Arc::new(model))
}

fn read_model(path: &Path) -> ModelResult<CpuModel> {
    let mut store = TensorStore::open(path)?;

    match store.metadata("format") {
        Some(FORMAT) => {}
        other => {
            return Err(ModelError::InvalidHeader(format!(
                "expected format \"{FORMAT}\", found {other:?}"
            )))
        }
    }

    let config: ModelConfig = parse_metadata(&store, "config")?;
    let spec: VocabSpec = parse_metadata(&store, "vocab")?;
    let vocab = Vocab::from_spec(spec)?;
    config.validate()?;
    let weights = ModelWeights::from_store(&mut store, &config)?;

    CpuModel::new(path, config, vocab, weights)
}

fn parse_metadata<T: serde::de::DeserializeOwned>(store: &TensorStore, key: &str) -> ModelResult<T> {
    let raw = store
        .metadata(key)
        .ok_or_else(|| ModelError::InvalidHeader(format!("missing metadata '{key}'")))?;
    serde_json::from_str(raw)
        .map_err(|e| ModelError::InvalidHeader(format!("malformed metadata '{key}': {e}")))
}

/// Write `model` to `path` in the format [`load_model`] reads.
pub fn save_model(path: &Path, model: &CpuModel) -> ModelResult<()> {
    let config_json = serde_json::to_string(model.config())
        .map_err(|e| ModelError::InvalidConfig(e.to_string()))?;
    let vocab_json = serde_json::to_string(model.tokenizer().spec())
        .map_err(|e| ModelError::InvalidConfig(e.to_string()))?;

    let mut writer = SafetensorsWriter::new();
    writer.set_metadata("format", FORMAT);
    writer.set_metadata("config", config_json);
    writer.set_metadata("vocab", vocab_json);
    model.weights().write_into(model.config(), &mut writer)?;
    writer.write(path)?;

    tracing::info!(
        path = %path.display(),
        n_params = model.weights().n_params(),
        "model saved"
    );
    Ok(())
}
