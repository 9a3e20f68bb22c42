//! # llama-cli
//!
//! Command-line front end: stream a reply from a model file to stdout, or
//! write the deterministic demo model used for smoke tests.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use llama_engine::LlamaError;
use llama_models::{save_model, CpuModel, ModelError};
use llama_session::{EngineConfig, EngineSession, GenerationReport, TokenSink};

/// Errors surfaced by CLI commands.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] LlamaError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

/// Arguments of the `generate` command.
#[derive(Debug, Clone)]
pub struct GenerateArgs {
    pub models_dir: PathBuf,
    pub model: String,
    pub text: String,
    pub config: Option<PathBuf>,
    pub max_tokens: Option<usize>,
}

/// Writes each fragment to `W` and flushes immediately.
///
/// The first write error is kept and later fragments are discarded.
pub struct WriterSink<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    pub fn finish(self) -> io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.out),
        }
    }
}

impl<W: Write> TokenSink for WriterSink<W> {
    fn emit(&mut self, fragment: &str) {
        if self.error.is_some() {
            return;
        }
        let written = self
            .out
            .write_all(fragment.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            tracing::error!(error = %e, "failed to write fragment");
            self.error = Some(e);
        }
    }
}

/// Resolve the engine configuration: file (or defaults), then overrides.
pub fn load_config(path: Option<&Path>, max_tokens: Option<usize>) -> Result<EngineConfig, CliError> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(max_tokens) = max_tokens {
        config.max_tokens = max_tokens;
        config.validate()?;
    }
    Ok(config)
}

/// Run one generation, streaming the reply into `out`.
pub fn generate<W: Write>(args: &GenerateArgs, out: W) -> Result<(GenerationReport, W), CliError> {
    let config = load_config(args.config.as_deref(), args.max_tokens)?;
    let session = EngineSession::new(config)?;
    session.initialize_engine(&args.models_dir, &args.model)?;

    let mut sink = WriterSink::new(out);
    let report = session.generate(&args.text, &mut sink)?;
    let out = sink.finish()?;
    Ok((report, out))
}

/// Write the demo model to `out`.
pub fn write_demo_model(out: &Path, seed: u64) -> Result<(), CliError> {
    let model = CpuModel::demo(seed)?;
    save_model(out, &model)?;
    Ok(())
}

/// Log to stderr so stdout carries only generated text.
///
/// Filtered by `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    // A subscriber may already be installed (e.g. by a test harness).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &Path, max_tokens: Option<usize>) -> GenerateArgs {
        GenerateArgs {
            models_dir: dir.to_path_buf(),
            model: "demo.safetensors".into(),
            text: "Hello".into(),
            config: None,
            max_tokens,
        }
    }

    #[test]
    fn demo_model_then_generate() {
        let dir = tempfile::tempdir().unwrap();
        write_demo_model(&dir.path().join("demo.safetensors"), 3).unwrap();

        let (report, out) = generate(&args(dir.path(), Some(8)), Vec::new()).unwrap();
        assert!(report.generated_tokens <= 8);
        let text = String::from_utf8(out).unwrap();

        let (_, again) = generate(&args(dir.path(), Some(8)), Vec::new()).unwrap();
        assert_eq!(String::from_utf8(again).unwrap(), text);
    }

    #[test]
    fn generate_without_model_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = generate(&args(dir.path(), None), Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::Engine(LlamaError::ModelLoad { .. })), "{err}");
    }

    #[test]
    fn zero_max_tokens_rejected() {
        assert!(matches!(
            load_config(None, Some(0)),
            Err(CliError::Engine(LlamaError::Config(_)))
        ));
    }

    #[test]
    fn config_file_then_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"max_tokens": 40, "render_special": false}"#).unwrap();

        let config = load_config(Some(&path), Some(10)).unwrap();
        assert_eq!(config.max_tokens, 10);
        assert!(!config.render_special);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_sink_keeps_first_error() {
        let mut sink = WriterSink::new(BrokenPipe);
        sink.emit("a");
        sink.emit("b");
        assert_eq!(sink.finish().err().unwrap().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn writer_sink_passes_fragments_through() {
        let mut sink = WriterSink::new(Vec::new());
        sink.emit("Bon");
        sink.emit("jour");
        assert_eq!(sink.finish().unwrap(), b"Bonjour");
    }
}
