//! End-to-end generation with the CPU reference model loaded from disk.

use std::path::Path;

use llama_engine::LlamaError;
use llama_models::{save_model, CpuModel};
use llama_session::*;

const MODEL_FILE: &str = "demo.safetensors";

fn write_demo(dir: &Path) {
    save_model(&dir.join(MODEL_FILE), &CpuModel::demo(7).unwrap()).unwrap();
}

fn session_with(dir: &Path, config: EngineConfig) -> EngineSession {
    let session = EngineSession::new(config).unwrap();
    session.initialize_engine(dir, MODEL_FILE).unwrap();
    session
}

#[test]
fn greedy_generation_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    let config = EngineConfig {
        max_tokens: 24,
        ..EngineConfig::default()
    };
    let session = session_with(dir.path(), config.clone());

    let (first, report) = session.generate_to_string("Hello").unwrap();
    let (second, _) = session.generate_to_string("Hello").unwrap();
    assert_eq!(first, second);
    assert!(report.generated_tokens <= 24);

    // A separately loaded session agrees byte for byte.
    let other = session_with(dir.path(), config);
    assert_eq!(other.generate_to_string("Hello").unwrap().0, first);
}

#[test]
fn output_bounded_by_max_tokens() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    let session = session_with(
        dir.path(),
        EngineConfig {
            max_tokens: 5,
            ..EngineConfig::default()
        },
    );

    let mut fragments = 0;
    let report = session
        .generate("The cat sleeps.", &mut |_: &str| fragments += 1)
        .unwrap();
    assert!(report.generated_tokens <= 5);
    assert!(fragments <= 5);
    assert_eq!(fragments, report.fragments);
    if report.stop == StopReason::MaxTokens {
        assert_eq!(report.generated_tokens, 5);
    }
}

#[test]
fn missing_file_reports_full_path() {
    let dir = tempfile::tempdir().unwrap();
    let session = EngineSession::new(EngineConfig::default()).unwrap();
    let err = session.initialize_engine(dir.path(), "absent.safetensors").unwrap_err();
    match err {
        LlamaError::ModelLoad { path, .. } => assert_eq!(path, dir.path().join("absent.safetensors")),
        other => panic!("expected ModelLoad, got {other:?}"),
    }
    let mut out = String::new();
    assert!(session.generate("Hello", &mut |f: &str| out.push_str(f)).is_err());
    assert_eq!(out, NOT_READY_SENTINEL);
}

#[test]
fn oversized_context_is_context_creation_error() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    let session = EngineSession::new(EngineConfig {
        n_ctx: 1 << 20,
        n_batch: 256,
        ..EngineConfig::default()
    })
    .unwrap();

    let err = session.initialize_engine(dir.path(), MODEL_FILE).unwrap_err();
    assert!(matches!(err, LlamaError::ContextCreation(_)), "{err:?}");
    assert!(matches!(session.status(), SessionStatus::Failed(_)));
}

#[test]
fn config_file_drives_session() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    let config_path = dir.path().join("engine.json");
    std::fs::write(&config_path, r#"{"max_tokens": 2, "n_ctx": 512, "n_batch": 512}"#).unwrap();

    let config = EngineConfig::from_file(&config_path).unwrap();
    let session = session_with(dir.path(), config);
    let (_, report) = session.generate_to_string("Hi").unwrap();
    assert!(report.generated_tokens <= 2);
    assert_eq!(session.config().n_ctx, 512);
}
