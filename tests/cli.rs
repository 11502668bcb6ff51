//! Binary tests for fail-fast paths that must not touch the network.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn kba_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kba");
    path
}

/// Run `kba` inside `dir` with a scrubbed environment.
fn run_kba(dir: &Path, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(kba_binary());
    cmd.current_dir(dir).args(args);
    for key in [
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "OPENAI_MODEL",
        "OPENAI_EMBEDDING_MODEL",
        "AZURE_OPENAI_API_KEY",
        "AZURE_OPENAI_ENDPOINT",
        "CONFLUENCE_URL",
        "CONFLUENCE_USERNAME",
        "CONFLUENCE_API_TOKEN",
        "KBA_PROVIDER",
        "KBA_INDEX_PATH",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    // Unroutable, so an accidental request fails instead of leaving the host.
    cmd.env("OPENAI_BASE_URL", "http://127.0.0.1:9/v1");
    for (k, v) in envs {
        cmd.env(k, v);
    }
    cmd.output().expect("failed to run kba")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let tmp = TempDir::new().unwrap();
    let output = run_kba(tmp.path(), &["--help"], &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["ingest", "confluence", "ask", "chat", "summarize"] {
        assert!(stdout.contains(command), "missing {} in help", command);
    }
}

#[test]
fn test_unsupported_extension_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("notes.md"), "fine").unwrap();
    fs::write(tmp.path().join("budget.xlsx"), "not supported").unwrap();

    let output = run_kba(
        tmp.path(),
        &["ingest", "notes.md", "budget.xlsx"],
        &[("OPENAI_API_KEY", "sk-test")],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unsupported file type: .xlsx"));
    assert!(!tmp.path().join("data/vectorstore").exists());
}

#[test]
fn test_missing_input_path_is_a_config_error() {
    let tmp = TempDir::new().unwrap();
    let output = run_kba(
        tmp.path(),
        &["ingest", "nowhere.pdf"],
        &[("OPENAI_API_KEY", "sk-test")],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("input does not exist"));
}

#[test]
fn test_missing_confluence_credentials() {
    let tmp = TempDir::new().unwrap();
    let output = run_kba(
        tmp.path(),
        &["confluence", "space", "ENG"],
        &[
            ("OPENAI_API_KEY", "sk-test"),
            ("CONFLUENCE_URL", "https://wiki.example.com"),
        ],
    );
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("CONFLUENCE_USERNAME"));
    assert!(err.contains("CONFLUENCE_API_TOKEN"));

    let output = run_kba(
        tmp.path(),
        &["confluence", "pages", "12345"],
        &[("OPENAI_API_KEY", "sk-test")],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("CONFLUENCE_URL"));
}

#[test]
fn test_missing_openai_key() {
    let tmp = TempDir::new().unwrap();
    let output = run_kba(tmp.path(), &["ask", "What is in the corpus?"], &[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("OPENAI_API_KEY"));
}

#[test]
fn test_missing_azure_endpoint() {
    let tmp = TempDir::new().unwrap();
    let output = run_kba(
        tmp.path(),
        &["--provider", "azure", "ask", "anything"],
        &[("AZURE_OPENAI_API_KEY", "az-test")],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("AZURE_OPENAI_ENDPOINT"));
}

#[test]
fn test_top_k_is_bounded() {
    let tmp = TempDir::new().unwrap();
    for k in ["1", "16"] {
        let output = run_kba(tmp.path(), &["--top-k", k, "ask", "q"], &[]);
        assert_eq!(output.status.code(), Some(2), "top-k {} accepted", k);
    }
}

#[test]
fn test_invalid_config_file() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(
        tmp.path().join("config/kba.toml"),
        "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
    )
    .unwrap();

    let output = run_kba(tmp.path(), &["ask", "q"], &[("OPENAI_API_KEY", "sk-test")]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("chunk_overlap"));
}

#[test]
fn test_empty_question_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let output = run_kba(tmp.path(), &["ask", "   "], &[("OPENAI_API_KEY", "sk-test")]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("question must not be empty"));
}
