//! CLI smoke tests — verify commands that work without API keys.
//!
//! These tests run the compiled binary against a throwaway config and home
//! directory. No API keys or network access required.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run databot with `args` and return (exit_code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_databot");
    let output = Command::new(bin)
        .args(args)
        .env("HOME", home)
        .env("RUST_LOG", "error")
        .env_remove("DATABOT_PROVIDER_API_KEY")
        .output()
        .expect("failed to execute databot binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn write_config(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("config.json");
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn cli_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("databot"));
}

#[test]
fn cli_help_lists_commands() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["--help"]);
    assert_eq!(code, 0);
    for command in ["gateway", "agent", "status"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn cli_version_command() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("databot"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_status_without_connectors() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["status"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("databot status"));
    assert!(stdout.contains("not found"));
    assert!(stdout.contains("API key:  not set"));
    assert!(stdout.contains("No connectors configured."));
}

#[test]
fn cli_status_lists_unreachable_connector() {
    let home = TempDir::new().unwrap();
    let config = write_config(
        &home,
        r#"{"connectors": {"instances": {
            "airflow": {"type": "rest_api", "base_url": "http://127.0.0.1:9", "timeout_secs": 2, "max_retries": 0}
        }}}"#,
    );
    let (code, stdout, _stderr) = run_cli(home.path(), &["status", "-c", &config]);
    assert_eq!(code, 0);
    assert!(stdout.contains("airflow"));
    assert!(stdout.contains("rest_api"));
    assert!(stdout.contains("unreachable"));
}

#[test]
fn cli_rejects_invalid_config() {
    let home = TempDir::new().unwrap();
    let config = write_config(&home, r#"{"bus": {"capacity": 0}}"#);
    let (code, _stdout, stderr) = run_cli(home.path(), &["status", "--config", &config]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Failed to load configuration"));
}
