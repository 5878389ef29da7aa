use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Integration tests for the repowatch CLI
/// These tests run the built binary with an isolated home directory

fn repowatch(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_repowatch"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute repowatch")
}

/// Config file using the in-memory backend and token auth, so no GitHub credentials are found
fn write_offline_config(dir: &Path) -> std::path::PathBuf {
    let config_path = dir.join("config.yml");
    std::fs::write(
        &config_path,
        r#"
github:
  auth_method: "token"
storage:
  backend: "memory"
logging:
  level: "warn"
  color: false
"#,
    )
    .unwrap();
    config_path
}

#[test]
fn test_cli_help() {
    let temp_dir = TempDir::new().unwrap();
    let output = repowatch(temp_dir.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    for command in ["init", "track", "untrack", "repos", "refresh", "pulls", "issues", "status", "serve"] {
        assert!(stdout.contains(command), "help is missing '{}'", command);
    }
}

#[test]
fn test_cli_version() {
    let temp_dir = TempDir::new().unwrap();
    let output = repowatch(temp_dir.path(), &["--version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("repowatch"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_command() {
    let temp_dir = TempDir::new().unwrap();
    let output = repowatch(temp_dir.path(), &["frobnicate"]);

    assert!(!output.status.success());
}

#[test]
fn test_pulls_help_lists_filters() {
    let temp_dir = TempDir::new().unwrap();
    let output = repowatch(temp_dir.path(), &["pulls", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--repo", "--state", "--author", "--label", "--page", "--per-page", "--direction"] {
        assert!(stdout.contains(flag), "pulls help is missing '{}'", flag);
    }
}

#[test]
fn test_error_handling_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("broken.yml");
    std::fs::write(&config_path, "storage: [not, a, map").unwrap();

    let output = repowatch(
        temp_dir.path(),
        &["--config", config_path.to_str().unwrap(), "repos"],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"));
}

#[test]
fn test_repos_json_with_memory_backend() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_offline_config(temp_dir.path());

    let output = repowatch(
        temp_dir.path(),
        &["--config", config_path.to_str().unwrap(), "--json", "repos"],
    );

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let page: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(page["total"], 0);
    assert!(page["items"].as_array().unwrap().is_empty());
}

#[test]
fn test_show_untracked_repository_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_offline_config(temp_dir.path());

    let output = repowatch(
        temp_dir.path(),
        &["--config", config_path.to_str().unwrap(), "show", "acme/widgets"],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_track_requires_authentication() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_offline_config(temp_dir.path());

    let output = repowatch(
        temp_dir.path(),
        &["--config", config_path.to_str().unwrap(), "track", "acme/widgets"],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GITHUB_TOKEN"));
}

#[test]
fn test_init_writes_config_once() {
    let temp_dir = TempDir::new().unwrap();

    let output = repowatch(temp_dir.path(), &["init"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("initialized"));

    let output = repowatch(temp_dir.path(), &["init"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("already exists"));
}
