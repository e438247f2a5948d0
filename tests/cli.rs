use std::path::Path;
use std::process::{Command, Output};

fn atlas(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_atlas"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn foo_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "def foo():\n    return 42\n").unwrap();
    std::fs::write(dir.path().join("b.py"), "foo()\nfoo()\nfoo()\n").unwrap();
    dir
}

#[test]
fn map_prints_ranked_definitions() {
    let dir = foo_repo();
    let output = atlas(dir.path(), &["map"]);
    assert!(
        output.status.success(),
        "atlas map failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("a.py:\n"));
    assert!(stdout.contains("def foo():"));
}

#[test]
fn map_json_includes_report() {
    let dir = foo_repo();
    let output = atlas(dir.path(), &["map", "--format", "json", "--tokens", "512"]);
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(parsed["map"].as_str().unwrap().contains("def foo"));
    assert_eq!(parsed["report"]["total_files_considered"], 2);
}

#[test]
fn search_json_lists_definition_first() {
    let dir = foo_repo();
    let output = atlas(dir.path(), &["search", "foo", "--format", "json"]);
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = parsed["results"].as_array().unwrap();
    assert_eq!(results[0]["kind"], "definition");
    assert_eq!(results[0]["file"], "a.py");
}

#[test]
fn missing_root_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = atlas(dir.path(), &["map", "--root", "does-not-exist"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn logs_stay_off_stdout() {
    let dir = foo_repo();
    let output = atlas(dir.path(), &["--debug", "map", "--format", "json"]);
    assert!(output.status.success());
    serde_json::from_slice::<serde_json::Value>(&output.stdout).unwrap();
}

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let output = atlas(dir.path(), &["init"]);
    assert!(
        output.status.success(),
        "atlas init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let content = std::fs::read_to_string(dir.path().join(".atlas.toml")).unwrap();
    assert!(content.contains("[ranking]"));
    let config = atlas_core::AtlasConfig::from_toml(&content).unwrap();
    assert_eq!(config.map.token_limit, 2048);
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".atlas.toml"), "# existing").unwrap();
    let output = atlas(dir.path(), &["init"]);
    assert!(!output.status.success());
}
