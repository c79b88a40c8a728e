use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const PARTY: &str = "urn:altinn:organization:identifier-no:912345678";

fn dsi_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dsi");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let dialogs = format!(
        r#"[
  {{
    "id": "00000000-0000-4000-8000-000000000001",
    "party": "{party}",
    "content": [
      {{ "kind": "title", "language": "nb", "value": "Skattemelding for 2024" }},
      {{ "kind": "summary", "language": "nb", "value": "Frist for innlevering er 30. april" }}
    ],
    "activities": [{{ "description": "Skattemelding levert" }}]
  }},
  {{
    "id": "00000000-0000-4000-8000-000000000002",
    "party": "{party}",
    "content": [{{ "kind": "title", "language": "en", "value": "Building permit application" }}],
    "transmissions": [{{
      "content": [{{ "kind": "title", "language": "en", "value": "Permit approved" }}],
      "attachments": [{{ "display_name": "permit-approval.pdf" }}]
    }}]
  }},
  {{
    "id": "00000000-0000-4000-8000-000000000003",
    "party": "urn:altinn:person:identifier-no:01017012345",
    "content": [{{ "kind": "title", "language": "en", "value": "Parking permit renewal" }}]
  }}
]"#,
        party = PARTY
    );
    fs::write(root.join("dialogs.json"), dialogs).unwrap();

    let config_content = format!(
        r#"worker_name = "cli-test"

[db]
path = "{}/data/dsi.sqlite"

[reindex]
batch_size = 2
workers = 2
progress_interval_secs = 1

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("dsi.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dsi(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dsi_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dsi binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn init_and_load(config_path: &Path) {
    let (stdout, stderr, success) = run_dsi(config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);

    let dialogs = config_path.parent().unwrap().parent().unwrap().join("dialogs.json");
    let (stdout, stderr, success) = run_dsi(config_path, &["load", dialogs.to_str().unwrap()]);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Loaded 3 dialogs"));
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_dsi(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_dsi(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_dsi(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_seed_is_idempotent_without_reset() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, _, success) = run_dsi(&config_path, &["seed", "full"]);
    assert!(success);
    assert!(stdout.contains("Enqueued 3 dialogs"), "stdout={}", stdout);

    let (stdout, _, success) = run_dsi(&config_path, &["seed", "full"]);
    assert!(success);
    assert!(stdout.contains("Enqueued 0 dialogs"), "stdout={}", stdout);

    let (stdout, _, success) = run_dsi(&config_path, &["seed", "full", "--reset"]);
    assert!(success);
    assert!(stdout.contains("Enqueued 3 dialogs"), "stdout={}", stdout);
}

#[test]
fn test_cycle_then_status() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);
    run_dsi(&config_path, &["seed", "full"]);

    let (stdout, stderr, success) = run_dsi(&config_path, &["cycle", "--batch-size", "2"]);
    assert!(success, "cycle failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Processed 2 dialogs"));

    let (stdout, _, success) = run_dsi(&config_path, &["status", "--json"]);
    assert!(success);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["progress"]["done"], 2);
    assert_eq!(report["progress"]["pending"], 1);
    assert_eq!(report["indexed"], 2);
    assert_eq!(report["last_cycle"]["worker"], "cli-test");
}

#[test]
fn test_reindex_full_then_search_scoped_by_party() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, stderr, success) =
        run_dsi(&config_path, &["reindex", "--full", "--progress", "json"]);
    assert!(success, "reindex failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Processed:  3"), "stdout={}", stdout);
    assert!(stderr.contains("\"phase\":\"finished\""), "stderr={}", stderr);

    let (stdout, _, success) = run_dsi(&config_path, &["search", "permit", "--party", PARTY]);
    assert!(success);
    assert!(stdout.contains("00000000-0000-4000-8000-000000000002"));
    // The parking permit belongs to another party.
    assert!(!stdout.contains("00000000-0000-4000-8000-000000000003"));

    let (stdout, _, success) = run_dsi(
        &config_path,
        &["search", "skattemelding", "--party", PARTY, "--language", "nb"],
    );
    assert!(success);
    assert!(stdout.contains("00000000-0000-4000-8000-000000000001"));

    let (stdout, _, success) = run_dsi(&config_path, &["search", "xyzzy", "--party", PARTY]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_reindex_stale_only_after_upsert() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, stderr, success) = run_dsi(
        &config_path,
        &["upsert", "00000000-0000-4000-8000-000000000001"],
    );
    assert!(success, "upsert failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Indexed dialog"));

    let (stdout, _, success) = run_dsi(
        &config_path,
        &["reindex", "--stale-only", "--stale-first", "--progress", "off"],
    );
    assert!(success);
    assert!(stdout.contains("Seeded:     2"), "stdout={}", stdout);
    assert!(stdout.contains("Processed:  2"), "stdout={}", stdout);
}

#[test]
fn test_reindex_requires_a_mode() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (_, _, success) = run_dsi(&config_path, &["reindex"]);
    assert!(!success, "reindex without a mode should fail");
}

#[test]
fn test_upsert_unknown_dialog_fails() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (_, stderr, success) = run_dsi(
        &config_path,
        &["upsert", "00000000-0000-4000-8000-0000000000ff"],
    );
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr={}", stderr);
}

#[test]
fn test_sweep_and_failures_on_idle_queue() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, _, success) = run_dsi(&config_path, &["sweep"]);
    assert!(success);
    assert!(stdout.contains("Requeued 0 dialogs"));

    let (stdout, _, success) = run_dsi(&config_path, &["failures"]);
    assert!(success);
    assert!(stdout.contains("No failed dialogs."));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("batch_size = 2", "batch_size = 0")).unwrap();

    let (_, stderr, success) = run_dsi(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("batch_size"), "stderr={}", stderr);
}
