use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn studyctl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("studyctl");
    path
}

const ALPHA: &str = "Photosynthesis converts light energy.\n\nChlorophyll absorbs light for photosynthesis.";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("alpha.txt"), ALPHA).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Newton's Laws\n\nForce equals mass times acceleration.\n\nEvery action has an equal reaction.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Supply and demand set prices.\n\nMarkets clear when supply meets demand.",
    )
    .unwrap();

    let config_content = format!(
        r#"[chunking]
max_chars = 2000

[analysis]
workers = 2
default_backend = "mock"

[cache]
path = "{}/data/insights.sqlite"
"#,
        root.display()
    );

    let config_path = config_dir.join("studyctl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_studyctl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = studyctl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run studyctl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .display()
        .to_string()
}

#[test]
fn test_init_creates_cache() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_studyctl(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("insights.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_studyctl(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_studyctl(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_init_requires_cache_path() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("studyctl.toml");
    fs::write(&config_path, "[analysis]\nworkers = 1\n").unwrap();

    let (_, stderr, success) = run_studyctl(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("cache"), "stderr: {}", stderr);
}

#[test]
fn test_extract_reports_counts() {
    let (_tmp, config_path) = setup_test_env();
    let file = format!("{}/alpha.txt", files_dir(&config_path));

    let (stdout, stderr, success) = run_studyctl(&config_path, &["extract", &file]);
    assert!(success, "extract failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Method:      plain-utf8"));
    assert!(stdout.contains("Words:       9"));
    assert!(stdout.contains("Paragraphs:          2"));
}

#[test]
fn test_extract_unsupported_type_fails() {
    let (_tmp, config_path) = setup_test_env();
    let file = format!("{}/alpha.txt", files_dir(&config_path));

    let (stdout, _, success) = run_studyctl(&config_path, &["extract", &file, "--type", "pptx"]);
    assert!(!success);
    assert!(stdout.contains("Success:     false"));
}

#[test]
fn test_analyze_directory_with_mock() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    let (stdout, stderr, success) = run_studyctl(&config_path, &["analyze", &dir]);
    assert!(success, "analyze failed: stdout={}, stderr={}", stdout, stderr);
    for name in ["alpha.txt", "beta.md", "gamma.txt"] {
        assert!(stdout.contains(name), "missing {} in {}", name, stdout);
    }
    assert!(stdout.contains("analyzed with 'mock'"));
    assert!(stdout.contains("Photosynthesis"));
    assert!(stdout.contains("3 document(s): 3 analyzed, 0 failed."));
}

#[test]
fn test_analyze_json_output() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    let (stdout, stderr, success) =
        run_studyctl(&config_path, &["analyze", &dir, "--json", "--max-topics", "2"]);
    assert!(success, "analyze failed: stderr={}", stderr);

    let items: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["filename"], "alpha.txt");
    assert_eq!(
        items[0]["fingerprint"],
        study_insights::models::fingerprint(ALPHA.as_bytes())
    );
    for item in items {
        let topics = item["insight"]["topics"].as_array().unwrap();
        assert!(!topics.is_empty() && topics.len() <= 2);
        assert_eq!(item["insight"]["backend_used"], "mock");
    }
}

#[test]
fn test_analyze_second_run_is_cached() {
    let (_tmp, config_path) = setup_test_env();
    let file = format!("{}/alpha.txt", files_dir(&config_path));

    run_studyctl(&config_path, &["init"]);
    let (first, _, _) = run_studyctl(&config_path, &["analyze", &file]);
    assert!(!first.contains("(cached)"));

    let (second, _, success) = run_studyctl(&config_path, &["analyze", &file]);
    assert!(success);
    assert!(second.contains("(cached)"), "expected cache hit: {}", second);
}

#[test]
fn test_invalidate_drops_cached_insights() {
    let (_tmp, config_path) = setup_test_env();
    let file = format!("{}/alpha.txt", files_dir(&config_path));
    let fp = study_insights::models::fingerprint(ALPHA.as_bytes());

    run_studyctl(&config_path, &["init"]);
    run_studyctl(&config_path, &["analyze", &file]);

    let (stdout, _, success) = run_studyctl(&config_path, &["invalidate", &fp]);
    assert!(success);
    assert!(stdout.contains("Removed 1 cached insight(s)"));

    let (after, _, _) = run_studyctl(&config_path, &["analyze", &file]);
    assert!(!after.contains("(cached)"));
}

#[test]
fn test_show_stored_document() {
    let (_tmp, config_path) = setup_test_env();
    let file = format!("{}/alpha.txt", files_dir(&config_path));
    let fp = study_insights::models::fingerprint(ALPHA.as_bytes());

    run_studyctl(&config_path, &["init"]);
    run_studyctl(&config_path, &["analyze", &file]);

    let (stdout, stderr, success) = run_studyctl(&config_path, &["show", &fp]);
    assert!(success, "show failed: stderr={}", stderr);
    assert!(stdout.contains("alpha.txt"));
    assert!(stdout.contains("Success:     true"));

    let (_, _, missing) = run_studyctl(&config_path, &["show", "0000"]);
    assert!(!missing);
}

#[test]
fn test_empty_document_reports_status_and_fails() {
    let (tmp, config_path) = setup_test_env();
    let empty = tmp.path().join("empty.txt");
    fs::write(&empty, "").unwrap();
    let good = format!("{}/gamma.txt", files_dir(&config_path));

    let (stdout, _, success) =
        run_studyctl(&config_path, &["analyze", &good, empty.to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.contains("nothing to analyze"));
    assert!(stdout.contains("2 document(s): 1 analyzed, 1 failed."));
}

#[test]
fn test_backends_lists_mock() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_studyctl(&config_path, &["backends"]);
    assert!(success);
    assert!(stdout.contains("BACKEND"));
    assert!(stdout.contains("mock"));
    assert!(stdout.contains("true"));
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("notes.txt");
    fs::write(&file, "Entropy always increases in isolated systems.").unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) =
        run_studyctl(&missing, &["analyze", file.to_str().unwrap()]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("analyzed with 'mock'"));
}

#[test]
fn test_unknown_backend_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    let (_, stderr, success) = run_studyctl(&config_path, &["analyze", &dir, "--backend", "gpt"]);
    assert!(!success);
    assert!(stderr.contains("Unknown backend"));
}
