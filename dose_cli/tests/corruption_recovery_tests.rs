//! Corruption recovery tests for dose_cli.
//!
//! The flat-file store must degrade gracefully: a mangled entry line or a
//! truncated catalog file warns and recovers, never crashes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("dosewatch"))
}

fn setup_seeded_dir() -> TempDir {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    cli()
        .arg("status")
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();
    temp_dir
}

#[test]
fn test_corrupt_entry_line_is_skipped() {
    let temp_dir = setup_seeded_dir();
    let data_dir = temp_dir.path().to_path_buf();

    cli()
        .arg("log")
        .arg("Ibuprofen")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    // Mangle the log by hand
    let log_path = data_dir.join("entries.jsonl");
    let mut raw = fs::read_to_string(&log_path).unwrap();
    raw.push_str("{ this is not json }\n");
    fs::write(&log_path, raw).unwrap();

    // The good entry still counts; the bad line is ignored
    cli()
        .arg("status")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("✗ Ibuprofen"));
}

#[test]
fn test_corrupt_catalog_is_reseeded() {
    let temp_dir = setup_seeded_dir();
    let data_dir = temp_dir.path().to_path_buf();

    fs::write(data_dir.join("drugs.json"), "not json at all").unwrap();

    // An unreadable catalog reads as empty and gets seeded again
    cli()
        .arg("status")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Paracetamol"));

    let catalog_content = fs::read_to_string(data_dir.join("drugs.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&catalog_content).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 5);
}

#[test]
fn test_truncated_entry_log_recovers() {
    let temp_dir = setup_seeded_dir();
    let data_dir = temp_dir.path().to_path_buf();

    for _ in 0..2 {
        cli()
            .arg("log")
            .arg("Aspirin")
            .arg("--data-dir")
            .arg(&data_dir)
            .assert()
            .success();
    }

    // Chop the last line in half, as a crashed writer would
    let log_path = data_dir.join("entries.jsonl");
    let raw = fs::read_to_string(&log_path).unwrap();
    let truncated = &raw[..raw.len() - raw.len() / 4];
    fs::write(&log_path, truncated).unwrap();

    cli()
        .arg("status")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    // Logging still works after the damage
    cli()
        .arg("log")
        .arg("Aspirin")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();
}
