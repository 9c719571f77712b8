//! End-to-end CLI tests via the compiled binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn geolit() -> Command {
    Command::cargo_bin("geolit").expect("binary builds")
}

#[test]
fn test_help_lists_subcommands() {
    geolit()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("enrich"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_version_flag() {
    geolit()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("geolit"));
}

#[test]
fn test_enrich_requires_accession() {
    geolit().arg("enrich").assert().failure();
}

#[test]
fn test_cache_stats_on_empty_root_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    geolit()
        .arg("--storage-root")
        .arg(dir.path())
        .arg("cache")
        .arg("--stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("warm tier"));
}

#[test]
fn test_cache_health_check_gate_fails_with_exit_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    // No lookups have happened, so the hit rate (0.0) is below the gate.
    geolit()
        .arg("--storage-root")
        .arg(dir.path())
        .arg("cache")
        .arg("--health-check")
        .arg("--min-hit-rate")
        .arg("0.5")
        .assert()
        .code(1);
}

#[test]
fn test_cache_clear_soft_defaults_to_dry_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let soft_dir = dir.path().join("cache/soft");
    std::fs::create_dir_all(&soft_dir).expect("mkdir");
    let bundle = soft_dir.join("GSE1_family.soft.gz");
    std::fs::write(&bundle, b"bundle").expect("write");

    geolit()
        .arg("--storage-root")
        .arg(dir.path())
        .arg("cache")
        .arg("--clear-soft")
        .arg("--max-age-days=-1")
        .assert()
        .success()
        .stdout(predicate::str::contains("would delete"));
    assert!(bundle.exists(), "dry run must leave bundles alone");
}

#[test]
fn test_cache_clear_soft_execute_deletes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let soft_dir = dir.path().join("cache/soft");
    std::fs::create_dir_all(&soft_dir).expect("mkdir");
    let bundle = soft_dir.join("GSE1_family.soft.gz");
    std::fs::write(&bundle, b"bundle").expect("write");

    geolit()
        .arg("--storage-root")
        .arg(dir.path())
        .arg("cache")
        .arg("--clear-soft")
        .arg("--max-age-days=-1")
        .arg("--execute")
        .assert()
        .success();
    assert!(!bundle.exists());
}

#[test]
fn test_enrich_rejects_invalid_level() {
    geolit()
        .args(["enrich", "GSE1", "--level", "everything"])
        .assert()
        .failure();
}
