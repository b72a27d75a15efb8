//! Smoke tests -- verify the binary runs and each subcommand is wired up.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

fn netinsight() -> Command {
    let mut cmd = Command::cargo_bin("netinsight").unwrap();
    cmd.env_remove("NETINSIGHT_CONFIG").env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("netinsight.toml");
    let toml = format!(
        "[storage]\ndb_path = {:?}\n\n[detector]\nbundle_path = {:?}\n\n[logging]\nlevel = \"warn\"\n",
        dir.join("logs.db"),
        dir.join("models/bundle.json"),
    );
    std::fs::write(&path, toml).unwrap();
    path
}

fn write_records(dir: &Path, n: usize) -> std::path::PathBuf {
    let path = dir.join("records.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for i in 0..n {
        writeln!(
            file,
            r#"{{"device_id":"dev-{}","device_type":"router","location":"lab","timestamp":"2024-06-01T{:02}:00:00Z","latency_ms":{},"cpu_utilization":40.0,"success":true,"event_category":"network","event_type":"heartbeat"}}"#,
            i % 3,
            i % 24,
            10 + i
        )
        .unwrap();
    }
    path
}

#[test]
fn test_cli_help() {
    netinsight()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Anomaly detection and batch analytics for network device telemetry",
        ));
}

#[test]
fn test_cli_version() {
    netinsight()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netinsight"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["import", "detect", "predict", "aggregate", "summary", "features"] {
        netinsight().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_features_lists_model_inputs() {
    let dir = tempfile::tempdir().unwrap();
    netinsight()
        .arg("--config")
        .arg(write_config(dir.path()))
        .arg("features")
        .assert()
        .success()
        .stdout(predicate::str::contains("latency_ms"))
        .stdout(predicate::str::contains("tcp_retransmissions"));
}

#[test]
fn test_detect_small_batch_reports_insufficient_data() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_records(dir.path(), 9);
    netinsight()
        .arg("--config")
        .arg(write_config(dir.path()))
        .args(["detect", "--input"])
        .arg(input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Insufficient data"));
}

#[test]
fn test_detect_rejects_unknown_model() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_records(dir.path(), 20);
    netinsight()
        .arg("--config")
        .arg(write_config(dir.path()))
        .args(["detect", "--model", "random_forest", "--input"])
        .arg(input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported model type"));
}

#[test]
fn test_import_then_aggregate_from_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let input = write_records(dir.path(), 12);

    netinsight()
        .arg("--config")
        .arg(&config)
        .args(["import", "--file"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 12 records"));

    netinsight()
        .arg("--config")
        .arg(&config)
        .args(["aggregate", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"records_analyzed\": 12"));
}

#[test]
fn test_detect_save_then_predict_uses_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let input = write_records(dir.path(), 30);

    netinsight()
        .arg("--config")
        .arg(&config)
        .args(["detect", "--save-model", "--json", "--input"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_records\": 30"));
    assert!(dir.path().join("models/bundle.json").exists());

    netinsight()
        .arg("--config")
        .arg(&config)
        .args([
            "predict",
            "--latency",
            "900",
            "--jitter",
            "3",
            "--packet-loss",
            "0.01",
            "--cpu",
            "40",
            "--memory",
            "50",
            "--retransmissions",
            "2",
            "--clients",
            "12",
            "--throughput",
            "200",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"source\": \"persisted\""));
}
