//! CLI integration tests

use governor_lib::telemetry::{ExportDocument, MetricsSummary, TestMetrics};
use governor_lib::{StorageEngine, TestStatus};
use mockito::{Matcher, Server};
use serde_json::json;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run govctl with an isolated config file
fn govctl(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_govctl"))
        .args(args)
        .env("GOVCTL_CONFIG", config_dir.join("config.json"))
        .env_remove("GOVCTL_API_URL")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute govctl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn snapshot(cpu: f64) -> serde_json::Value {
    json!({
        "cpu_utilization": cpu,
        "memory_utilization": 0.4,
        "active_tasks": 3,
        "reclaim_cycles": 0,
        "resident_bytes": 1048576,
        "memory_limit_bytes": 8589934592u64,
        "timestamp": "2024-05-01T12:00:00Z"
    })
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let output = govctl(dir.path(), &["--help"]);
    let out = stdout(&output);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(out.contains("Test Governor"), "Should show app name");
    for command in ["status", "health", "pool", "parallelism", "skips", "summary", "export", "report"] {
        assert!(out.contains(command), "Should show {} command", command);
    }
    assert!(out.contains("--api-url"), "Should show api-url option");
    assert!(out.contains("GOVCTL_API_URL"), "Should show env var");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = govctl(dir.path(), &["--version"]);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout(&output).contains("govctl"), "Should show binary name");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let dir = TempDir::new().unwrap();
    let output = govctl(dir.path(), &["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
    assert!(stderr(&output).contains("error"));
}

#[test]
fn test_status_table() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/api/v1/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "version": "0.1.0",
                "environment": "ci",
                "storage_engine": "postgres",
                "ready": true,
                "parallelism_ceiling": 8,
                "active_tests": 3,
                "max_connections": 45,
                "skip_conditions": 6,
                "tests_skipped": 12,
                "tests_recorded": 140
            })
            .to_string(),
        )
        .create();

    let output = govctl(dir.path(), &["--api-url", &server.url(), "status"]);
    let out = stdout(&output);

    mock.assert();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(out.contains("Governor Status"));
    assert!(out.contains("postgres"));
    assert!(out.contains("Parallelism Ceiling:    8"));
    assert!(out.contains("Max Connections:        45"));
}

#[test]
fn test_health_exits_nonzero_when_unhealthy() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    server
        .mock("GET", "/healthz")
        .with_status(503)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "status": "unhealthy",
                "components": {
                    "storage": {
                        "status": "unhealthy",
                        "message": "storage handle is closed",
                        "last_check_timestamp": 1714564800
                    },
                    "parallelism": {
                        "status": "healthy",
                        "last_check_timestamp": 1714564800
                    }
                }
            })
            .to_string(),
        )
        .create();
    server
        .mock("GET", "/readyz")
        .with_status(503)
        .with_header("content-type", "application/json")
        .with_body(json!({"ready": false, "reason": "Unhealthy components: storage"}).to_string())
        .create();

    let output = govctl(dir.path(), &["--api-url", &server.url(), "health"]);
    let out = stdout(&output);

    assert!(!output.status.success(), "Unhealthy daemon should fail the check");
    assert!(out.contains("storage handle is closed"));
    assert!(out.contains("Unhealthy components: storage"));
}

#[test]
fn test_pool_history_table() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    server
        .mock("GET", "/api/v1/pool/history")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "summary": {
                    "total_events": 1,
                    "adjustments": 1,
                    "unchanged": 0,
                    "by_reason": {"reduce load under CPU pressure": 1}
                },
                "events": [{
                    "timestamp": "2024-05-01T12:00:00Z",
                    "old": {"max_connections": 50, "max_idle": 10, "conn_max_lifetime": 300},
                    "new": {"max_connections": 45, "max_idle": 9, "conn_max_lifetime": 240},
                    "reason": "reduce load under CPU pressure",
                    "snapshot": snapshot(0.9),
                    "stats": {
                        "max_open": 50,
                        "open": 12,
                        "in_use": 8,
                        "idle": 4,
                        "wait_count": 0,
                        "wait_duration_ms": 0
                    }
                }]
            })
            .to_string(),
        )
        .create();

    let output = govctl(dir.path(), &["--api-url", &server.url(), "pool", "history"]);
    let out = stdout(&output);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(out.contains("50 -> 45"));
    assert!(out.contains("300 -> 240"));
    assert!(out.contains("90.0%"));
    assert!(out.contains("Total: 1 decisions, 1 adjustments (100.0%)"));
}

#[test]
fn test_parallelism_json_passthrough() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    server
        .mock("GET", "/api/v1/parallelism")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "ceiling": 6,
                "max_ceiling": 16,
                "active_tests": 2,
                "completed_tests": 40,
                "failed_tests": 1,
                "average_duration_ms": 12.5,
                "auto_optimizing": true,
                "snapshot": snapshot(0.2)
            })
            .to_string(),
        )
        .create();

    let output = govctl(
        dir.path(),
        &["--api-url", &server.url(), "--format", "json", "parallelism", "show"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["ceiling"], 6);
    assert_eq!(value["max_ceiling"], 16);
}

#[test]
fn test_skip_history_sends_limit() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/api/v1/skips/history")
        .match_query(Matcher::UrlEncoded("limit".into(), "5".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!([{
                "test_name": "nightly_import",
                "reason": "Slow tests are disabled",
                "condition": "slow_tests",
                "category": "performance",
                "timestamp": "2024-05-01T12:00:00Z",
                "environment": "ci",
                "should_run": false
            }])
            .to_string(),
        )
        .create();

    let output = govctl(
        dir.path(),
        &["--api-url", &server.url(), "skips", "history", "--limit", "5"],
    );
    let out = stdout(&output);

    mock.assert();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(out.contains("nightly_import"));
    assert!(out.contains("skipped"));
}

#[test]
fn test_export_posts_format() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/api/v1/export")
        .match_query(Matcher::UrlEncoded("format".into(), "csv".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "format": "csv",
                "path": "test-metrics/test-metrics-20240501-120000.000.csv",
                "records": 42
            })
            .to_string(),
        )
        .create();

    let output = govctl(dir.path(), &["--api-url", &server.url(), "export", "--as", "csv"]);

    mock.assert();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Exported 42 records as csv"));
}

#[test]
fn test_export_rejects_unknown_format() {
    let dir = TempDir::new().unwrap();
    let output = govctl(
        dir.path(),
        &["--api-url", "http://127.0.0.1:9", "export", "--as", "xml"],
    );

    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown format"));
}

#[test]
fn test_api_error_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    server
        .mock("GET", "/api/v1/pool")
        .with_status(503)
        .with_header("content-type", "application/json")
        .with_body(json!({"error": "storage handle is closed"}).to_string())
        .create();

    let output = govctl(dir.path(), &["--api-url", &server.url(), "pool", "show"]);
    let err = stderr(&output);

    assert!(!output.status.success());
    assert!(err.contains("API error (503"));
    assert!(err.contains("storage handle is closed"));
}

#[test]
fn test_offline_report() {
    let dir = TempDir::new().unwrap();
    let mut passed = TestMetrics::new("create_budget", StorageEngine::Sqlite, true);
    passed.status = TestStatus::Passed;
    passed.duration_ms = 15.0;
    let mut failed = TestMetrics::new("split_expense", StorageEngine::Sqlite, true);
    failed.status = TestStatus::Failed;
    failed.duration_ms = 40.0;
    failed.error = Some("expected 3 shares".to_string());
    let tests = vec![passed, failed];

    let document = ExportDocument {
        exported_at: chrono::Utc::now(),
        environment: "ci".to_string(),
        summary: MetricsSummary::from_metrics(&tests),
        tests,
    };
    let path = dir.path().join("test-metrics.json");
    std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

    let output = govctl(
        dir.path(),
        &["report", path.to_str().unwrap(), "--failed"],
    );
    let out = stdout(&output);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(out.contains("Test Report (ci)"));
    assert!(out.contains("Total Tests:            2"));
    assert!(out.contains("expected 3 shares"));
    assert!(out.contains("Success Rate:           50.0%"));
}

#[test]
fn test_config_set_and_show() {
    let dir = TempDir::new().unwrap();

    let output = govctl(
        dir.path(),
        &["config", "set", "--api-url", "http://governor:9090", "--default-format", "json"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = govctl(dir.path(), &["config", "show"]);
    let out = stdout(&output);
    assert!(out.contains("http://governor:9090"));
    assert!(out.contains("Json"));

    let output = govctl(dir.path(), &["config", "set", "--default-format", "yaml"]);
    assert!(!output.status.success());
}
