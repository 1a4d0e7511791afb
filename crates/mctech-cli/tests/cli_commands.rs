// crates/mctech-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests that run the `mctech` binary.
// Purpose: Validate exit codes and output of every subcommand.
// Dependencies: mctech-cli binary, mctech-largequery, tempfile, time
// ============================================================================

//! ## Overview
//! Spawns the binary for config checks, rewriting, digests and large query
//! retrieval over a log written with the stanza formatter.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;
use std::time::Duration;

use mctech_largequery::ExecDetail;
use mctech_largequery::LargeQueryLogItems;
use mctech_largequery::SqlType;
use mctech_largequery::format_stanza;
use time::OffsetDateTime;
use time::macros::datetime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn mctech_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mctech"))
}

fn mctech(args: &[&str]) -> Output {
    Command::new(mctech_bin()).args(args).output().expect("run mctech")
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn items(time: OffsetDateTime, sql: &str) -> LargeQueryLogItems {
    LargeQueryLogItems {
        time,
        user: Some("mock_user".to_string()),
        host: "localhost".to_string(),
        client_ip: None,
        time_total: Duration::from_millis(1500),
        time_parse: Duration::from_millis(2),
        time_compile: Duration::from_millis(3),
        time_rewrite: Duration::ZERO,
        time_optimize: Duration::ZERO,
        exec_detail: ExecDetail::default(),
        db: "global_platform".to_string(),
        db_changed: false,
        digest: "abc".to_string(),
        mem_max: 0,
        disk_max: 0,
        result_rows: 1,
        succ: true,
        sql_type: SqlType::Select,
        app_name: "org-service".to_string(),
        product_line: "pf".to_string(),
        package: String::new(),
        plan: String::new(),
        sql: sql.to_string(),
    }
}

fn write_log(dir: &Path) -> PathBuf {
    let path = dir.join("mctech-large-query.log");
    let mut content = String::new();
    content.push_str(&format_stanza(&items(datetime!(2024-05-01 10:00:00 UTC), "select 1")).unwrap());
    content.push_str(&format_stanza(&items(datetime!(2024-05-01 11:00:00 UTC), "select 2")).unwrap());
    content.push_str(&format_stanza(&items(datetime!(2024-05-01 12:00:00 UTC), "select 3")).unwrap());
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Tests that a valid file is summarised and an invalid one fails.
#[test]
fn config_check_validates_file() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("mctech.toml");
    fs::write(&good, "[db-checker]\nenabled = true\n").unwrap();
    let output = mctech(&["config", "check", "--config", good.to_str().unwrap()]);
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(summary["db_checker"]["enabled"], true);

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[metrics.large-query]\nthreshold = 0\n").unwrap();
    let output = mctech(&["config", "check", "--config", bad.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("config check failed"));
}

/// Tests that the example configuration passes its own check.
#[test]
fn config_example_round_trips_through_check() {
    let output = mctech(&["config", "example"]);
    assert!(output.status.success());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mctech.toml");
    fs::write(&path, output.stdout).unwrap();
    assert!(mctech(&["config", "check", "--config", path.to_str().unwrap()]).status.success());
}

// ============================================================================
// SECTION: Rewrite And Digest
// ============================================================================

/// Tests rewriting with a tenant role.
#[test]
fn rewrite_prints_isolated_statement() {
    let output = mctech(&["rewrite", "--sql", "select * from global_platform.company", "--role", "code_gslq"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "SELECT * FROM global_platform.company WHERE (company.tenant = 'gslq')");
}

/// Tests the JSON form of a rewrite.
#[test]
fn rewrite_json_reports_tenant_and_dbs() {
    let output = mctech(&[
        "rewrite",
        "--sql",
        "select * from global_platform.company",
        "--role",
        "code_gslq",
        "--json",
    ]);
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(value["tenant"], "gslq");
    assert_eq!(value["dbs"], serde_json::json!(["global_platform"]));
}

/// Tests that policy failures exit non-zero with the message on stderr.
#[test]
fn rewrite_without_tenant_fails() {
    let output = mctech(&["rewrite", "--sql", "select * from global_platform.company"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot determine tenant"));
}

/// Tests that the digest ignores case and spacing.
#[test]
fn digest_is_normalised() {
    let first = stdout(&mctech(&["digest", "--sql", "SELECT  1"]));
    let second = stdout(&mctech(&["digest", "--sql", "select 1"]));
    assert_eq!(first, second);
    assert_eq!(first.trim().len(), 64);
}

// ============================================================================
// SECTION: Large Query
// ============================================================================

/// Tests window filtering and order.
#[test]
fn large_query_filters_window_in_both_orders() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(dir.path());
    let file = log.to_str().unwrap();
    let window = ["--start", "2024-05-01 10:30:00", "--end", "2024-05-01T12:30:00Z"];

    let mut args = vec!["large-query", "--file", file];
    args.extend(window);
    let output = mctech(&args);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let rows: Vec<serde_json::Value> =
        stdout(&output).lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    let queries: Vec<&str> = rows.iter().map(|row| row["query"].as_str().unwrap()).collect();
    assert_eq!(queries, ["select 2", "select 3"]);
    assert_eq!(rows[0]["app_name"], "org-service");
    assert_eq!(rows[0]["succ"], true);

    args.push("--desc");
    args.extend(["--limit", "1"]);
    let output = mctech(&args);
    let lines: Vec<String> = stdout(&output).lines().map(ToString::to_string).collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\"query\":\"select 3\""));
}

/// Tests that an inverted window is refused.
#[test]
fn large_query_rejects_inverted_window() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(dir.path());
    let output = mctech(&[
        "large-query",
        "--file",
        log.to_str().unwrap(),
        "--start",
        "2024-05-02 00:00:00",
        "--end",
        "2024-05-01 00:00:00",
    ]);
    assert!(!output.status.success());
}
