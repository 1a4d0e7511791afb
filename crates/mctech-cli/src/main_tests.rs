// crates/mctech-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for time bounds, config summaries and rewriting.
// Purpose: Keep the helpers behind each subcommand honest without spawning
//          the binary.
// Dependencies: mctech-cli main helpers
// ============================================================================

//! ## Overview
//! Exercises `parse_time`, `config_summary` and the offline rewrite path.

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

use mctech_config::McTechConfig;
use mctech_interceptor::Session;
use time::macros::datetime;

use super::DEFAULT_REWRITE_CONFIG;
use super::config_summary;
use super::offline_interceptor;
use super::parse_time;
use super::rewrite;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn parse_time_accepts_rfc3339_and_plain() {
    assert_eq!(parse_time("2024-05-01T10:00:00+08:00").unwrap(), datetime!(2024-05-01 02:00:00 UTC));
    assert_eq!(parse_time(" 2024-05-01 10:00:00 ").unwrap(), datetime!(2024-05-01 10:00:00 UTC));
    let err = parse_time("yesterday").unwrap_err();
    assert!(err.to_string().starts_with("invalid time `yesterday`"));
}

#[test]
fn config_summary_reports_normalised_lists() {
    let config = McTechConfig::from_toml_str("[db-checker]\nenabled = true\nacross = [\"global_cq3|global_qa\"]").unwrap();
    let summary = config_summary(&config);
    assert_eq!(summary["status"], "ok");
    assert_eq!(summary["db_checker"]["enabled"], true);
    let across = summary["db_checker"]["across"].as_array().unwrap();
    assert!(across.iter().any(|group| group == &serde_json::json!(["global_cq3", "global_qa"])));
    let roles = summary["sql_trace"]["ignore_roles"].as_array().unwrap();
    assert!(roles.iter().any(|role| role == "mc_read"));
}

#[test]
fn rewrite_adds_tenant_predicate() {
    let config = McTechConfig::from_toml_str(DEFAULT_REWRITE_CONFIG).unwrap();
    let interceptor = offline_interceptor(config, 1).unwrap();
    let mut session = Session::new("u", vec!["code_gslq".to_string()]);
    let stmt = rewrite(&interceptor, &mut session, "select * from global_platform.company", false).unwrap();
    assert_eq!(stmt.to_string(), "SELECT * FROM global_platform.company WHERE (company.tenant = 'gslq')");
}

#[test]
fn rewrite_prepare_keeps_tenant_slot() {
    let config = McTechConfig::from_toml_str(DEFAULT_REWRITE_CONFIG).unwrap();
    let interceptor = offline_interceptor(config, 1).unwrap();
    let mut session = Session::new("u", vec!["code_gslq".to_string()]);
    let stmt = rewrite(&interceptor, &mut session, "select * from global_platform.company", true).unwrap();
    assert!(stmt.to_string().contains(mctech_visitor::TENANT_SLOT));
}

#[test]
fn rewrite_reports_policy_failure() {
    let config = McTechConfig::from_toml_str(DEFAULT_REWRITE_CONFIG).unwrap();
    let interceptor = offline_interceptor(config, 1).unwrap();
    let mut session = Session::new("u", Vec::new());
    let err = rewrite(&interceptor, &mut session, "select * from global_platform.company", false).unwrap_err();
    assert!(err.to_string().starts_with("rewrite failed: user u cannot determine tenant"), "{err}");
}

#[test]
fn offline_interceptor_rejects_bad_dw_index() {
    let config = McTechConfig::from_toml_str(DEFAULT_REWRITE_CONFIG).unwrap();
    assert!(offline_interceptor(config, 3).is_err());
}
