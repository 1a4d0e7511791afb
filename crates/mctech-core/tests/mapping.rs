// crates/mctech-core/tests/mapping.rs
// ============================================================================
// Module: Database Mapping Tests
// Description: Prefix/DW mapping, filters and the HTTP DW index selector.
// Purpose: Validate logical/physical name mapping and its inputs.
// Dependencies: mctech-core, proptest, tiny_http
// ============================================================================

//! ## Overview
//! Covers the mapping laws (prefixing is invertible for product databases),
//! the DW slot suffix, filter expressions and the DW index HTTP protocol.

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
    reason = "Test-only assertions and helpers are permitted."
)]

use std::thread;

use mctech_core::DbIndex;
use mctech_core::DbIndexRequest;
use mctech_core::DbIndexSelector;
use mctech_core::Filter;
use mctech_core::HttpDbIndexSelector;
use mctech_core::RpcClient;
use mctech_core::mapper::is_global_db;
use mctech_core::mapper::is_product_database;
use mctech_core::mapper::to_logical;
use mctech_core::mapper::to_physical;
use proptest::prelude::*;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn slot(raw: i64) -> DbIndex {
    DbIndex::new(raw).unwrap()
}

/// Serves `bodies` in order, recording request URLs.
fn spawn_server(bodies: Vec<&'static str>) -> (String, thread::JoinHandle<Vec<String>>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let url = format!("http://{addr}/");
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for body in bodies {
            let Ok(request) = server.recv() else {
                break;
            };
            seen.push(request.url().to_string());
            let _ = request.respond(Response::from_string(body));
        }
        seen
    });
    (url, handle)
}

// ============================================================================
// SECTION: Mapping
// ============================================================================

/// Tests prefixing of product databases only.
#[test]
fn prefix_applies_to_product_databases() {
    let none = || -> Result<DbIndex, mctech_core::McTechError> { Ok(slot(1)) };
    assert_eq!(to_physical("global_platform", "mt", none).unwrap(), "mt_global_platform");
    assert_eq!(to_physical("public_data", "mt", none).unwrap(), "mt_public_data");
    assert_eq!(to_physical("asset_x", "mt", none).unwrap(), "mt_asset_x");
    assert_eq!(to_physical("test", "mt", none).unwrap(), "test");
    assert_eq!(to_physical("global_platform", "", none).unwrap(), "global_platform");
}

/// Tests the DW slot suffix.
#[test]
fn dw_databases_get_slot_suffix() {
    let physical = to_physical("global_ds_dw", "mt", || Ok(slot(2))).unwrap();
    assert_eq!(physical, "mt_global_ds_dw_2");
    assert_eq!(to_logical(&physical, "mt"), "global_ds_dw_2");
}

/// Tests global detection with and without prefix.
#[test]
fn global_detection_honours_prefix() {
    assert!(is_global_db("global_a", ""));
    assert!(is_global_db("mt_global_a", "mt"));
    assert!(!is_global_db("mt_global_a", ""));
    assert!(!is_global_db("public_data", "mt"));
    assert!(is_product_database("public_data"));
    assert!(!is_product_database("public_x"));
}

/// Tests that logical mapping ignores foreign prefixes.
#[test]
fn logical_mapping_strips_only_matching_prefix() {
    assert_eq!(to_logical("mt_global_a", "mt"), "global_a");
    assert_eq!(to_logical("xx_global_a", "mt"), "xx_global_a");
    assert_eq!(to_logical("mt_other", "mt"), "mt_other");
}

proptest! {
    /// Logical to physical and back is the identity for product databases.
    #[test]
    fn mapping_round_trips(name in "[a-z][a-z0-9]{0,12}", prefix in "[a-z]{1,4}") {
        let logical = format!("global_{name}");
        prop_assume!(!logical.ends_with("_dw"));
        let physical = to_physical(&logical, &prefix, || Ok(slot(1))).unwrap();
        prop_assert_eq!(to_logical(&physical, &prefix), logical.clone());
        let again = to_physical(&physical, &prefix, || Ok(slot(1))).unwrap();
        prop_assert_eq!(again, physical);
    }
}

// ============================================================================
// SECTION: Filters
// ============================================================================

/// Tests each filter action.
#[test]
fn filter_actions_match() {
    assert!(Filter::parse("starts-with:global_").unwrap().matches("global_a"));
    assert!(Filter::parse("ends-with:_dw").unwrap().matches("global_ds_dw"));
    assert!(Filter::parse("contains:plat").unwrap().matches("global_platform"));
    assert!(Filter::parse("regex:^GLOBAL_(a|b)$").unwrap().matches("global_b"));
    assert!(Filter::parse("global_a").unwrap().matches("global_a"));
    assert!(!Filter::parse("global_a").unwrap().matches("global_ab"));
}

/// Tests wildcard filters.
#[test]
fn wildcard_filters_match() {
    assert!(Filter::parse("global_*").unwrap().matches("global_x"));
    assert!(Filter::parse("*_dw").unwrap().matches("global_x_dw"));
    assert!(Filter::parse("global_*_dw*").unwrap().matches("global_x_dw_1"));
    assert!(!Filter::parse("global_*_dw*").unwrap().matches("asset_x_dw_1"));
}

/// Tests invalid filters.
#[test]
fn invalid_filters_are_rejected() {
    assert!(Filter::parse("").is_err());
    assert!(Filter::parse("regex:(").is_err());
}

// ============================================================================
// SECTION: DW Index Selector
// ============================================================================

/// Tests the request-id lookup and its cache.
#[test]
fn request_id_lookup_is_cached() {
    let (url, handle) = spawn_server(vec![r#"{"db": 2}"#]);
    let selector = HttpDbIndexSelector::new(url, RpcClient::new().unwrap());
    let request = DbIndexRequest {
        env: "mt".to_string(),
        request_id: Some("r-1".to_string()),
        background: false,
    };
    assert_eq!(selector.db_index(&request).unwrap(), slot(2));
    assert_eq!(selector.db_index(&request).unwrap(), slot(2));
    let seen = handle.join().unwrap();
    assert_eq!(seen, vec!["/db;by-request?env=mt&request_id=r-1".to_string()]);
}

/// Tests that background flips the current slot.
#[test]
fn background_flips_current_slot() {
    let (url, handle) = spawn_server(vec![r#"{"current": 1}"#]);
    let selector = HttpDbIndexSelector::new(url, RpcClient::new().unwrap());
    let request = DbIndexRequest {
        env: "mt".to_string(),
        request_id: None,
        background: true,
    };
    assert_eq!(selector.db_index(&request).unwrap(), slot(2));
    let seen = handle.join().unwrap();
    assert_eq!(seen, vec!["/current-db?env=mt".to_string()]);
}

/// Tests that slots outside 1 and 2 are rejected.
#[test]
fn out_of_range_slot_is_rejected() {
    assert!(DbIndex::new(0).is_err());
    assert!(DbIndex::new(3).is_err());
    assert_eq!(slot(1).flipped(), slot(2));
}
