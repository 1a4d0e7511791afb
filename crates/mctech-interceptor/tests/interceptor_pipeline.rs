// crates/mctech-interceptor/tests/interceptor_pipeline.rs
// ============================================================================
// Module: Interceptor Pipeline Tests
// Description: Statements driven through every hook with in-memory sinks.
// Purpose: Validate isolation, policy rejections, MPP handling and tracing.
// Dependencies: mctech-config, mctech-core, mctech-interceptor,
//               mctech-visitor, mctech-worker
// ============================================================================

//! ## Overview
//! Each test builds an [`Interceptor`] from a TOML snippet, runs SQL through
//! `before_parse_sql`, the parser and `after_parse_sql`, then inspects the
//! rewritten statement, the session and the memory sinks:
//! - Tenant predicates and `USE` mapping
//! - `global` under tenant-only roles, cross-db groups, deny digests
//! - MPP variable override and restore
//! - Large query stanzas, full SQL trace records and ignore lists

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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mctech_config::McTechConfig;
use mctech_core::DbIndex;
use mctech_core::FixedDbIndexSelector;
use mctech_core::LogLevel;
use mctech_core::McTechError;
use mctech_core::log::MemoryLogSink;
use mctech_core::log::MemoryTraceSink;
use mctech_interceptor::ExecStats;
use mctech_interceptor::InterceptError;
use mctech_interceptor::InterceptResult;
use mctech_interceptor::Interceptor;
use mctech_interceptor::InterceptorParts;
use mctech_interceptor::Session;
use mctech_interceptor::mpp::ENFORCE_MPP;
use mctech_interceptor::mpp::ISOLATION_READ_ENGINES;
use mctech_visitor::Stmt;
use mctech_visitor::parse_statement;
use mctech_worker::CROSS_DB_TABLE;
use mctech_worker::CrossDbGroup;
use mctech_worker::CrossDbInfo;
use mctech_worker::CrossDbWorker;
use mctech_worker::DENY_DIGEST_TABLE;
use mctech_worker::DenyDigestEntry;
use mctech_worker::DenyDigestWorker;
use mctech_worker::InvokerPattern;
use mctech_worker::InvokerType;
use mctech_worker::digest::parse_datetime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Interceptor plus the sinks it writes to.
struct Harness {
    interceptor: Interceptor,
    log: Arc<MemoryLogSink>,
    large_query: Arc<MemoryTraceSink>,
    trace: Arc<MemoryTraceSink>,
    deny_digests: Arc<DenyDigestWorker>,
    cross_db: Arc<CrossDbWorker>,
}

const BASE_CONFIG: &str = r#"
[sequence]
mock = true

[encryption]
mock = true
"#;

/// Builds a harness; `extra` may restate `[tenant]` or `[db-checker]`.
fn harness(extra: &str) -> Harness {
    let mut text = format!("{BASE_CONFIG}\n{extra}\n");
    if !extra.contains("[tenant]") {
        text.push_str("[tenant]\nenabled = true\n");
    }
    if !extra.contains("[db-checker]") {
        text.push_str("[db-checker]\nenabled = true\n");
    }
    let config = McTechConfig::from_toml_str(&text).unwrap();
    let log = Arc::new(MemoryLogSink::new());
    let large_query = Arc::new(MemoryTraceSink::new());
    let trace = Arc::new(MemoryTraceSink::new());
    let deny_digests = Arc::new(DenyDigestWorker::new(DENY_DIGEST_TABLE));
    let cross_db = Arc::new(CrossDbWorker::new(CROSS_DB_TABLE));
    let parts = InterceptorParts {
        selector: Arc::new(FixedDbIndexSelector::new(DbIndex::new(1).unwrap())),
        deny_digests: Arc::clone(&deny_digests),
        cross_db: Arc::clone(&cross_db),
        large_query_sink: large_query.clone(),
        trace_sink: trace.clone(),
        log: log.clone(),
    };
    Harness {
        interceptor: Interceptor::new(Arc::new(config), parts).unwrap(),
        log,
        large_query,
        trace,
        deny_digests,
        cross_db,
    }
}

fn new_session(roles: &[&str]) -> Session {
    let mut session = Session::new("mock_user", roles.iter().map(|role| (*role).to_string()).collect());
    session.connection_id = 62;
    session
}

/// Runs the parsing hooks over `sql`.
fn run(interceptor: &Interceptor, session: &mut Session, sql: &str) -> InterceptResult<Stmt> {
    let prepared = interceptor.before_parse_sql(session, sql)?;
    let mut stmt = parse_statement(&prepared)?;
    interceptor.after_parse_sql(session, &mut stmt)?;
    Ok(stmt)
}

fn stats() -> ExecStats {
    ExecStats {
        query: Duration::from_millis(3),
        parse: Duration::from_millis(1),
        send: Duration::from_millis(1),
        result_rows: 2,
        ..ExecStats::default()
    }
}

// ============================================================================
// SECTION: Isolation
// ============================================================================

/// Tests tenant injection on a global table read by a tenant role.
#[test]
fn tenant_role_select_gains_predicate() {
    let harness = harness("");
    let mut session = new_session(&["code_gslq"]);
    let stmt = run(&harness.interceptor, &mut session, "select * from global_platform.company").unwrap();
    assert_eq!(stmt.to_string(), "SELECT * FROM global_platform.company WHERE (company.tenant = 'gslq')");
    assert_eq!(session.statement_dbs(), ["global_platform".to_string()]);
    assert_eq!(session.context().unwrap().prepare_result().tenant_code(), "gslq");
}

/// Tests that a global read without any tenant is rejected and logged.
#[test]
fn global_read_without_tenant_fails() {
    let harness = harness("");
    let mut session = new_session(&[]);
    let err = run(&harness.interceptor, &mut session, "select * from global_platform.company").unwrap_err();
    assert_eq!(err, InterceptError::Policy(McTechError::TenantRequired("mock_user".to_string())));
    let records = harness.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, LogLevel::Warn);
    assert_eq!(records[0].message, "mctech SQL failed");
    assert_eq!(records[0].fields["SQL"], "select * from global_platform.company");
}

/// Tests that a `global` hint is refused for tenant-only users.
#[test]
fn global_hint_under_tenant_only_fails() {
    let harness = harness("");
    let mut session = new_session(&["tenant_only"]);
    let err = run(&harness.interceptor, &mut session, "/*& global:true */ select * from company").unwrap_err();
    assert_eq!(err.to_string(), "current user contains tenant-isolation role; `global` hint not permitted.");
    assert!(session.context().is_none());
}

/// Tests that a mapped `USE` moves the session database.
#[test]
fn use_statement_moves_session_database() {
    let harness = harness("");
    let mut session = new_session(&["code_gslq"]);
    let stmt = run(&harness.interceptor, &mut session, "/*& dbPrefix:mt */ use global_platform").unwrap();
    assert_eq!(stmt.to_string(), "USE mt_global_platform");
    assert_eq!(session.current_db, "mt_global_platform");
    assert!(session.db_changed());
}

// ============================================================================
// SECTION: Cross-Database Checks
// ============================================================================

const FOUR_DBS: &str = "/*& across:'global_ds,global_qa,global_sq' */ \
    select * from global_sq.a, global_ds.b, global_qa.c, global_mb.d";

/// Tests rejection when no group holds every mutex database.
#[test]
fn databases_outside_one_group_are_rejected() {
    let harness = harness("");
    let mut session = new_session(&["code_gslq"]);
    let err = run(&harness.interceptor, &mut session, FOUR_DBS).unwrap_err();
    assert_eq!(
        err,
        InterceptError::Policy(McTechError::CrossDbForbidden {
            groups: "[{global_ds,global_qa,global_sq} global_mb]".to_string(),
        })
    );
    assert!(err.to_string().starts_with("dbs not allow in the same statement"));
    let records = harness.log.records();
    assert!(records.iter().any(|record| record.target == "mctech_checker"));
}

/// Tests that the hinted group alone lets its databases through.
#[test]
fn hinted_group_allows_its_databases() {
    let harness = harness("");
    let mut session = new_session(&["code_gslq"]);
    let sql = "/*& across:'global_ds,global_qa' */ select * from global_ds.b, global_qa.c";
    assert!(run(&harness.interceptor, &mut session, sql).is_ok());
}

/// Tests that an invoker rule with `allow_all` bypasses grouping.
#[test]
fn allow_all_invoker_rule_passes() {
    let harness = harness("");
    let pattern = InvokerPattern::new("svc", InvokerType::Service);
    harness.cross_db.set_all(HashMap::from([(pattern.key(), CrossDbInfo::new(true, Vec::new(), Vec::new()))]));
    let mut session = new_session(&["code_gslq"]);
    let sql = format!("/* from:'svc' */ {FOUR_DBS}");
    assert!(run(&harness.interceptor, &mut session, &sql).is_ok());
}

/// Tests that a package rule group covering every database passes.
#[test]
fn package_rule_group_passes() {
    let harness = harness("");
    let pattern = InvokerPattern::new("@mctech/dp", InvokerType::Package);
    let group = CrossDbGroup {
        id: 1002,
        dbs: vec!["global_ds".to_string(), "global_mb".to_string()],
    };
    harness.cross_db.set_all(HashMap::from([(pattern.key(), CrossDbInfo::new(false, vec![group], Vec::new()))]));
    let mut session = new_session(&["code_gslq"]);
    let sql = "/* package:'@mctech/dp' */ select * from global_ds.b, global_mb.d";
    assert!(run(&harness.interceptor, &mut session, sql).is_ok());
    let mut other = new_session(&["code_gslq"]);
    assert!(run(&harness.interceptor, &mut other, "select * from global_ds.b, global_mb.d").is_err());
}

/// Tests that `excepts` skips the check for a listed service.
#[test]
fn excepted_service_is_not_checked() {
    let harness = harness("[db-checker]\nenabled = true\nexcepts = [\"svc\"]");
    let mut session = new_session(&["code_gslq"]);
    let sql = format!("/* from:'svc.line' */ {FOUR_DBS}");
    assert!(run(&harness.interceptor, &mut session, &sql).is_ok());
}

/// Tests that a tenant-only role with a hinted tenant is still checked.
#[test]
fn tenant_only_role_with_hinted_tenant_is_checked() {
    let harness = harness("");
    let mut session = new_session(&["tenant_only"]);
    let sql = format!("/*& tenant:gslq */ {FOUR_DBS}");
    let err = run(&harness.interceptor, &mut session, &sql).unwrap_err();
    assert!(matches!(err, InterceptError::Policy(McTechError::CrossDbForbidden { .. })), "{err}");
}

/// Tests that impersonating a tenant-only role enables the check.
#[test]
fn impersonated_tenant_only_is_checked() {
    let harness = harness("");
    let mut session = new_session(&[]);
    let sql = format!("/*& impersonate:tenant_only */ /*& tenant:gslq */ {FOUR_DBS}");
    let err = run(&harness.interceptor, &mut session, &sql).unwrap_err();
    assert!(matches!(err, InterceptError::Policy(McTechError::CrossDbForbidden { .. })), "{err}");
}

/// Tests that a hinted tenant without any tenant-only identity is not checked.
#[test]
fn hinted_tenant_without_tenant_only_is_not_checked() {
    let harness = harness("");
    let mut session = new_session(&[]);
    let sql = format!("/*& tenant:gslq */ {FOUR_DBS}");
    assert!(run(&harness.interceptor, &mut session, &sql).is_ok());
}

// ============================================================================
// SECTION: Deny Digests
// ============================================================================

/// Tests the execute-time digest gate.
#[test]
fn denied_digest_fails_execution() {
    let harness = harness("[sql-checker]\nenabled = true");
    let expired_at = parse_datetime("9999-10-01").unwrap();
    harness.deny_digests.set_all(HashMap::from([("d2".to_string(), Arc::new(DenyDigestEntry::new(expired_at)))]));
    let session = new_session(&["code_gslq"]);
    assert!(harness.interceptor.check_deny_digest(&session, "d1").is_ok());
    let err = harness.interceptor.check_deny_digest(&session, "d2").unwrap_err();
    assert!(err.to_string().starts_with("current sql is rejected and resumed at '9999-10-01"), "{err}");
    assert!(harness.deny_digests.get("d2").unwrap().last_request_time().is_some());
}

/// Tests that the gate is off unless `sql-checker.enabled` is set.
#[test]
fn digest_gate_disabled_by_default() {
    let harness = harness("");
    let expired_at = parse_datetime("9999-10-01").unwrap();
    harness.deny_digests.set_all(HashMap::from([("d2".to_string(), Arc::new(DenyDigestEntry::new(expired_at)))]));
    assert!(harness.interceptor.check_deny_digest(&new_session(&[]), "d2").is_ok());
}

// ============================================================================
// SECTION: Prepared Statements
// ============================================================================

/// Tests that PREPARE bodies use the tenant slot and bind at execute.
#[test]
fn prepared_body_binds_tenant_at_execute() {
    let harness = harness("");
    let mut session = new_session(&["code_gslq"]);
    harness.interceptor.before_parse_sql(&mut session, "prepare st from 'select * from global_platform.company'").unwrap();
    let mut stmt = harness.interceptor.prepare_statement(&mut session, "select * from global_platform.company").unwrap();
    assert!(stmt.to_string().contains(":mctech_tenant"), "{stmt}");
    assert_eq!(harness.interceptor.bind_prepared(&session, &mut stmt).unwrap(), 1);
    assert!(stmt.to_string().contains("company.tenant = 'gslq'"), "{stmt}");
}

/// Tests that `tenant.forbidden-prepare` refuses PREPARE.
#[test]
fn forbidden_prepare_is_refused() {
    let harness = harness("[tenant]\nenabled = true\nforbidden-prepare = true");
    let mut session = new_session(&["code_gslq"]);
    harness.interceptor.before_parse_sql(&mut session, "prepare st from 'select 1'").unwrap();
    let err = harness.interceptor.prepare_statement(&mut session, "select 1").unwrap_err();
    assert_eq!(err.to_string(), "[mctech] PREPARE not allowed");
}

// ============================================================================
// SECTION: MPP
// ============================================================================

/// Tests that `mpp:force` overrides engine variables for one query only.
#[test]
fn mpp_force_is_restored_after_statement() {
    let harness = harness("");
    let mut session = new_session(&["code_gslq"]);
    session.vars.insert(ISOLATION_READ_ENGINES.to_string(), "tikv,tiflash,tidb".to_string());
    let stmt = run(&harness.interceptor, &mut session, "/*& mpp:force */ select * from global_platform.company").unwrap();
    assert_eq!(session.vars[ISOLATION_READ_ENGINES], "tiflash,tidb");
    assert_eq!(session.vars[ENFORCE_MPP], "1");

    harness.interceptor.after_handle_stmt(&mut session, &stmt, &stats(), true);
    assert_eq!(session.vars[ISOLATION_READ_ENGINES], "tikv,tiflash,tidb");
    assert!(!session.vars.contains_key(ENFORCE_MPP));
}

/// Tests that MPP hints do not touch non-query statements.
#[test]
fn mpp_ignored_for_writes() {
    let harness = harness("");
    let mut session = new_session(&["code_gslq"]);
    let sql = "/*& mpp:force */ update global_platform.company set name = 'x' where id = 1";
    run(&harness.interceptor, &mut session, sql).unwrap();
    assert!(session.vars.is_empty());
}

// ============================================================================
// SECTION: Tracing
// ============================================================================

const TRACING: &str = r#"
[metrics.sql-trace]
enabled = true
compress-threshold = 64

[metrics.large-query]
enabled = true
threshold = 16
"#;

/// Tests the full SQL trace record of a successful select.
#[test]
fn successful_select_is_traced() {
    let harness = harness(TRACING);
    let mut session = new_session(&["code_gslq"]);
    let stmt = run(&harness.interceptor, &mut session, "select * from global_platform.company").unwrap();
    harness.interceptor.after_handle_stmt(&mut session, &stmt, &stats(), true);

    let entries = harness.trace.entries();
    assert_eq!(entries.len(), 1);
    let record: serde_json::Value = serde_json::from_str(&entries[0]).unwrap();
    assert_eq!(record["tp"], "select");
    assert_eq!(record["tenant"], "gslq");
    assert_eq!(record["dbs"], "global_platform");
    assert_eq!(record["usr"], "mock_user");
    assert_eq!(record["conn"], "10");
    assert_eq!(record["time"]["all"], "4ms");
    assert_eq!(record["rows"], 2);
    assert_eq!(record["sql"], "select * from global_platform.company");
    assert!(record.get("zip").is_none());
    assert!(session.context().is_none());
}

/// Tests that long statements are zipped in the trace record.
#[test]
fn long_statement_trace_is_zipped() {
    let harness = harness(TRACING);
    let mut session = new_session(&["code_gslq"]);
    let sql = format!("select * from global_platform.company where name = '{}'", "n".repeat(300));
    let stmt = run(&harness.interceptor, &mut session, &sql).unwrap();
    harness.interceptor.after_handle_stmt(&mut session, &stmt, &stats(), true);
    let record: serde_json::Value = serde_json::from_str(&harness.trace.entries()[0]).unwrap();
    assert!(record["sql"].as_str().unwrap().ends_with(&format!("...len({})", sql.len())));
    assert!(record["zip"].as_str().is_some());
}

/// Tests that failed statements reach the large query log but not the trace.
#[test]
fn failed_statement_only_reaches_large_query_log() {
    let harness = harness(TRACING);
    let mut session = new_session(&["code_gslq"]);
    let sql = "/* from:'org-service.pf' */ select * from global_platform.company";
    let stmt = run(&harness.interceptor, &mut session, sql).unwrap();
    harness.interceptor.after_handle_stmt(&mut session, &stmt, &stats(), false);

    assert!(harness.trace.entries().is_empty());
    let stanzas = harness.large_query.entries();
    assert_eq!(stanzas.len(), 1);
    assert!(stanzas[0].starts_with("# TIME: "));
    assert!(stanzas[0].contains("# SUCC: false\n"));
    assert!(stanzas[0].contains("# SQL_TYPE: select\n"));
    assert!(stanzas[0].contains("# APP_NAME: org-service\n"));
    assert!(stanzas[0].contains("# PRODUCT_LINE: pf\n"));
}

/// Tests the role and database ignore lists.
#[test]
fn ignored_roles_and_databases_are_not_traced() {
    let harness = harness(TRACING);
    let mut reader = new_session(&["code_gslq", "mc_read"]);
    let stmt = run(&harness.interceptor, &mut reader, "select * from global_platform.company").unwrap();
    harness.interceptor.after_handle_stmt(&mut reader, &stmt, &stats(), true);

    let mut tester = new_session(&[]).with_db("test");
    let stmt = run(&harness.interceptor, &mut tester, "select * from t").unwrap();
    harness.interceptor.after_handle_stmt(&mut tester, &stmt, &stats(), true);

    assert!(harness.trace.entries().is_empty());
    assert!(harness.large_query.entries().is_empty());
}

/// Tests that internal statements are never traced.
#[test]
fn restricted_session_is_not_traced() {
    let harness = harness(TRACING);
    let mut internal = new_session(&["code_gslq"]);
    internal.restricted = true;
    let stmt = run(&harness.interceptor, &mut internal, "select * from global_platform.company").unwrap();
    harness.interceptor.after_handle_stmt(&mut internal, &stmt, &stats(), true);
    assert!(harness.trace.entries().is_empty());
}

/// Tests the query log record of an accepted statement.
#[test]
fn query_log_truncates_statement() {
    let harness = harness("[metrics.query-log]\nenabled = true\nmax-length = 12");
    let mut session = new_session(&["code_gslq"]);
    run(&harness.interceptor, &mut session, "select * from global_platform.company").unwrap();
    let records = harness.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, LogLevel::Info);
    assert_eq!(records[0].fields["SQL"], "select * fro");
}
