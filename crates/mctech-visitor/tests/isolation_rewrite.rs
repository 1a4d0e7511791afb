// crates/mctech-visitor/tests/isolation_rewrite.rs
// ============================================================================
// Module: Isolation Rewrite Tests
// Description: Tenant predicates, tenant columns, mapping and DDL rules.
// Purpose: Validate statement rewriting end to end from hint-bearing SQL.
// Dependencies: mctech-core, mctech-visitor
// ============================================================================

//! ## Overview
//! Each test prepares SQL with [`prepare_sql`], parses the cleaned statement
//! and runs the extension chain, asserting on the rendered SQL and on the
//! flags recorded in the context:
//! - Tenant predicates for reads, joins, CTEs and subqueries
//! - Tenant columns for INSERT, LOAD DATA and IMPORT INTO
//! - `global` hint include/exclude lists and the tenant slot
//! - Database prefixing and DW slot mapping
//! - Version column rules and USE mapping

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

use std::sync::Arc;

use mctech_core::DbIndex;
use mctech_core::FixedDbIndexSelector;
use mctech_core::McTechContext;
use mctech_core::McTechError;
use mctech_core::MppMode;
use mctech_core::SessionFacts;
use mctech_core::SessionIdentity;
use mctech_core::prepare_sql;
use mctech_visitor::Extensions;
use mctech_visitor::Handled;
use mctech_visitor::Stmt;
use mctech_visitor::VersionColumn;
use mctech_visitor::VisitorError;
use mctech_visitor::bind_tenant_slots;
use mctech_visitor::collect_schema_info;
use mctech_visitor::parse_statement;
use mctech_visitor::resolve_stmt;
use mctech_visitor::validate;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn context(sql: &str, roles: &[&str], current_db: &str, using_param: bool) -> (McTechContext, Stmt) {
    let identity = SessionIdentity {
        user: "mock_user".to_string(),
        roles: roles.iter().map(|role| (*role).to_string()).collect(),
    };
    let prepared = prepare_sql(sql, &identity, MppMode::Allow).unwrap();
    let facts = SessionFacts {
        user: identity.user.clone(),
        current_db: current_db.to_string(),
        using_tenant_param: using_param,
        in_prepare_stmt: using_param,
    };
    let selector = Arc::new(FixedDbIndexSelector::new(DbIndex::new(1).unwrap()));
    let stmt = parse_statement(&prepared.sql).unwrap();
    (McTechContext::new(prepared.result, facts, selector), stmt)
}

fn rewrite(sql: &str, roles: &[&str]) -> String {
    let (mut ctx, mut stmt) = context(sql, roles, "", false);
    resolve_stmt(&mut ctx, &mut stmt).unwrap();
    stmt.to_string()
}

fn version_rules() -> Extensions {
    let version = VersionColumn::new("__version", &["starts-with:global_"]).unwrap();
    Extensions::new(Some(version), true)
}

fn apply_ddl(sql: &str) -> Result<String, VisitorError> {
    let (mut ctx, mut stmt) = context(sql, &[], "", false);
    version_rules().apply(&mut ctx, &mut stmt)?;
    Ok(stmt.to_string())
}

// ============================================================================
// SECTION: Reads
// ============================================================================

/// Tests the tenant predicate on a single global table.
#[test]
fn select_on_global_table_gains_tenant_predicate() {
    let (mut ctx, mut stmt) = context("select * from global_platform.company", &["code_gslq"], "", false);
    let resolved = resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert_eq!(stmt.to_string(), "SELECT * FROM global_platform.company WHERE (company.tenant = 'gslq')");
    assert_eq!(resolved.dbs, vec!["global_platform".to_string()]);
    assert!(ctx.sql_rewritten());
    assert!(ctx.sql_has_global_db());
    assert!(validate(&ctx).is_ok());
}

/// Tests that existing predicates follow the tenant predicate.
#[test]
fn existing_where_is_kept_after_tenant_predicate() {
    let sql = rewrite("select id from global_platform.company where id = 1", &["code_gslq"]);
    assert_eq!(sql, "SELECT id FROM global_platform.company WHERE (company.tenant = 'gslq') AND (id = 1)");
}

/// Tests that ON joins receive their table's predicate.
#[test]
fn joined_table_predicate_goes_into_on_clause() {
    let sql = rewrite(
        "select a.id from global_platform.company as a join global_platform.staff as b on a.id = b.company_id",
        &["code_gslq"],
    );
    assert!(sql.contains("ON (b.tenant = 'gslq') AND (a.id = b.company_id)"), "{sql}");
    assert!(sql.ends_with("WHERE (a.tenant = 'gslq')"), "{sql}");
}

/// Tests that USING joins put every predicate into WHERE.
#[test]
fn using_join_predicates_go_into_where() {
    let sql = rewrite(
        "select * from global_platform.company as a join global_platform.staff as b using (id)",
        &["code_gslq"],
    );
    assert!(sql.ends_with("WHERE (a.tenant = 'gslq') AND (b.tenant = 'gslq')"), "{sql}");
}

/// Tests that CTE references are not treated as tables.
#[test]
fn cte_reference_is_not_rewritten() {
    let sql = rewrite("with c as (select id from global_platform.company) select * from c", &["code_gslq"]);
    assert_eq!(
        sql,
        "WITH c AS (SELECT id FROM global_platform.company WHERE (company.tenant = 'gslq')) SELECT * FROM c"
    );
}

/// Tests predicates inside subqueries.
#[test]
fn subquery_tables_are_rewritten() {
    let sql = rewrite(
        "select * from global_platform.company where id in (select company_id from global_platform.staff)",
        &["code_gslq"],
    );
    assert!(sql.contains("SELECT company_id FROM global_platform.staff WHERE (staff.tenant = 'gslq')"), "{sql}");
    assert!(sql.contains("WHERE (company.tenant = 'gslq') AND"), "{sql}");
}

/// Tests predicates inside `ANY` / `ALL` subqueries and their databases.
#[test]
fn quantified_subqueries_are_rewritten() {
    let (mut ctx, mut stmt) = context(
        "select * from global_platform.company where id = any (select company_id from global_platform.staff) \
         and id <> all (select id from global_ds.b)",
        &["code_gslq"],
        "",
        false,
    );
    let resolved = resolve_stmt(&mut ctx, &mut stmt).unwrap();
    let sql = stmt.to_string();
    assert!(sql.contains("SELECT company_id FROM global_platform.staff WHERE (staff.tenant = 'gslq')"), "{sql}");
    assert!(sql.contains("SELECT id FROM global_ds.b WHERE (b.tenant = 'gslq')"), "{sql}");
    assert!(resolved.dbs.contains(&"global_ds".to_string()), "{:?}", resolved.dbs);
}

/// Tests subqueries under ORDER BY, GROUP BY and REGEXP.
#[test]
fn subqueries_outside_where_are_rewritten() {
    let ordered = rewrite(
        "select id from global_platform.company order by (select max(id) from global_platform.staff)",
        &["code_gslq"],
    );
    assert!(ordered.contains("SELECT max(id) FROM global_platform.staff WHERE (staff.tenant = 'gslq')"), "{ordered}");

    let grouped = rewrite(
        "select count(*) from global_platform.company group by (select max(id) from global_platform.staff)",
        &["code_gslq"],
    );
    assert!(grouped.contains("FROM global_platform.staff WHERE (staff.tenant = 'gslq')"), "{grouped}");

    let matched = rewrite(
        "select * from global_platform.company where name regexp (select pattern from global_platform.staff limit 1)",
        &["code_gslq"],
    );
    assert!(matched.contains("FROM global_platform.staff WHERE (staff.tenant = 'gslq') LIMIT 1"), "{matched}");
}

/// Tests subqueries inside `ON DUPLICATE KEY UPDATE` assignments.
#[test]
fn on_duplicate_key_subquery_is_rewritten() {
    let sql = rewrite(
        "insert into global_platform.company (id, name) values (1, 'a') \
         on duplicate key update name = (select n from global_platform.staff limit 1)",
        &["code_gslq"],
    );
    assert!(sql.contains("SELECT n FROM global_platform.staff WHERE (staff.tenant = 'gslq') LIMIT 1"), "{sql}");
}

/// Tests that same-named tables from two databases are told apart.
#[test]
fn shared_table_names_are_schema_qualified() {
    let sql = rewrite("select * from global_ds.item, global_qa.item", &["code_gslq"]);
    assert!(
        sql.ends_with("WHERE (global_ds.item.tenant = 'gslq') AND (global_qa.item.tenant = 'gslq')"),
        "{sql}"
    );
    let single = rewrite("select * from global_ds.item", &["code_gslq"]);
    assert!(single.ends_with("WHERE (item.tenant = 'gslq')"), "{single}");
}

/// Tests that rewriting twice yields the same statement.
#[test]
fn rewriting_is_idempotent() {
    let (mut ctx, mut stmt) = context("select * from global_platform.company as c", &["code_gslq"], "", false);
    resolve_stmt(&mut ctx, &mut stmt).unwrap();
    let once = stmt.to_string();
    resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert_eq!(stmt.to_string(), once);
}

/// Tests that non-global databases are left alone.
#[test]
fn non_global_tables_are_not_rewritten() {
    let (mut ctx, mut stmt) = context("select * from orders", &["code_gslq"], "biz", false);
    let resolved = resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert_eq!(stmt.to_string(), "SELECT * FROM biz.orders");
    assert!(resolved.dbs.is_empty());
    assert!(!ctx.sql_rewritten());
    assert!(!ctx.sql_has_global_db());
}

/// Tests that DDL statements are skipped by isolation.
#[test]
fn ddl_is_skipped_by_isolation() {
    let (mut ctx, mut stmt) = context("drop table global_platform.company", &["code_gslq"], "", false);
    let resolved = resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert!(resolved.skipped);
}

// ============================================================================
// SECTION: Global Hint
// ============================================================================

/// Tests include/exclude lists from the global hint.
#[test]
fn global_hint_lists_become_in_predicates() {
    let (mut ctx, mut stmt) =
        context("/*& global:'-a +b' */ select * from global_platform.company", &[], "", false);
    let resolved = resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert_eq!(
        stmt.to_string(),
        "SELECT * FROM global_platform.company WHERE (company.tenant NOT IN ('a')) AND (company.tenant IN ('b'))"
    );
    assert!(resolved.dbs.is_empty());
    assert!(!ctx.sql_rewritten());
    assert!(validate(&ctx).is_ok());
}

/// Tests that `global:true` alone reads every tenant.
#[test]
fn global_hint_alone_leaves_statement_unchanged() {
    let (mut ctx, mut stmt) = context("/*& global:true */ select * from global_platform.company", &[], "", false);
    resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert_eq!(stmt.to_string(), "SELECT * FROM global_platform.company");
    assert!(ctx.sql_has_global_db());
    assert!(validate(&ctx).is_ok());
}

/// Tests that global reads without a tenant are rejected.
#[test]
fn global_read_without_tenant_is_rejected() {
    let (mut ctx, mut stmt) = context("select * from global_platform.company", &[], "", false);
    resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert_eq!(validate(&ctx), Err(McTechError::TenantRequired("mock_user".to_string())));
}

// ============================================================================
// SECTION: Writes
// ============================================================================

/// Tests the tenant column on INSERT ... VALUES.
#[test]
fn insert_values_gain_tenant_column() {
    let sql = rewrite("insert into global_platform.company (id, name) values (1, 'a'), (2, 'b')", &["code_gslq"]);
    assert_eq!(
        sql,
        "INSERT INTO global_platform.company (id, name, tenant) VALUES (1, 'a', 'gslq'), (2, 'b', 'gslq')"
    );
}

/// Tests the tenant column on INSERT ... SELECT.
#[test]
fn insert_select_projects_tenant() {
    let sql = rewrite(
        "insert into global_platform.company (id, name) select id, name from global_platform.staff",
        &["code_gslq"],
    );
    assert_eq!(
        sql,
        "INSERT INTO global_platform.company (id, name, tenant) SELECT id, name, 'gslq' AS tenant FROM global_platform.staff WHERE (staff.tenant = 'gslq')"
    );
}

/// Tests that INSERT without a column list is rejected.
#[test]
fn insert_without_columns_is_rejected() {
    let (mut ctx, mut stmt) = context("insert into global_platform.company values (1)", &["code_gslq"], "", false);
    let err = resolve_stmt(&mut ctx, &mut stmt).unwrap_err();
    assert_eq!(err, VisitorError::MissingColumns("insert"));
}

/// Tests UPDATE and DELETE predicates.
#[test]
fn update_and_delete_gain_predicates() {
    let update = rewrite("update global_platform.company set name = 'x' where id = 1", &["code_gslq"]);
    assert_eq!(
        update,
        "UPDATE global_platform.company SET name = 'x' WHERE (company.tenant = 'gslq') AND (id = 1)"
    );
    let delete = rewrite("delete from global_platform.company where id = 1", &["code_gslq"]);
    assert!(delete.ends_with("WHERE (company.tenant = 'gslq') AND (id = 1)"), "{delete}");
}

/// Tests LOAD DATA gaining a tenant assignment.
#[test]
fn load_data_gains_tenant_assignment() {
    let sql = rewrite(
        "load data local infile '/tmp/a.csv' into table global_platform.company (id, name)",
        &["code_gslq"],
    );
    assert_eq!(
        sql,
        "LOAD DATA LOCAL INFILE '/tmp/a.csv' INTO TABLE global_platform.company (id, name) SET tenant = 'gslq'"
    );
}

/// Tests IMPORT INTO for file and query sources.
#[test]
fn import_into_gains_tenant() {
    let file = rewrite("import into global_platform.company (id, name) from '/data/c.csv'", &["code_gslq"]);
    assert_eq!(
        file,
        "IMPORT INTO global_platform.company (id, name) SET tenant = 'gslq' FROM '/data/c.csv'"
    );
    let query = rewrite(
        "import into global_platform.company (id) from select id from global_platform.staff",
        &["code_gslq"],
    );
    assert!(query.starts_with("IMPORT INTO global_platform.company (id, tenant) FROM SELECT id, 'gslq' AS tenant"), "{query}");
}

// ============================================================================
// SECTION: Tenant Slot
// ============================================================================

/// Tests the tenant slot and its binding at execute time.
#[test]
fn prepared_statements_use_the_tenant_slot() {
    let (mut ctx, mut stmt) = context("select * from global_platform.company", &["code_gslq"], "", true);
    resolve_stmt(&mut ctx, &mut stmt).unwrap();
    assert_eq!(
        stmt.to_string(),
        "SELECT * FROM global_platform.company WHERE (company.tenant = :mctech_tenant)"
    );
    assert_eq!(bind_tenant_slots(&mut stmt, "gslq"), 1);
    assert_eq!(stmt.to_string(), "SELECT * FROM global_platform.company WHERE (company.tenant = 'gslq')");
}

// ============================================================================
// SECTION: Mapping
// ============================================================================

/// Tests database prefixing during the walk.
#[test]
fn prefixed_databases_are_mapped_and_rewritten() {
    let sql = rewrite("/*& dbPrefix:mt */ select * from global_platform.company", &["code_gslq"]);
    assert_eq!(sql, "SELECT * FROM mt_global_platform.company WHERE (company.tenant = 'gslq')");
}

/// Tests DW slot suffixing and schema collection.
#[test]
fn dw_databases_gain_slot_suffix() {
    let (ctx, mut stmt) = context("select * from global_ec_dw.orders", &["code_gslq"], "", false);
    let schema = collect_schema_info(&ctx, &mut stmt).unwrap();
    assert_eq!(stmt.to_string(), "SELECT * FROM global_ec_dw_1.orders");
    assert_eq!(schema.keys(), vec!["global_ec_dw_1|orders".to_string()]);
}

/// Tests USE mapping through the extension chain.
#[test]
fn use_statement_maps_and_switches_database() {
    let (mut ctx, mut stmt) = context("/*& dbPrefix:mt */ use global_platform", &[], "", false);
    let (handled, _) = version_rules().apply(&mut ctx, &mut stmt).unwrap();
    assert_eq!(handled, Handled::Misc);
    assert_eq!(stmt.to_string(), "USE mt_global_platform");
    assert_eq!(ctx.current_db(), "mt_global_platform");
}

// ============================================================================
// SECTION: Version Column
// ============================================================================

/// Tests the version column appended on CREATE TABLE.
#[test]
fn create_table_gains_version_column() {
    let sql = apply_ddl("create table global_platform.t (id int)").unwrap();
    assert!(
        sql.contains("__version BIGINT NOT NULL DEFAULT MCTECH_SEQUENCE() ON UPDATE MCTECH_SEQUENCE()"),
        "{sql}"
    );
}

/// Tests that untracked databases keep their DDL.
#[test]
fn untracked_database_is_left_alone() {
    let sql = apply_ddl("create table biz.t (id int)").unwrap();
    assert!(!sql.contains("__version"), "{sql}");
    assert!(apply_ddl("alter table biz.t drop column __version").is_ok());
}

/// Tests the reserved name on CREATE TABLE.
#[test]
fn declaring_version_column_is_rejected() {
    let err = apply_ddl("create table global_platform.t (id int, __version bigint)").unwrap_err();
    assert_eq!(err, VisitorError::Ddl("'__version' is reserved column name".to_string()));
}

/// Tests the ALTER TABLE guards.
#[test]
fn alter_table_guards_version_column() {
    let dropped = apply_ddl("alter table global_platform.t drop column __version").unwrap_err();
    assert_eq!(dropped, VisitorError::Ddl("'__version' column cannot be dropped".to_string()));
    let renamed = apply_ddl("alter table global_platform.t rename column __version to v").unwrap_err();
    assert_eq!(renamed, VisitorError::Ddl("'__version' column cannot be renamed".to_string()));
    let renamed_to = apply_ddl("alter table global_platform.t rename column v to __version").unwrap_err();
    assert_eq!(
        renamed_to,
        VisitorError::Ddl("renaming another column to '__version' is not supported".to_string())
    );
    assert!(apply_ddl("alter table global_platform.t modify column __version int").is_err());
    assert!(apply_ddl("alter table global_platform.t add column name varchar(10)").is_ok());
}

/// Tests the accepted version column definitions.
#[test]
fn matching_version_definition_is_accepted() {
    let sql = "alter table global_platform.t modify column __version bigint not null \
               default mctech_sequence() on update mctech_sequence() comment 'v'";
    assert!(apply_ddl(sql).is_ok());
}
