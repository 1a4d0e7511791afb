// crates/mctech-core/tests/prepare_pipeline.rs
// ============================================================================
// Module: Preparation Pipeline Tests
// Description: Role resolution, hint formatting, actions and result assembly.
// Purpose: Validate the text half of the statement pipeline end to end.
// Dependencies: mctech-core
// ============================================================================

//! ## Overview
//! Exercises [`prepare_sql`] with the role and hint combinations that decide
//! a statement's tenant identity:
//! - Default results for plain SQL
//! - Role tenant codes, conflicts and the tenant-only/omit exclusion
//! - `global`, `mpp`, `impersonate` and `across` formatting
//! - `$replace` actions

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

use mctech_core::McTechError;
use mctech_core::MppMode;
use mctech_core::ParamValue;
use mctech_core::PreparedSql;
use mctech_core::SessionIdentity;
use mctech_core::format::format_boolean;
use mctech_core::format::format_param;
use mctech_core::prepare_sql;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn identity(roles: &[&str]) -> SessionIdentity {
    SessionIdentity {
        user: "mock_user".to_string(),
        roles: roles.iter().map(|role| (*role).to_string()).collect(),
    }
}

fn prepare(sql: &str, roles: &[&str]) -> Result<PreparedSql, McTechError> {
    prepare_sql(sql, &identity(roles), MppMode::Allow)
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Tests that plain SQL yields an empty identity with MPP allowed.
#[test]
fn plain_sql_has_default_result() {
    let prepared = prepare("select * from company", &[]).unwrap();
    let result = prepared.result;
    assert!(!result.global().set);
    assert_eq!(result.tenant_code(), "");
    assert_eq!(result.db_prefix(), "");
    assert_eq!(result.mpp(), MppMode::Allow);
    assert_eq!(prepared.sql, "select * from company");
}

/// Tests that the configured MPP default applies when no hint is present.
#[test]
fn configured_mpp_default_is_used() {
    let prepared = prepare_sql("select 1", &identity(&[]), MppMode::Force).unwrap();
    assert_eq!(prepared.result.mpp(), MppMode::Force);
}

// ============================================================================
// SECTION: Roles
// ============================================================================

/// Tests that a code role supplies the tenant and marks it as role-sourced.
#[test]
fn code_role_supplies_tenant() {
    let prepared = prepare("select 1", &["code_gslq"]).unwrap();
    assert_eq!(prepared.result.tenant_code(), "gslq");
    assert!(prepared.result.tenant().from_role);
    assert!(prepared.result.roles().tenant_only);
}

/// Tests that two code roles naming different tenants are rejected.
#[test]
fn conflicting_code_roles_are_rejected() {
    let err = prepare("select 1", &["code_a", "code_b"]).unwrap_err();
    assert_eq!(err, McTechError::MultipleTenantRoles("mock_user".to_string()));
    assert_eq!(err.to_string(), "user mock_user has roles with multiple tenants");
}

/// Tests that repeated code roles with the same tenant are accepted.
#[test]
fn repeated_code_roles_are_accepted() {
    let prepared = prepare("select 1", &["code_a", "CODE_a", "across_db"]).unwrap();
    assert_eq!(prepared.result.tenant_code(), "a");
    assert!(prepared.result.roles().across_db);
}

/// Tests that tenant_only and tenant_omit cannot be combined.
#[test]
fn tenant_only_with_tenant_omit_is_rejected() {
    let err = prepare("select 1", &["tenant_only", "tenant_omit"]).unwrap_err();
    assert_eq!(err, McTechError::TenantOnlyWithTenantOmit);
}

/// Tests that impersonating tenant_only is subject to the same exclusion.
#[test]
fn impersonation_with_tenant_omit_is_rejected() {
    let err = prepare("/*& impersonate:tenant_only */ select 1", &["tenant_omit"]).unwrap_err();
    assert_eq!(err, McTechError::TenantOnlyWithTenantOmit);
}

// ============================================================================
// SECTION: Tenant and Global
// ============================================================================

/// Tests that a hint tenant is used when roles carry none.
#[test]
fn hint_tenant_is_used_without_role() {
    let prepared = prepare("/*& tenant:'gdcd' */ select 1", &[]).unwrap();
    assert_eq!(prepared.result.tenant_code(), "gdcd");
    assert!(!prepared.result.tenant().from_role);
}

/// Tests that role and hint tenants must agree.
#[test]
fn role_and_hint_tenant_mismatch_is_rejected() {
    let err = prepare("/*& tenant:gdcd */ select 1", &["code_gslq"]).unwrap_err();
    assert_eq!(
        err,
        McTechError::TenantMismatch {
            role: "gslq".to_string(),
            hint: "gdcd".to_string(),
        }
    );
}

/// Tests that `global:true` with a tenant hint is rejected.
#[test]
fn global_with_tenant_is_rejected() {
    let err = prepare("/*& tenant:gdcd */ /*& global:true */ select 1", &[]).unwrap_err();
    assert_eq!(err, McTechError::GlobalWithTenant);
}

/// Tests the tenant-only user requesting `global`.
#[test]
fn global_under_tenant_only_is_rejected() {
    let err = prepare("/*& global:true */ select * from company", &["tenant_only"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "current user contains tenant-isolation role; `global` hint not permitted."
    );
}

/// Tests that `global:false` keeps the flag unset.
#[test]
fn global_false_leaves_flag_unset() {
    let prepared = prepare("/*& global:false */ select 1", &["tenant_only"]).unwrap();
    assert!(!prepared.result.global().set);
    assert!(!prepared.result.tenant_omit());
}

/// Tests that a global token list sets the flag and classifies tokens.
#[test]
fn global_tokens_are_classified() {
    let prepared = prepare("/*& global:'!a,-b +c' */ select 1", &[]).unwrap();
    let global = prepared.result.global();
    assert!(global.set);
    assert_eq!(global.excludes, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(global.includes, vec!["c".to_string()]);
    assert!(prepared.result.tenant_omit());
}

/// Tests that unprefixed global tokens are rejected.
#[test]
fn global_plain_token_is_rejected() {
    assert!(matches!(
        prepare("/*& global:abc */ select 1", &[]),
        Err(McTechError::InvalidParam { .. })
    ));
}

// ============================================================================
// SECTION: Formatters
// ============================================================================

/// Tests MPP mode parsing.
#[test]
fn mpp_values_are_enumerated() {
    let prepared = prepare("/*& mpp:force */ select 1", &[]).unwrap();
    assert_eq!(prepared.result.mpp(), MppMode::Force);
    assert!(prepare("/*& mpp:never */ select 1", &[]).is_err());
}

/// Tests that impersonation accepts only tenant_only.
#[test]
fn impersonate_values_are_enumerated() {
    let prepared = prepare("/*& impersonate:tenant_only */ select 1", &[]).unwrap();
    assert!(prepared.result.roles().tenant_only);
    assert!(prepare("/*& impersonate:admin */ select 1", &[]).is_err());
}

/// Tests `across` group parsing.
#[test]
fn across_groups_need_two_names() {
    let value = format_param("across", "global_a, global_b|global_c,global_d").unwrap();
    let ParamValue::Across(spec) = value else {
        panic!("expected across spec");
    };
    assert_eq!(spec.to_pipe_groups(), vec!["global_a|global_b", "global_c|global_d"]);
    assert!(format_param("across", "global_a").is_err());
    assert!(format_param("across", "global_a,global_b|global_c").is_err());
}

/// Tests boolean spellings.
#[test]
fn boolean_values_are_case_insensitive() {
    assert!(format_boolean("x", "TRUE").unwrap());
    assert!(format_boolean("x", "1").unwrap());
    assert!(!format_boolean("x", "0").unwrap());
    assert!(format_boolean("x", "yes").is_err());
}

/// Tests that unknown keys pass through as text.
#[test]
fn unknown_keys_pass_through() {
    let prepared = prepare("/*& requestId:abc */ /*& dbPrefix:mt */ select 1", &[]).unwrap();
    assert_eq!(prepared.result.request_id(), Some("abc"));
    assert_eq!(prepared.result.db_prefix(), "mt");
}

// ============================================================================
// SECTION: Actions
// ============================================================================

/// Tests replace with a parameter value.
#[test]
fn replace_uses_parameter_value() {
    let sql = "/*& tenant:gslq */ /*& $replace:tenant */ select * from t where tenant = '{{tenant}}'";
    let prepared = prepare(sql, &[]).unwrap();
    assert!(prepared.sql.ends_with("where tenant = 'gslq'"));
}

/// Tests replace with an inline literal.
#[test]
fn replace_uses_inline_literal() {
    let sql = "/*& $replace:name='abc' */ select '{{name}}', '{{name}}'";
    let prepared = prepare(sql, &[]).unwrap();
    assert!(prepared.sql.ends_with("select 'abc', 'abc'"));
}

/// Tests replace without any value.
#[test]
fn replace_without_value_is_rejected() {
    let err = prepare("/*& $replace:tenant */ select '{{tenant}}'", &[]).unwrap_err();
    assert_eq!(err, McTechError::MissingActionParam("tenant".to_string()));
}

/// Tests unknown actions.
#[test]
fn unknown_action_is_rejected() {
    let err = prepare("/*& $explode:x */ select 1", &[]).unwrap_err();
    assert_eq!(err.to_string(), "unsupported action: explode");
}
