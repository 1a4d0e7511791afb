// crates/mctech-interceptor/src/checker.rs
// ============================================================================
// Module: Cross-Database Checker
// Description: Rejects statements that mix mutually exclusive databases.
// Purpose: Keep tenant-bound sessions inside one configured database group.
// Dependencies: mctech-config, mctech-core, mctech-worker
// ============================================================================

//! ## Overview
//! The checker projects the physical databases a statement touched to their
//! logical names and keeps the *mutex* ones: those matched by a
//! `db-checker.mutex` filter and by no `db-checker.exclude` filter.
//! Two or more mutex databases pass only when one group holds all of them.
//! Groups are tried in this order:
//! 1. the statement's `across` hint
//! 2. the configured `db-checker.across` groups
//! 3. the cross-db rules of the invoking service, then of the package, each
//!    falling back to the `*` rule. `allow_all` rules pass everything.
//!
//! Sessions without a role-derived tenant (and without `tenant_omit`) and
//! invokers listed in `db-checker.excepts` are not checked.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use mctech_config::DbCheckerConfig;
use mctech_core::Comments;
use mctech_core::Filter;
use mctech_core::LogLevel;
use mctech_core::LogRecord;
use mctech_core::LogSink;
use mctech_core::McTechContext;
use mctech_core::McTechError;
use mctech_core::McTechResult;
use mctech_core::filter::matches_any;
use mctech_core::log::truncate_utf8;
use mctech_worker::CrossDbInfo;
use mctech_worker::CrossDbWorker;
use mctech_worker::InvokerPattern;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQL bytes kept in rejection log records.
const MAX_LOGGED_SQL: usize = 1024;

/// Log target for checker records.
const LOG_TARGET: &str = "mctech_checker";

// ============================================================================
// SECTION: Checker
// ============================================================================

/// Mutually exclusive database checker.
pub struct CrossDbChecker {
    /// Databases subject to the check.
    mutex: Vec<Filter>,
    /// Databases exempt from the check.
    exclude: Vec<Filter>,
    /// Configured groups.
    across: Vec<Vec<String>>,
    /// Invokers never checked.
    excepts: Vec<String>,
    /// Rejection log.
    log: Arc<dyn LogSink>,
}

impl CrossDbChecker {
    /// Builds a checker from `[db-checker]`.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::InvalidParam`] for a filter that does not parse.
    pub fn new(config: &DbCheckerConfig, log: Arc<dyn LogSink>) -> McTechResult<Self> {
        Ok(Self {
            mutex: Filter::parse_all(&config.mutex)?,
            exclude: Filter::parse_all(&config.exclude)?,
            across: config.across_groups(),
            excepts: config.excepts.clone(),
            log,
        })
    }

    /// Whether the invoker is listed in `excepts`.
    ///
    /// Entries match the package name, the full `from` value when they
    /// contain a `.`, or the app name otherwise.
    #[must_use]
    pub fn is_excepted(&self, comments: &Comments) -> bool {
        self.excepts.iter().any(|except| {
            if comments.package.as_deref() == Some(except.as_str()) {
                return true;
            }
            comments.service.as_ref().is_some_and(|service| {
                if except.contains('.') {
                    service.from == *except
                } else {
                    service.app_name == *except
                }
            })
        })
    }

    /// Whether a logical database is subject to the check.
    #[must_use]
    pub fn is_mutex(&self, logical: &str) -> bool {
        matches_any(&self.mutex, logical) && !matches_any(&self.exclude, logical)
    }

    /// Logical names of the mutex databases among `dbs`, deduplicated in
    /// first-seen order.
    #[must_use]
    pub fn mutex_dbs(&self, ctx: &McTechContext, dbs: &[String]) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(dbs.len());
        for db in dbs {
            let logical = ctx.to_logical(db);
            if self.is_mutex(&logical) && !names.contains(&logical) {
                names.push(logical);
            }
        }
        names
    }

    /// Checks the physical databases `dbs` referenced by `sql`.
    ///
    /// Sessions with no tenant-only role, no role-derived tenant and no
    /// tenant omission pass unchecked.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::CrossDbForbidden`] when no group holds every
    /// mutex database.
    pub fn check(&self, ctx: &McTechContext, rules: &CrossDbWorker, sql: &str, dbs: &[String]) -> McTechResult<()> {
        let result = ctx.prepare_result();
        let tenant_scoped = result.roles().tenant_only || result.tenant().from_role;
        if !tenant_scoped && !result.tenant_omit() {
            return Ok(());
        }
        if self.is_excepted(result.comments()) {
            return Ok(());
        }
        let names = rules.exclude(&self.mutex_dbs(ctx, dbs));
        if names.len() <= 1 {
            return Ok(());
        }

        let hinted = result.across().map(|spec| spec.groups.as_slice()).unwrap_or_default();
        if any_group_contains_all(hinted, &names) || any_group_contains_all(&self.across, &names) {
            return Ok(());
        }
        for pattern in InvokerPattern::from_comments(result.comments()) {
            if let Some(info) = rules.get(&pattern)
                && rule_allows(&info, &names)
            {
                return Ok(());
            }
        }

        let groups = render_groups(hinted.iter().chain(&self.across), &names);
        let sql_len = sql.len();
        let logged = if sql_len > MAX_LOGGED_SQL {
            format!("{}......(len:{sql_len})", truncate_utf8(sql, MAX_LOGGED_SQL))
        } else {
            sql.to_string()
        };
        self.log.record(
            &LogRecord::new(LogLevel::Warn, LOG_TARGET, format!("dbs not allow in the same statement. {groups}"))
                .with_field("user", ctx.user())
                .with_field("SQL", logged),
        );
        Err(McTechError::CrossDbForbidden {
            groups,
        })
    }
}

// ============================================================================
// SECTION: Grouping
// ============================================================================

/// Whether every name is a member of one single group.
fn any_group_contains_all(groups: &[Vec<String>], names: &[String]) -> bool {
    groups.iter().any(|group| names.iter().all(|name| group.contains(name)))
}

/// Whether an invoker rule lets `names` through.
fn rule_allows(info: &CrossDbInfo, names: &[String]) -> bool {
    if info.allow_all {
        return true;
    }
    let remaining = info.exclude(names);
    remaining.len() <= 1 || info.groups.iter().any(|group| remaining.iter().all(|name| group.dbs.contains(name)))
}

/// Renders `names` partitioned by the first group holding each of them.
///
/// Multi-member partitions print as `{a,b}`, singletons as a bare name, e.g.
/// `[{global_ds,global_qa} global_mb]`.
fn render_groups<'a>(groups: impl Iterator<Item = &'a Vec<String>>, names: &[String]) -> String {
    let mut used = BTreeSet::new();
    let mut parts = Vec::new();
    for group in groups {
        let mut members: Vec<&String> =
            names.iter().filter(|name| group.contains(name) && !used.contains(name.as_str())).collect();
        if members.is_empty() {
            continue;
        }
        members.sort_by_key(|name| name.to_lowercase());
        used.extend(members.iter().map(|name| name.as_str()));
        if let [single] = members.as_slice() {
            parts.push((*single).clone());
        } else {
            let joined: Vec<&str> = members.iter().map(|name| name.as_str()).collect();
            parts.push(format!("{{{}}}", joined.join(",")));
        }
    }
    parts.extend(names.iter().filter(|name| !used.contains(name.as_str())).cloned());
    format!("[{}]", parts.join(" "))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[test]
    fn groups_render_members_then_leftovers() {
        let groups = [names(&["global_mtlp", "global_ma"]), names(&["global_ds", "global_qa", "global_sq"])];
        let rendered =
            render_groups(groups.iter(), &names(&["global_sq", "global_ds", "global_qa", "global_mb"]));
        assert_eq!(rendered, "[{global_ds,global_qa,global_sq} global_mb]");
    }

    #[test]
    fn single_group_must_hold_every_name() {
        let groups = [names(&["a", "b"]), names(&["b", "c"])];
        assert!(any_group_contains_all(&groups, &names(&["a", "b"])));
        assert!(!any_group_contains_all(&groups, &names(&["a", "c"])));
    }

    #[test]
    fn excepts_match_package_service_and_app() {
        let config = DbCheckerConfig {
            excepts: names(&["org-service", "pf-svc.sales", "@mctech/dp-impala"]),
            ..DbCheckerConfig::default()
        };
        let checker = CrossDbChecker::new(&config, Arc::new(mctech_core::log::NoopLogSink)).unwrap();
        assert!(checker.is_excepted(&Comments::new("org-service.pf", "")));
        assert!(checker.is_excepted(&Comments::new("pf-svc.sales", "")));
        assert!(!checker.is_excepted(&Comments::new("pf-svc.other", "")));
        assert!(checker.is_excepted(&Comments::new("", "@mctech/dp-impala")));
        assert!(!checker.is_excepted(&Comments::new("", "")));
    }

    #[test]
    fn exclude_filters_win_over_mutex() {
        let config = DbCheckerConfig {
            mutex: names(&["global_*"]),
            exclude: names(&["global_platform", "starts-with:global_dw_"]),
            ..DbCheckerConfig::default()
        };
        let checker = CrossDbChecker::new(&config, Arc::new(mctech_core::log::NoopLogSink)).unwrap();
        assert!(checker.is_mutex("global_cq3"));
        assert!(!checker.is_mutex("global_platform"));
        assert!(!checker.is_mutex("global_dw_1"));
        assert!(!checker.is_mutex("asset_x"));
    }
}
