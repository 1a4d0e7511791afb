// crates/mctech-worker/src/crossdb.rs
// ============================================================================
// Module: Cross-DB Rule Worker
// Description: Cache of invoker-to-database-group rules.
// Purpose: Decide which databases an invoker may combine in one statement.
// Dependencies: async-trait, mctech-core, serde
// ============================================================================

//! ## Overview
//! Each `mctech_cross_db` row names an invoker (a service or a package, or
//! both) and either allows every database or lists `|`-separated groups of
//! `,`-separated database names that may appear together. A group that
//! contains `*` turns its other entries into exclusion filters instead; on
//! a `*`/`both` row those filters apply to every invoker.
//!
//! Rows fan out into [`CrossDbInfo`] entries keyed by `name@type`. Every row,
//! loaded or not, leaves a [`LoadedRuleResult`] behind for diagnostics.
//! A reload swaps the infos, global filters and diagnostics together.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;
use mctech_core::Comments;
use mctech_core::Filter;
use mctech_core::filter::matches_any;
use mctech_core::log::now_ms;
use serde::Serialize;

use crate::error::WorkerError;
use crate::error::WorkerResult;
use crate::executor::SqlExecutor;
use crate::executor::SqlRow;
use crate::scheduler::PolicyWorker;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default system table.
pub const CROSS_DB_TABLE: &str = "mysql.mctech_cross_db";

/// Invoker or database name matching anything.
pub const MATCH_ANY: &str = "*";

// ============================================================================
// SECTION: Invokers
// ============================================================================

/// Kind of caller a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokerType {
    /// A service, identified by the `from` comment.
    Service,
    /// A package, identified by the `package` comment.
    Package,
    /// Both of the above.
    Both,
}

impl InvokerType {
    /// Parses the stored enum text.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Decode`] for unknown values.
    pub fn parse(text: &str, column: usize) -> WorkerResult<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "service" => Ok(Self::Service),
            "package" => Ok(Self::Package),
            "both" => Ok(Self::Both),
            other => Err(WorkerError::Decode {
                column,
                reason: format!("unknown invoker type '{other}'"),
            }),
        }
    }

    /// Stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Package => "package",
            Self::Both => "both",
        }
    }

    /// Concrete types this one stands for.
    #[must_use]
    pub fn expand(self) -> &'static [Self] {
        match self {
            Self::Service => &[Self::Service],
            Self::Package => &[Self::Package],
            Self::Both => &[Self::Service, Self::Package],
        }
    }
}

impl fmt::Display for InvokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup key for one invoker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokerPattern {
    /// Invoker name; empty names become `*`.
    name: String,
    /// Invoker type.
    kind: InvokerType,
}

impl InvokerPattern {
    /// Creates a pattern.
    #[must_use]
    pub fn new(name: &str, kind: InvokerType) -> Self {
        let name = if name.is_empty() { MATCH_ANY } else { name };
        Self {
            name: name.to_string(),
            kind,
        }
    }

    /// Patterns to try for a statement, most specific first.
    ///
    /// Each present comment yields its own name and then the `*` fallback.
    /// A comment without a name reads as `*`.
    #[must_use]
    pub fn from_comments(comments: &Comments) -> Vec<Self> {
        let mut patterns = Vec::with_capacity(4);
        let service = comments.service.as_ref().map(|service| service.from.as_str());
        for (name, kind) in [(service, InvokerType::Service), (comments.package.as_deref(), InvokerType::Package)] {
            if let Some(name) = name {
                patterns.push(Self::new(name, kind));
            }
            if name.is_none_or(|name| !name.is_empty() && name != MATCH_ANY) {
                patterns.push(Self::new(MATCH_ANY, kind));
            }
        }
        patterns
    }

    /// Invoker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoker type.
    #[must_use]
    pub const fn kind(&self) -> InvokerType {
        self.kind
    }

    /// True for the `*` pattern.
    #[must_use]
    pub fn matches_any(&self) -> bool {
        self.name == MATCH_ANY
    }

    /// Map key, `name@type`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.kind)
    }
}

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Databases allowed together by one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossDbGroup {
    /// Source rule id.
    pub id: i64,
    /// Database names.
    pub dbs: Vec<String>,
}

/// Effective policy for one invoker key.
#[derive(Debug, Clone, Default)]
pub struct CrossDbInfo {
    /// Every database may be combined.
    pub allow_all: bool,
    /// Allowed groups, empty when `allow_all`.
    pub groups: Vec<CrossDbGroup>,
    /// Databases left out of the check for this invoker.
    filters: Vec<Filter>,
}

impl CrossDbInfo {
    /// Creates an info from explicit parts.
    #[must_use]
    pub const fn new(allow_all: bool, groups: Vec<CrossDbGroup>, filters: Vec<Filter>) -> Self {
        Self {
            allow_all,
            groups,
            filters,
        }
    }

    /// Drops databases matched by this invoker's filters.
    #[must_use]
    pub fn exclude(&self, dbs: &[String]) -> Vec<String> {
        exclude_with(&self.filters, dbs)
    }
}

/// Diagnostic state of a loaded row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    /// Row produced rules.
    Success,
    /// Row is disabled.
    Disabled,
    /// Row was ignored.
    Error,
}

/// Exclusion patterns recorded for a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterDetail {
    /// Patterns apply to every invoker.
    pub global: bool,
    /// Sorted patterns.
    pub patterns: Vec<String>,
}

/// Parsed view of a successful row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RuleDetail {
    /// Service name when the row applies to services.
    pub service: Option<String>,
    /// Package name when the row applies to packages.
    pub package: Option<String>,
    /// Row allows every database.
    pub allow_all: bool,
    /// Exclusion patterns.
    pub filters: Option<FilterDetail>,
    /// Database groups.
    pub groups: Vec<Vec<String>>,
}

/// One row as loaded, with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedRuleResult {
    /// Rule id.
    pub id: i64,
    /// Invoker name as stored.
    pub invoker_name: String,
    /// Invoker type; `None` when the stored value is not recognised.
    pub invoker_type: Option<InvokerType>,
    /// `allow_all_dbs` column.
    pub allow_all: bool,
    /// `cross_dbs` column.
    pub cross_dbs: String,
    /// `enabled` column.
    pub enabled: bool,
    /// `remark` column.
    pub remark: Option<String>,
    /// Outcome.
    pub state: RuleState,
    /// Outcome message.
    pub message: String,
    /// Load time in Unix milliseconds.
    pub loaded_at_ms: u128,
    /// Parsed rule for successful rows.
    pub detail: Option<RuleDetail>,
}

impl LoadedRuleResult {
    /// Records the outcome.
    fn set_state(&mut self, state: RuleState, message: impl Into<String>) {
        self.state = state;
        self.message = message.into();
        self.loaded_at_ms = now_ms();
    }

    /// Initializes the detail with the invoker fields.
    fn init_detail(&mut self) -> &mut RuleDetail {
        let name = Some(self.invoker_name.clone());
        let (service, package) = match self.invoker_type {
            Some(InvokerType::Service) => (name, None),
            Some(InvokerType::Package) => (None, name),
            Some(InvokerType::Both) => (name.clone(), name),
            None => (None, None),
        };
        self.detail.insert(RuleDetail {
            service,
            package,
            allow_all: self.allow_all,
            ..RuleDetail::default()
        })
    }
}

/// Everything a reload produces.
#[derive(Debug, Default)]
struct RuleSnapshot {
    /// Infos keyed by `name@type`.
    infos: HashMap<String, Arc<CrossDbInfo>>,
    /// Exclusions for every invoker.
    filters: Vec<Filter>,
    /// Per-row diagnostics in row order.
    loaded: Vec<LoadedRuleResult>,
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Cross-database rule cache.
pub struct CrossDbWorker {
    /// Qualified system table name.
    table: String,
    /// Current snapshot.
    snapshot: RwLock<Arc<RuleSnapshot>>,
}

impl CrossDbWorker {
    /// Creates an empty cache reading `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            snapshot: RwLock::new(Arc::new(RuleSnapshot::default())),
        }
    }

    /// Current snapshot.
    fn current(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Info for `pattern`.
    #[must_use]
    pub fn get(&self, pattern: &InvokerPattern) -> Option<Arc<CrossDbInfo>> {
        self.current().infos.get(&pattern.key()).cloned()
    }

    /// All infos keyed by `name@type`.
    #[must_use]
    pub fn get_all(&self) -> BTreeMap<String, Arc<CrossDbInfo>> {
        self.current().infos.iter().map(|(key, info)| (key.clone(), Arc::clone(info))).collect()
    }

    /// Diagnostics of the last reload.
    #[must_use]
    pub fn loaded_results(&self) -> Vec<LoadedRuleResult> {
        self.current().loaded.clone()
    }

    /// Drops databases excluded for every invoker.
    #[must_use]
    pub fn exclude(&self, dbs: &[String]) -> Vec<String> {
        exclude_with(&self.current().filters, dbs)
    }

    /// Replaces the infos, keeping filters and diagnostics (tests).
    pub fn set_all(&self, infos: HashMap<String, CrossDbInfo>) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let infos = infos.into_iter().map(|(key, info)| (key, Arc::new(info))).collect();
        *guard = Arc::new(RuleSnapshot {
            infos,
            filters: guard.filters.clone(),
            loaded: guard.loaded.clone(),
        });
    }
}

#[async_trait]
impl PolicyWorker for CrossDbWorker {
    fn name(&self) -> &'static str {
        "cross-db"
    }

    async fn reload(&self, executor: &dyn SqlExecutor) -> WorkerResult<()> {
        let sql = format!(
            "SELECT id, invoker_name, invoker_type, allow_all_dbs, cross_dbs, enabled, remark FROM {}",
            self.table
        );
        let rows = executor.query(&sql, &[]).await?;
        let snapshot = build_snapshot(&rows)?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        Ok(())
    }
}

// ============================================================================
// SECTION: Row Parsing
// ============================================================================

/// Mutable info under construction.
#[derive(Default)]
struct InfoBuilder {
    /// See [`CrossDbInfo::allow_all`].
    allow_all: bool,
    /// See [`CrossDbInfo::groups`].
    groups: Vec<CrossDbGroup>,
    /// Filters private to the invoker.
    filters: Vec<Filter>,
}

/// Builds a snapshot from drained rows.
fn build_snapshot(rows: &[SqlRow]) -> WorkerResult<RuleSnapshot> {
    let mut builders: HashMap<String, InfoBuilder> = HashMap::new();
    let mut global_filters = Vec::new();
    let mut loaded = Vec::with_capacity(rows.len());

    for row in rows {
        let type_text = row.text(2)?;
        let invoker_type = InvokerType::parse(&type_text, 2).ok();
        let mut result = LoadedRuleResult {
            id: row.int(0)?,
            invoker_name: row.text(1)?,
            invoker_type,
            allow_all: row.boolean(3)?,
            cross_dbs: row.text(4)?,
            enabled: row.boolean(5)?,
            remark: row.optional_text(6)?,
            state: RuleState::Error,
            message: String::new(),
            loaded_at_ms: 0,
            detail: None,
        };

        let mut private_filters = Vec::new();
        let ok = if !result.enabled {
            result.set_state(RuleState::Disabled, "current rule is Disabled");
            false
        } else if invoker_type.is_none() {
            result.set_state(RuleState::Error, format!("Ignore. The 'invoker_type' field '{type_text}' is unknown."));
            false
        } else if result.invoker_name.is_empty() {
            result.set_state(RuleState::Error, "Ignore. The 'invoker_name' field is empty.");
            false
        } else if result.allow_all {
            if result.invoker_name == MATCH_ANY {
                result.set_state(
                    RuleState::Error,
                    "Ignore. The 'allow_all_dbs' field should not be true, when invoker_name is '*'.",
                );
                false
            } else {
                result.set_state(RuleState::Success, "Loaded Success");
                result.init_detail();
                true
            }
        } else if let Some(filters) = parse_groups_and_filters(&mut result) {
            if !filters.is_empty() {
                let global = result.invoker_name == MATCH_ANY && result.invoker_type == Some(InvokerType::Both);
                let mut patterns: Vec<String> = filters.keys().cloned().collect();
                patterns.sort();
                if let Some(detail) = result.detail.as_mut() {
                    detail.filters = Some(FilterDetail {
                        global,
                        patterns,
                    });
                }
                if global {
                    global_filters.extend(filters.into_values());
                } else {
                    private_filters.extend(filters.into_values());
                }
            }
            true
        } else {
            false
        };

        if ok {
            let groups = result.detail.as_ref().map(|detail| detail.groups.clone()).unwrap_or_default();
            let kinds = result.invoker_type.map(InvokerType::expand).unwrap_or_default();
            for kind in kinds {
                let key = InvokerPattern::new(&result.invoker_name, *kind).key();
                let builder = builders.entry(key).or_default();
                if builder.allow_all {
                    continue;
                }
                if result.allow_all {
                    builder.allow_all = true;
                    builder.groups.clear();
                    builder.filters.clear();
                } else {
                    builder.filters.extend(private_filters.iter().cloned());
                    builder.groups.extend(groups.iter().map(|dbs| CrossDbGroup {
                        id: result.id,
                        dbs: dbs.clone(),
                    }));
                }
            }
        }
        loaded.push(result);
    }

    let infos = builders
        .into_iter()
        .map(|(key, builder)| (key, Arc::new(CrossDbInfo::new(builder.allow_all, builder.groups, builder.filters))))
        .collect();
    Ok(RuleSnapshot {
        infos,
        filters: global_filters,
        loaded,
    })
}

/// Parses `cross_dbs`, returning exclusion filters by pattern on success.
fn parse_groups_and_filters(result: &mut LoadedRuleResult) -> Option<BTreeMap<String, Filter>> {
    let group_list = split_unique(&result.cross_dbs, '|');
    if group_list.is_empty() {
        result.set_state(RuleState::Error, "Ignore. The 'cross_dbs' field is empty.");
        return None;
    }

    let mut groups = Vec::new();
    let mut filters = BTreeMap::new();
    for (index, group) in group_list.iter().enumerate() {
        let dbs = split_unique(group, ',');
        if dbs.len() <= 1 {
            result.set_state(
                RuleState::Error,
                format!("Ignore. The number of databases in group({index}) is less than 2."),
            );
            return None;
        }
        if !dbs.iter().any(|db| db == MATCH_ANY) {
            groups.push(dbs);
            continue;
        }
        if group_list.len() > 1 {
            result.set_state(
                RuleState::Error,
                "Ignore. The '*' should be in single group, there are more than one db groups in this rule configuration.",
            );
            return None;
        }
        for db in dbs.into_iter().filter(|db| db != MATCH_ANY) {
            let Ok(filter) = Filter::parse(&db) else {
                result.set_state(RuleState::Error, "Ignore. The db pattern is invalid.");
                return None;
            };
            filters.insert(db, filter);
        }
    }

    result.set_state(RuleState::Success, "Loaded Success");
    result.init_detail().groups = groups;
    Some(filters)
}

/// Splits on `separator`, trimming and dropping empty or repeated parts.
fn split_unique(text: &str, separator: char) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for part in text.split(separator).map(str::trim) {
        if !part.is_empty() && !parts.iter().any(|seen| seen == part) {
            parts.push(part.to_string());
        }
    }
    parts
}

/// Keeps the databases no filter matches.
fn exclude_with(filters: &[Filter], dbs: &[String]) -> Vec<String> {
    dbs.iter().filter(|db| !matches_any(filters, db)).cloned().collect()
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
    use crate::executor::SqlValue;

    fn row(id: i64, name: &str, kind: &str, allow_all: bool, cross_dbs: &str, enabled: bool) -> SqlRow {
        SqlRow(vec![
            SqlValue::Int(id),
            SqlValue::from(name),
            SqlValue::from(kind),
            SqlValue::Int(i64::from(allow_all)),
            SqlValue::from(cross_dbs),
            SqlValue::Int(i64::from(enabled)),
            SqlValue::Null,
        ])
    }

    #[test]
    fn patterns_follow_comment_order() {
        let comments = Comments::new("svc.pf", "@mctech/pkg");
        let keys: Vec<String> = InvokerPattern::from_comments(&comments).iter().map(InvokerPattern::key).collect();
        assert_eq!(keys, ["svc.pf@service", "*@service", "@mctech/pkg@package", "*@package"]);

        let keys: Vec<String> =
            InvokerPattern::from_comments(&Comments::default()).iter().map(InvokerPattern::key).collect();
        assert_eq!(keys, ["*@service", "*@package"]);
    }

    #[test]
    fn both_rows_fan_out_and_star_groups_become_filters() {
        let snapshot = build_snapshot(&[
            row(1, "*", "both", false, "global_mtlp,global_ma", true),
            row(2, "*", "both", false, "global_platform,global_ipm,*", true),
            row(3, "svc", "service", false, "global_dw_*, global_dwb ,*", true),
        ])
        .unwrap();

        for key in ["*@service", "*@package"] {
            let info = &snapshot.infos[key];
            assert_eq!(info.groups, vec![CrossDbGroup {
                id: 1,
                dbs: vec!["global_mtlp".to_string(), "global_ma".to_string()],
            }]);
        }
        let dbs = vec!["global_ipm".to_string(), "global_qa".to_string()];
        assert_eq!(exclude_with(&snapshot.filters, &dbs), vec!["global_qa".to_string()]);

        let svc = &snapshot.infos["svc@service"];
        assert!(svc.groups.is_empty());
        let dbs = vec!["global_dw_1".to_string(), "global_dwb".to_string(), "global_cq".to_string()];
        assert_eq!(svc.exclude(&dbs), vec!["global_cq".to_string()]);
        let detail = snapshot.loaded[2].detail.as_ref().unwrap();
        assert_eq!(detail.filters.as_ref().unwrap().patterns, vec!["global_dw_*", "global_dwb"]);
        assert!(!detail.filters.as_ref().unwrap().global);
    }

    #[test]
    fn allow_all_wins_over_groups() {
        let snapshot = build_snapshot(&[
            row(10, "svc", "package", false, "a,b", true),
            row(11, "svc", "package", true, "", true),
            row(12, "svc", "package", false, "c,d", true),
        ])
        .unwrap();
        let info = &snapshot.infos["svc@package"];
        assert!(info.allow_all);
        assert!(info.groups.is_empty());
    }

    #[test]
    fn unknown_invoker_type_rejects_only_its_row() {
        let snapshot = build_snapshot(&[
            row(30, "svc", "robot", false, "a,b", true),
            row(31, "svc", "service", false, "c,d", true),
        ])
        .unwrap();
        assert_eq!(snapshot.loaded[0].state, RuleState::Error);
        assert_eq!(snapshot.loaded[0].message, "Ignore. The 'invoker_type' field 'robot' is unknown.");
        assert_eq!(snapshot.loaded[0].invoker_type, None);
        assert_eq!(snapshot.loaded[1].state, RuleState::Success);
        let info = &snapshot.infos["svc@service"];
        assert_eq!(info.groups[0].id, 31);
    }

    #[test]
    fn star_in_multi_group_rule_is_rejected() {
        let snapshot = build_snapshot(&[row(20, "svc", "service", false, "a,*|b,c", true)]).unwrap();
        assert_eq!(snapshot.loaded[0].state, RuleState::Error);
        assert!(snapshot.infos.is_empty());
    }
}
