// crates/mctech-config/src/config.rs
// ============================================================================
// Module: MCTech Configuration
// Description: Configuration loading, normalisation and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: mctech-core, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every option has a default, so an empty file is a valid configuration.
//! After parsing, [`McTechConfig::normalize`] appends trailing slashes to
//! service prefixes and merges the built-in list defaults; then
//! [`McTechConfig::validate`] rejects inconsistent values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use mctech_core::Filter;
use mctech_core::MppMode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "mctech.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "MCTECH_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// Statement kinds accepted in `metrics.large-query.types`.
pub const LARGE_QUERY_TYPES: [&str; 4] = ["delete", "insert", "update", "select"];

/// Built-in `ddl.version.db-matches` entries.
const DEFAULT_DDL_VERSION_DB_MATCHES: [&str; 4] = ["global_*", "asset_*", "public_*", "*_custom"];
/// Built-in `db-checker.mutex` entries.
const DEFAULT_DB_CHECKER_MUTEX: [&str; 2] = ["asset_*", "global_*"];
/// Built-in `db-checker.exclude` entries.
const DEFAULT_DB_CHECKER_EXCLUDE: [&str; 4] =
    ["global_platform", "global_ipm", "global_dw_*", "global_dwb"];
/// Built-in `db-checker.across` entries.
const DEFAULT_DB_CHECKER_ACROSS: [&str; 1] = ["global_mtlp|global_ma"];
/// Built-in `metrics.sql-trace.ignore.by-databases` entries.
const DEFAULT_IGNORE_BY_DATABASES: [&str; 6] =
    ["test", "dp_stat", "mysql", "information_schema", "metrics_schema", "performance_schema"];
/// Built-in `metrics.sql-trace.ignore.by-roles` entries.
const DEFAULT_IGNORE_BY_ROLES: [&str; 4] = ["mc_write", "mc_read", "sm_write", "sm_read"];

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct McTechConfig {
    /// Tenant isolation switches.
    #[serde(default)]
    pub tenant: TenantConfig,
    /// Cross-database checker.
    #[serde(default)]
    pub db_checker: DbCheckerConfig,
    /// DDL extensions.
    #[serde(default)]
    pub ddl: DdlConfig,
    /// MPP defaults.
    #[serde(default)]
    pub mpp: MppConfig,
    /// Deny-digest gate.
    #[serde(default)]
    pub sql_checker: SqlCheckerConfig,
    /// Query log and tracing.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Sequence UDF backend.
    #[serde(default)]
    pub sequence: SequenceConfig,
    /// Encryption UDF backend.
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

impl McTechConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses, normalises and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.normalize(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies trailing slashes, list defaults and log directory joins.
    ///
    /// `log_dir` is the directory of the host log file, when one is known.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a service prefix is not a URL.
    pub fn normalize(&mut self, log_dir: Option<&Path>) -> Result<(), ConfigError> {
        self.sequence.api_prefix = format_url("sequence.api-prefix", &self.sequence.api_prefix)?;
        self.encryption.api_prefix =
            format_url("encryption.api-prefix", &self.encryption.api_prefix)?;
        self.db_checker.api_prefix =
            format_url("db-checker.api-prefix", &self.db_checker.api_prefix)?;

        merge_defaults(&mut self.ddl.version.db_matches, &DEFAULT_DDL_VERSION_DB_MATCHES);
        merge_defaults(&mut self.db_checker.mutex, &DEFAULT_DB_CHECKER_MUTEX);
        merge_defaults(&mut self.db_checker.exclude, &DEFAULT_DB_CHECKER_EXCLUDE);
        merge_defaults(&mut self.db_checker.across, &DEFAULT_DB_CHECKER_ACROSS);
        merge_defaults(&mut self.db_checker.excepts, &[]);
        let ignore = &mut self.metrics.sql_trace.ignore;
        merge_defaults(&mut ignore.by_databases, &DEFAULT_IGNORE_BY_DATABASES);
        merge_defaults(&mut ignore.by_roles, &DEFAULT_IGNORE_BY_ROLES);
        for kind in &mut self.metrics.large_query.types {
            *kind = kind.trim().to_ascii_lowercase();
        }

        if self.metrics.sql_trace.filename.trim().is_empty() {
            self.metrics.sql_trace.filename = default_sql_trace_filename();
        }
        if self.metrics.large_query.filename.trim().is_empty() {
            self.metrics.large_query.filename = default_large_query_filename();
        }
        if let Some(dir) = log_dir {
            join_relative(dir, &mut self.metrics.sql_trace.filename);
            join_relative(dir, &mut self.metrics.large_query.filename);
        }
        Ok(())
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.db_checker.validate()?;
        self.ddl.version.validate()?;
        self.metrics.validate()?;
        self.sequence.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// `[tenant]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TenantConfig {
    /// Master switch for tenant rewriting and checks.
    #[serde(default)]
    pub enabled: bool,
    /// Reject `PREPARE`/`EXECUTE` statements.
    #[serde(default)]
    pub forbidden_prepare: bool,
}

/// `[db-checker]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DbCheckerConfig {
    /// Enables the cross-database checker.
    #[serde(default)]
    pub enabled: bool,
    /// Prefix of the DW index service.
    #[serde(default = "default_db_checker_api_prefix")]
    pub api_prefix: String,
    /// Filters selecting databases subject to the check.
    #[serde(default)]
    pub mutex: Vec<String>,
    /// Filters selecting databases exempt from the check.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Extra groups allowed together, each `a|b|...`.
    #[serde(default)]
    pub across: Vec<String>,
    /// Services, `service.productLine` pairs or packages skipping the check.
    #[serde(default)]
    pub excepts: Vec<String>,
}

impl Default for DbCheckerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_prefix: default_db_checker_api_prefix(),
            mutex: Vec::new(),
            exclude: Vec::new(),
            across: Vec::new(),
            excepts: Vec::new(),
        }
    }
}

impl DbCheckerConfig {
    /// Returns the configured across groups as name lists.
    #[must_use]
    pub fn across_groups(&self) -> Vec<Vec<String>> {
        self.across
            .iter()
            .map(|group| {
                group
                    .split('|')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .collect()
    }

    /// Validates filters and across groups.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_filters("db-checker.mutex", &self.mutex)?;
        validate_filters("db-checker.exclude", &self.exclude)?;
        for (group, raw) in self.across_groups().iter().zip(&self.across) {
            if group.len() < 2 {
                return Err(ConfigError::Invalid(format!(
                    "db-checker.across entry '{raw}' needs at least two databases"
                )));
            }
        }
        Ok(())
    }
}

/// `[ddl]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DdlConfig {
    /// Automatic version column.
    #[serde(default)]
    pub version: VersionColumnConfig,
}

/// `[ddl.version]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VersionColumnConfig {
    /// Adds the version column to new tables.
    #[serde(default)]
    pub enabled: bool,
    /// Column name.
    #[serde(default = "default_version_column_name")]
    pub name: String,
    /// Filters selecting databases that receive the column.
    #[serde(default)]
    pub db_matches: Vec<String>,
}

impl Default for VersionColumnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_version_column_name(),
            db_matches: Vec::new(),
        }
    }
}

impl VersionColumnConfig {
    /// Validates the column name and filters.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("ddl.version.name must be non-empty".to_string()));
        }
        validate_filters("ddl.version.db-matches", &self.db_matches)
    }
}

/// `[mpp]` section.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MppConfig {
    /// MPP mode used when a statement carries no `mpp` hint.
    #[serde(default)]
    pub default_value: MppMode,
}

/// `[sql-checker]` section.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SqlCheckerConfig {
    /// Enables the deny-digest gate.
    #[serde(default)]
    pub enabled: bool,
}

/// `[metrics]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetricsConfig {
    /// Query log.
    #[serde(default)]
    pub query_log: QueryLogConfig,
    /// Large-query slow log.
    #[serde(default)]
    pub large_query: LargeQueryConfig,
    /// Full SQL trace.
    #[serde(default)]
    pub sql_trace: SqlTraceConfig,
}

impl MetricsConfig {
    /// Validates thresholds and statement kinds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.query_log.max_length == 0 {
            return Err(ConfigError::Invalid(
                "metrics.query-log.max-length must be greater than zero".to_string(),
            ));
        }
        if self.large_query.threshold == 0 {
            return Err(ConfigError::Invalid(
                "metrics.large-query.threshold must be greater than zero".to_string(),
            ));
        }
        if let Some(kind) =
            self.large_query.types.iter().find(|kind| !LARGE_QUERY_TYPES.contains(&kind.as_str()))
        {
            return Err(ConfigError::Invalid(format!(
                "metrics.large-query.types contains unsupported type '{kind}'"
            )));
        }
        if self.sql_trace.compress_threshold == 0 {
            return Err(ConfigError::Invalid(
                "metrics.sql-trace.compress-threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[metrics.query-log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueryLogConfig {
    /// Logs rewritten statements.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum logged SQL length in bytes.
    #[serde(default = "default_query_log_max_length")]
    pub max_length: usize,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_length: default_query_log_max_length(),
        }
    }
}

/// `[metrics.large-query]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LargeQueryConfig {
    /// Writes slow-log stanzas for long statements.
    #[serde(default)]
    pub enabled: bool,
    /// Slow-log file.
    #[serde(default = "default_large_query_filename")]
    pub filename: String,
    /// SQL length in bytes above which a statement is recorded.
    #[serde(default = "default_large_query_threshold")]
    pub threshold: usize,
    /// Statement kinds recorded.
    #[serde(default = "default_large_query_types")]
    pub types: Vec<String>,
}

impl Default for LargeQueryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: default_large_query_filename(),
            threshold: default_large_query_threshold(),
            types: default_large_query_types(),
        }
    }
}

impl LargeQueryConfig {
    /// Returns true when `kind` is recorded.
    #[must_use]
    pub fn records(&self, kind: &str) -> bool {
        self.types.iter().any(|allowed| allowed == kind)
    }
}

/// `[metrics.sql-trace]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SqlTraceConfig {
    /// Writes a trace record for every traceable statement.
    #[serde(default)]
    pub enabled: bool,
    /// Trace file.
    #[serde(default = "default_sql_trace_filename")]
    pub filename: String,
    /// SQL length in bytes above which the text is compressed.
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold: usize,
    /// Directory holding archived full SQL files.
    #[serde(default)]
    pub full_sql_dir: Option<String>,
    /// Default archive group, usually the cluster name.
    #[serde(default)]
    pub group: String,
    /// Statements never traced.
    #[serde(default)]
    pub ignore: TraceIgnoreConfig,
}

impl Default for SqlTraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: default_sql_trace_filename(),
            compress_threshold: default_compress_threshold(),
            full_sql_dir: None,
            group: String::new(),
            ignore: TraceIgnoreConfig::default(),
        }
    }
}

/// `[metrics.sql-trace.ignore]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TraceIgnoreConfig {
    /// Databases whose statements are not traced.
    #[serde(default)]
    pub by_databases: Vec<String>,
    /// Roles whose statements are not traced.
    #[serde(default)]
    pub by_roles: Vec<String>,
}

/// `[sequence]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SequenceConfig {
    /// Sequence service prefix.
    #[serde(default = "default_sequence_api_prefix")]
    pub api_prefix: String,
    /// Maximum concurrent background fetches.
    #[serde(default = "default_sequence_backend")]
    pub backend: u32,
    /// Counts locally instead of calling the service.
    #[serde(default)]
    pub mock: bool,
    /// Logs every fetch.
    #[serde(default)]
    pub debug: bool,
    /// Maximum ids fetched per call.
    #[serde(default = "default_max_fetch_count")]
    pub max_fetch_count: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            api_prefix: default_sequence_api_prefix(),
            backend: default_sequence_backend(),
            mock: false,
            debug: false,
            max_fetch_count: default_max_fetch_count(),
        }
    }
}

impl SequenceConfig {
    /// Validates fetch limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fetch_count == 0 {
            return Err(ConfigError::Invalid(
                "sequence.max-fetch-count must be at least 1".to_string(),
            ));
        }
        if self.backend == 0 {
            return Err(ConfigError::Invalid("sequence.backend must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// `[encryption]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EncryptionConfig {
    /// Encryption service prefix.
    #[serde(default = "default_encryption_api_prefix")]
    pub api_prefix: String,
    /// Access id sent when fetching the key.
    #[serde(default = "default_access_id")]
    pub access_id: String,
    /// Passes values through unchanged.
    #[serde(default)]
    pub mock: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            api_prefix: default_encryption_api_prefix(),
            access_id: default_access_id(),
            mock: false,
        }
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default DW index service prefix.
pub(crate) fn default_db_checker_api_prefix() -> String {
    "http://node-infra-dim-service.mc/".to_string()
}

/// Default version column name.
pub(crate) fn default_version_column_name() -> String {
    "__version".to_string()
}

/// Default query log length.
pub(crate) const fn default_query_log_max_length() -> usize {
    4 * 1024
}

/// Default slow-log file.
pub(crate) fn default_large_query_filename() -> String {
    "mctech_large_query_log.log".to_string()
}

/// Default slow-log threshold.
pub(crate) const fn default_large_query_threshold() -> usize {
    4 * 1024 * 1024
}

/// Default recorded statement kinds.
pub(crate) fn default_large_query_types() -> Vec<String> {
    LARGE_QUERY_TYPES.iter().map(|kind| (*kind).to_string()).collect()
}

/// Default trace file.
pub(crate) fn default_sql_trace_filename() -> String {
    "mctech_tidb_full_sql.log".to_string()
}

/// Default compression threshold.
pub(crate) const fn default_compress_threshold() -> usize {
    4 * 1024
}

/// Default sequence service prefix.
pub(crate) fn default_sequence_api_prefix() -> String {
    "http://node-infra-sequence-service.mc/".to_string()
}

/// Default sequence fetch concurrency.
pub(crate) const fn default_sequence_backend() -> u32 {
    5
}

/// Default sequence batch size.
pub(crate) const fn default_max_fetch_count() -> u64 {
    1000
}

/// Default encryption service prefix.
pub(crate) fn default_encryption_api_prefix() -> String {
    "http://node-infra-encryption-service.mc/".to_string()
}

/// Default encryption access id.
pub(crate) fn default_access_id() -> String {
    "oJEKJh1wvqncJYASxp1Iiw".to_string()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Parses a service prefix and ensures its path ends with `/`.
fn format_url(field: &str, value: &str) -> Result<String, ConfigError> {
    let mut url = Url::parse(value.trim())
        .map_err(|err| ConfigError::Invalid(format!("{field} is not a valid url: {err}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.to_string())
}

/// Appends `defaults`, trims entries and drops blanks and duplicates.
fn merge_defaults(values: &mut Vec<String>, defaults: &[&str]) {
    let mut merged: Vec<String> = Vec::with_capacity(values.len() + defaults.len());
    let candidates = values.iter().map(String::as_str).chain(defaults.iter().copied());
    for candidate in candidates {
        let trimmed = candidate.trim();
        if trimmed.is_empty() || merged.iter().any(|existing| existing == trimmed) {
            continue;
        }
        merged.push(trimmed.to_string());
    }
    *values = merged;
}

/// Joins a relative file name onto `dir`.
fn join_relative(dir: &Path, filename: &mut String) {
    if Path::new(filename.as_str()).is_relative() {
        *filename = dir.join(filename.as_str()).to_string_lossy().into_owned();
    }
}

/// Ensures every filter in `patterns` parses.
fn validate_filters(field: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        Filter::parse(pattern)
            .map_err(|err| ConfigError::Invalid(format!("{field} entry '{pattern}': {err}")))?;
    }
    Ok(())
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

    #[test]
    fn format_url_appends_trailing_slash() {
        let url = format_url("x", "http://svc.mc/api").unwrap();
        assert_eq!(url, "http://svc.mc/api/");
        assert_eq!(format_url("x", "http://svc.mc/").unwrap(), "http://svc.mc/");
    }

    #[test]
    fn format_url_rejects_relative_text() {
        let err = format_url("sequence.api-prefix", "not a url").unwrap_err();
        assert!(err.to_string().contains("sequence.api-prefix"));
    }

    #[test]
    fn merge_defaults_keeps_configured_order_first() {
        let mut values = vec![" b ".to_string(), String::new(), "a".to_string(), "b".to_string()];
        merge_defaults(&mut values, &["a", "c"]);
        assert_eq!(values, vec!["b", "a", "c"]);
    }

    #[test]
    fn join_relative_leaves_absolute_paths() {
        let mut relative = "trace.log".to_string();
        join_relative(Path::new("/var/log"), &mut relative);
        assert_eq!(relative, "/var/log/trace.log");
        let mut absolute = "/tmp/trace.log".to_string();
        join_relative(Path::new("/var/log"), &mut absolute);
        assert_eq!(absolute, "/tmp/trace.log");
    }

    #[test]
    fn resolve_path_prefers_explicit_argument() {
        let path = resolve_path(Some(Path::new("explicit.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("explicit.toml"));
    }
}
