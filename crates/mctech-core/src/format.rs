// crates/mctech-core/src/format.rs
// ============================================================================
// Module: Parameter Formatter
// Description: Validates hint values and rewrites them into typed parameters.
// Purpose: Give the rest of the pipeline typed `global`, `mpp`, `impersonate`
//          and `across` values instead of raw strings.
// Dependencies: regex, serde
// ============================================================================

//! ## Overview
//! Formatting runs once per recognized key. Keys without a formatter pass
//! through as [`ParamValue::Text`].
//!
//! - `global`: a boolean (`true|false|1|0`) or a token list split on `,` or
//!   whitespace. Tokens prefixed `!` or `-` are excludes, `+` are includes.
//!   A token list implies `set = true`.
//! - `mpp`: one of `allow`, `force`, `disable`.
//! - `impersonate`: `tenant_only`.
//! - `across`: `|`-separated groups of `,`-separated database names, each
//!   group holding at least two names.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::error::McTechError;
use crate::error::McTechResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hint parameter carrying the tenant code.
pub const PARAM_TENANT: &str = "tenant";
/// Hint parameter carrying the physical database prefix.
pub const PARAM_DB_PREFIX: &str = "dbPrefix";
/// Hint parameter enabling cross-tenant access.
pub const PARAM_GLOBAL: &str = "global";
/// Hint parameter carrying the request id used for DW index lookup.
pub const PARAM_REQUEST_ID: &str = "requestId";
/// Hint parameter flipping the DW index for background work.
pub const PARAM_BACKGROUND: &str = "background";
/// Hint parameter selecting the MPP execution mode.
pub const PARAM_MPP: &str = "mpp";
/// Hint parameter forcing a role for the statement.
pub const PARAM_IMPERSONATE: &str = "impersonate";
/// Hint parameter declaring allowed database groups.
pub const PARAM_ACROSS: &str = "across";

/// Accepted boolean spellings.
const BOOLEAN_VALUES: [&str; 4] = ["true", "false", "1", "0"];

/// Token splitter for `global` lists.
static TOKEN_SPLITTER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r",|\s+").ok());

// ============================================================================
// SECTION: Types
// ============================================================================

/// Formatted `global` hint.
///
/// # Invariants
/// - `excludes` and `includes` are only non-empty when `set` is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalValue {
    /// Whether cross-tenant access was requested.
    pub set: bool,
    /// Tenant codes excluded from cross-tenant access.
    pub excludes: Vec<String>,
    /// Tenant codes explicitly included.
    pub includes: Vec<String>,
}

/// MPP execution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MppMode {
    /// Leave the planner free to choose.
    #[default]
    Allow,
    /// Force MPP execution.
    Force,
    /// Disable MPP execution.
    Disable,
}

impl MppMode {
    /// Returns the hint spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Force => "force",
            Self::Disable => "disable",
        }
    }
}

impl FromStr for MppMode {
    type Err = McTechError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "allow" => Ok(Self::Allow),
            "force" => Ok(Self::Force),
            "disable" => Ok(Self::Disable),
            other => Err(invalid(PARAM_MPP, other, "allowed values are force, allow, disable")),
        }
    }
}

impl fmt::Display for MppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles a statement may impersonate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImpersonateRole {
    /// Act as a `tenant_only` user.
    TenantOnly,
}

/// Database groups declared by an `across` hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcrossSpec {
    /// Groups of database names allowed together.
    pub groups: Vec<Vec<String>>,
}

impl AcrossSpec {
    /// Renders groups in the `a|b|c` form used by configured across lists.
    #[must_use]
    pub fn to_pipe_groups(&self) -> Vec<String> {
        self.groups.iter().map(|group| group.join("|")).collect()
    }
}

/// A formatted hint parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Unformatted text.
    Text(String),
    /// `global` hint.
    Global(GlobalValue),
    /// `mpp` hint.
    Mpp(MppMode),
    /// `impersonate` hint.
    Impersonate(ImpersonateRole),
    /// `across` hint.
    Across(AcrossSpec),
}

impl ParamValue {
    /// Returns the text payload when this is a text parameter.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Formatting
// ============================================================================

/// Formats one raw hint value by key.
///
/// # Errors
///
/// Returns [`McTechError::InvalidParam`] when the value fails its key's rules.
pub fn format_param(name: &str, value: &str) -> McTechResult<ParamValue> {
    match name {
        PARAM_GLOBAL => format_global(value).map(ParamValue::Global),
        PARAM_MPP => value.parse::<MppMode>().map(ParamValue::Mpp),
        PARAM_IMPERSONATE => format_impersonate(value).map(ParamValue::Impersonate),
        PARAM_ACROSS => format_across(value).map(ParamValue::Across),
        _ => Ok(ParamValue::Text(value.to_string())),
    }
}

/// Parses a `true|false|1|0` value, case-insensitively.
///
/// # Errors
///
/// Returns [`McTechError::InvalidParam`] for any other spelling.
pub fn format_boolean(name: &str, value: &str) -> McTechResult<bool> {
    let lowered = value.to_ascii_lowercase();
    if BOOLEAN_VALUES.contains(&lowered.as_str()) {
        return Ok(lowered == "true" || lowered == "1");
    }
    Err(invalid(name, value, "allowed values are 'true', 'false', '1', '0'"))
}

/// Formats the `global` hint.
fn format_global(value: &str) -> McTechResult<GlobalValue> {
    if let Ok(set) = format_boolean(PARAM_GLOBAL, value) {
        return Ok(GlobalValue {
            set,
            ..GlobalValue::default()
        });
    }
    let tokens: Vec<&str> = match TOKEN_SPLITTER.as_ref() {
        Some(splitter) => splitter.split(value).filter(|token| !token.is_empty()).collect(),
        None => value.split(',').filter(|token| !token.is_empty()).collect(),
    };
    if tokens.is_empty() {
        return Err(invalid(PARAM_GLOBAL, value, "value must not be empty"));
    }
    let mut global = GlobalValue {
        set: true,
        ..GlobalValue::default()
    };
    for token in tokens {
        if let Some(code) = token.strip_prefix('!').or_else(|| token.strip_prefix('-')) {
            global.excludes.push(code.to_string());
        } else if let Some(code) = token.strip_prefix('+') {
            global.includes.push(code.to_string());
        } else {
            return Err(invalid(
                PARAM_GLOBAL,
                value,
                "expected a boolean or tokens prefixed with '!', '-' or '+'",
            ));
        }
    }
    Ok(global)
}

/// Formats the `impersonate` hint.
fn format_impersonate(value: &str) -> McTechResult<ImpersonateRole> {
    match value {
        "tenant_only" => Ok(ImpersonateRole::TenantOnly),
        other => Err(invalid(PARAM_IMPERSONATE, other, "allowed values are 'tenant_only'")),
    }
}

/// Formats the `across` hint.
fn format_across(value: &str) -> McTechResult<AcrossSpec> {
    let mut groups = Vec::new();
    for raw_group in value.split('|') {
        let group: Vec<String> = raw_group
            .split(',')
            .map(str::trim)
            .filter(|db| !db.is_empty())
            .map(str::to_string)
            .collect();
        if group.len() < 2 {
            return Err(invalid(PARAM_ACROSS, value, "each database group needs at least 2 names"));
        }
        groups.push(group);
    }
    Ok(AcrossSpec {
        groups,
    })
}

/// Builds an [`McTechError::InvalidParam`].
fn invalid(name: &str, value: &str, reason: &str) -> McTechError {
    McTechError::InvalidParam {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
