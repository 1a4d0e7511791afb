// crates/mctech-core/src/hint.rs
// ============================================================================
// Module: Hint and Comment Scanner
// Description: Extracts `/*& key:value */` hints and custom comments from SQL.
// Purpose: Feed parameters, actions, and invoker identity into preparation.
// Dependencies: regex
// ============================================================================

//! ## Overview
//! Two case-insensitive patterns run over the raw SQL text. The hint pattern
//! yields parameters (plain keys) and actions (`$`-prefixed keys). The custom
//! comment pattern yields the calling service (`from`) and the package name.
//!
//! Parameter values have one pair of surrounding single quotes stripped and
//! are trimmed. Unbalanced quotes are rejected. Repeating a parameter with a
//! different value is a [`McTechError::HintConflict`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::McTechError;
use crate::error::McTechResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hint pattern: `/*& name:value */` or `/*& $action:args */`.
static HINT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)/\*&\s*(\$?[a-z_0-9]+):(.*?)\s*\*/").ok());

/// Custom comment pattern: `/* from:'svc' */` or `/* package:'pkg' */`.
static COMMENT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)/\*\s*(from|package):\s*'([^']+)'").ok());

/// Comment key naming the calling service.
pub const COMMENT_FROM: &str = "from";
/// Comment key naming the calling package.
pub const COMMENT_PACKAGE: &str = "package";

// ============================================================================
// SECTION: Types
// ============================================================================

/// One action hint in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionHint {
    /// Action name without the `$` prefix.
    pub name: String,
    /// Raw argument text.
    pub args: String,
}

/// Output of [`scan_hints`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedHints {
    /// Actions in the order they appear in the SQL.
    pub actions: Vec<ActionHint>,
    /// Unformatted parameter values keyed by hint name.
    pub params: BTreeMap<String, String>,
}

/// Calling service parsed from `/* from:'app.productLine' */`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceComment {
    /// Raw `from` value.
    pub from: String,
    /// Application name (text before the first `.`).
    pub app_name: String,
    /// Product line (text after the first `.`), possibly empty.
    pub product_line: String,
}

/// Custom comments attached to a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Comments {
    /// Calling service, when a non-empty `from` comment exists.
    pub service: Option<ServiceComment>,
    /// Calling package, when a `package` comment exists.
    pub package: Option<String>,
}

impl Comments {
    /// Builds comments from raw `from` and `package` values.
    ///
    /// `from` is split at its first `.` into app name and product line; the
    /// service is only recorded when either half is non-empty.
    #[must_use]
    pub fn new(from: &str, package: &str) -> Self {
        let package = (!package.is_empty()).then(|| package.to_string());
        let (app_name, product_line) = match from.split_once('.') {
            Some((app, line)) => (app, line),
            None => (from, ""),
        };
        let service = (!app_name.is_empty() || !product_line.is_empty()).then(|| ServiceComment {
            from: from.to_string(),
            app_name: app_name.to_string(),
            product_line: product_line.to_string(),
        });
        Self {
            service,
            package,
        }
    }

    /// Returns the service `from` value or an empty string.
    #[must_use]
    pub fn service_from(&self) -> &str {
        self.service.as_ref().map_or("", |service| service.from.as_str())
    }

    /// Returns the package name or an empty string.
    #[must_use]
    pub fn package_name(&self) -> &str {
        self.package.as_deref().unwrap_or("")
    }
}

// ============================================================================
// SECTION: Scanning
// ============================================================================

/// Scans hints from raw SQL.
///
/// # Errors
///
/// Returns [`McTechError::InvalidParam`] for unbalanced quotes and
/// [`McTechError::HintConflict`] for repeated parameters with differing values.
pub fn scan_hints(sql: &str) -> McTechResult<ScannedHints> {
    let mut scanned = ScannedHints::default();
    let Some(pattern) = HINT_PATTERN.as_ref() else {
        return Ok(scanned);
    };
    for captures in pattern.captures_iter(sql) {
        let name = captures.get(1).map_or("", |m| m.as_str());
        let value = captures.get(2).map_or("", |m| m.as_str());
        if let Some(action) = name.strip_prefix('$') {
            scanned.actions.push(ActionHint {
                name: action.to_string(),
                args: value.to_string(),
            });
            continue;
        }
        let value = unquote(name, value)?;
        if let Some(existing) = scanned.params.get(name) {
            if existing != &value {
                return Err(McTechError::HintConflict {
                    name: name.to_string(),
                    first: existing.clone(),
                    second: value,
                });
            }
            continue;
        }
        scanned.params.insert(name.to_string(), value);
    }
    Ok(scanned)
}

/// Scans `from` and `package` comments; the last occurrence of each wins.
#[must_use]
pub fn scan_comments(sql: &str) -> Comments {
    let mut from = String::new();
    let mut package = String::new();
    if let Some(pattern) = COMMENT_PATTERN.as_ref() {
        for captures in pattern.captures_iter(sql) {
            let key = captures.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let value = captures.get(2).map_or("", |m| m.as_str());
            match key.as_str() {
                COMMENT_FROM => value.clone_into(&mut from),
                COMMENT_PACKAGE => value.clone_into(&mut package),
                _ => {}
            }
        }
    }
    Comments::new(&from, &package)
}

/// Strips one pair of surrounding single quotes and trims the value.
fn unquote(name: &str, value: &str) -> McTechResult<String> {
    let quoted_prefix = value.starts_with('\'');
    let quoted_suffix = value.len() > 1 && value.ends_with('\'');
    let inner = match (quoted_prefix, quoted_suffix) {
        (true, true) => &value[1 .. value.len() - 1],
        (false, false) => value,
        _ => {
            return Err(McTechError::InvalidParam {
                name: name.to_string(),
                value: value.to_string(),
                reason: "unbalanced quotes".to_string(),
            });
        }
    };
    Ok(inner.trim().to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
