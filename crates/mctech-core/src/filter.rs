// crates/mctech-core/src/filter.rs
// ============================================================================
// Module: Name Filters
// Description: String filters used by the db checker and DDL extension.
// Purpose: Match database names against configured patterns.
// Dependencies: regex
// ============================================================================

//! ## Overview
//! A filter is written as `action:pattern` where action is one of
//! `starts-with`, `ends-with`, `contains` or `regex` (case-insensitive). A
//! pattern without an action matches exactly, unless it contains `*`, in
//! which case `*` acts as a wildcard.

// ============================================================================
// SECTION: Imports
// ============================================================================

use regex::Regex;
use regex::RegexBuilder;

use crate::error::McTechError;
use crate::error::McTechResult;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A compiled name filter.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Exact match.
    Exact(String),
    /// Prefix match.
    StartsWith(String),
    /// Suffix match.
    EndsWith(String),
    /// Substring match.
    Contains(String),
    /// Case-insensitive regular expression.
    Regex(Regex),
}

impl Filter {
    /// Parses a filter expression.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::InvalidParam`] for empty patterns or regular
    /// expressions that fail to compile.
    pub fn parse(expression: &str) -> McTechResult<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(invalid(expression, "filter pattern must not be empty"));
        }
        if let Some((action, pattern)) = expression.split_once(':') {
            let pattern = pattern.to_string();
            match action {
                "starts-with" => return Ok(Self::StartsWith(pattern)),
                "ends-with" => return Ok(Self::EndsWith(pattern)),
                "contains" => return Ok(Self::Contains(pattern)),
                "regex" => return compile(expression, &pattern).map(Self::Regex),
                _ => {}
            }
        }
        Ok(match expression.matches('*').count() {
            0 => Self::Exact(expression.to_string()),
            1 if expression.starts_with('*') => Self::EndsWith(expression[1 ..].to_string()),
            1 if expression.ends_with('*') => {
                Self::StartsWith(expression[.. expression.len() - 1].to_string())
            }
            _ => {
                let quoted: Vec<String> = expression.split('*').map(regex::escape).collect();
                Self::Regex(compile(expression, &format!("^{}$", quoted.join(".*")))?)
            }
        })
    }

    /// Parses a list of filter expressions.
    ///
    /// # Errors
    ///
    /// Returns the first parse failure.
    pub fn parse_all<S: AsRef<str>>(expressions: &[S]) -> McTechResult<Vec<Self>> {
        expressions.iter().map(|expression| Self::parse(expression.as_ref())).collect()
    }

    /// Tests `text` against the filter.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Exact(pattern) => text == pattern,
            Self::StartsWith(pattern) => text.starts_with(pattern.as_str()),
            Self::EndsWith(pattern) => text.ends_with(pattern.as_str()),
            Self::Contains(pattern) => text.contains(pattern.as_str()),
            Self::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Returns true when any filter matches.
#[must_use]
pub fn matches_any(filters: &[Filter], text: &str) -> bool {
    filters.iter().any(|filter| filter.matches(text))
}

/// Compiles a case-insensitive regex.
fn compile(expression: &str, pattern: &str) -> McTechResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| invalid(expression, &err.to_string()))
}

/// Builds a filter validation error.
fn invalid(expression: &str, reason: &str) -> McTechError {
    McTechError::InvalidParam {
        name: "filter".to_string(),
        value: expression.to_string(),
        reason: reason.to_string(),
    }
}
