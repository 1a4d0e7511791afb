// crates/mctech-core/src/action.rs
// ============================================================================
// Module: Action Executor
// Description: Text-substitution actions applied to SQL before parsing.
// Purpose: Resolve `$replace` hints against inline literals or parameters.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Actions run in declaration order over the raw SQL. The only action is
//! `replace`, which substitutes every `{{name}}` token with an inline literal
//! (`replace:name=value`) or with the text parameter of the same name.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::error::McTechError;
use crate::error::McTechResult;
use crate::format::ParamValue;
use crate::hint::ActionHint;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// A SQL text action.
pub trait SqlAction: Send + Sync {
    /// Applies the action to `input` and returns the new SQL text.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError`] when the action cannot be resolved.
    fn resolve(
        &self,
        input: &str,
        args: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> McTechResult<String>;
}

/// `replace` action.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceAction;

impl SqlAction for ReplaceAction {
    fn resolve(
        &self,
        input: &str,
        args: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> McTechResult<String> {
        let (name, value) = match args.split_once('=') {
            Some((name, literal)) => (name, strip_quotes(literal).to_string()),
            None => {
                let value = params.get(args).and_then(ParamValue::as_text).unwrap_or("");
                if value.is_empty() {
                    return Err(McTechError::MissingActionParam(args.to_string()));
                }
                (args, value.to_string())
            }
        };
        Ok(input.replace(&format!("{{{{{name}}}}}"), &value))
    }
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Looks up an action by name.
fn lookup(name: &str) -> Option<&'static dyn SqlAction> {
    match name {
        "replace" => Some(&ReplaceAction),
        _ => None,
    }
}

/// Runs every action in order over `sql`.
///
/// # Errors
///
/// Returns [`McTechError::UnknownAction`] for unrecognized actions and any
/// error raised by an action itself.
pub fn apply_actions(
    sql: &str,
    actions: &[ActionHint],
    params: &BTreeMap<String, ParamValue>,
) -> McTechResult<String> {
    let mut current = sql.to_string();
    for action in actions {
        let Some(handler) = lookup(&action.name) else {
            return Err(McTechError::UnknownAction(action.name.clone()));
        };
        current = handler.resolve(&current, &action.args, params)?;
    }
    Ok(current)
}

/// Strips one pair of surrounding single quotes.
fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .unwrap_or(value)
}
