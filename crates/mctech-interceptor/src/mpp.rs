// crates/mctech-interceptor/src/mpp.rs
// ============================================================================
// Module: MPP Session Variables
// Description: Applies and restores the engine variables behind the mpp hint.
// Purpose: Route one query to TiFlash MPP or away from it.
// Dependencies: mctech-core
// ============================================================================

//! ## Overview
//! `mpp:force` and `mpp:disable` override three session variables for a
//! single query statement. The previous values are captured in an
//! [`MppOverride`] and put back when the statement finishes; a variable that
//! was unset before is removed again.

use std::collections::BTreeMap;

use mctech_core::MppMode;

/// Engines the optimizer may read from.
pub const ISOLATION_READ_ENGINES: &str = "tidb_isolation_read_engines";
/// Forces MPP plans.
pub const ENFORCE_MPP: &str = "tidb_enforce_mpp";
/// Allows MPP plans.
pub const ALLOW_MPP: &str = "tidb_allow_mpp";

/// Values written for `mode`, or nothing for `allow`.
#[must_use]
pub const fn overrides(mode: MppMode) -> Option<[(&'static str, &'static str); 3]> {
    match mode {
        MppMode::Allow => None,
        MppMode::Force => Some([(ISOLATION_READ_ENGINES, "tiflash,tidb"), (ENFORCE_MPP, "1"), (ALLOW_MPP, "1")]),
        MppMode::Disable => Some([(ISOLATION_READ_ENGINES, "tikv,tidb"), (ENFORCE_MPP, "0"), (ALLOW_MPP, "0")]),
    }
}

/// Variables replaced for one statement and their previous values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MppOverride {
    /// Previous value per variable, `None` when it was unset.
    saved: Vec<(&'static str, Option<String>)>,
}

impl MppOverride {
    /// Writes the overrides of `mode` into `vars`.
    ///
    /// Returns `None` for `allow`, leaving `vars` untouched.
    pub fn apply(mode: MppMode, vars: &mut BTreeMap<String, String>) -> Option<Self> {
        let values = overrides(mode)?;
        let saved = values
            .iter()
            .map(|(name, value)| (*name, vars.insert((*name).to_string(), (*value).to_string())))
            .collect();
        Some(Self {
            saved,
        })
    }

    /// Puts the previous values back.
    pub fn restore(self, vars: &mut BTreeMap<String, String>) {
        for (name, previous) in self.saved {
            match previous {
                Some(value) => {
                    vars.insert(name.to_string(), value);
                }
                None => {
                    vars.remove(name);
                }
            }
        }
    }
}
