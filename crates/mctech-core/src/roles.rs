// crates/mctech-core/src/roles.rs
// ============================================================================
// Module: Role Resolver
// Description: Derives tenant identity flags from the session's active roles.
// Purpose: Turn role names into the tenant-only/across/omit flags and code.
// Dependencies: regex
// ============================================================================

//! ## Overview
//! Roles are resolved in a single pass. Marker roles toggle flags; roles named
//! `code_<tenant>` contribute a tenant code. A tenant code implies
//! tenant-only access. Conflicting codes and the `tenant_only`/`tenant_omit`
//! combination are rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::McTechError;
use crate::error::McTechResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Role restricting a user to a single tenant.
pub const ROLE_TENANT_ONLY: &str = "tenant_only";
/// Role permitting statements across database groups.
pub const ROLE_ACROSS_DB: &str = "across_db";
/// Role skipping tenant equality in favour of include/exclude lists.
pub const ROLE_TENANT_OMIT: &str = "tenant_omit";

/// Pattern for tenant code roles.
static TENANT_CODE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^code_(.+)?$").ok());

// ============================================================================
// SECTION: Types
// ============================================================================

/// Flags derived from the active roles.
///
/// # Invariants
/// - `tenant_only` and `tenant_omit` are never both true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlagRoles {
    /// Only tenant-scoped statements are allowed.
    pub tenant_only: bool,
    /// Cross database statements are allowed.
    pub across_db: bool,
    /// Tenant equality is omitted.
    pub tenant_omit: bool,
}

impl FlagRoles {
    /// Builds validated flags.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::TenantOnlyWithTenantOmit`] when both
    /// `tenant_only` and `tenant_omit` are set.
    pub const fn new(tenant_only: bool, across_db: bool, tenant_omit: bool) -> McTechResult<Self> {
        if tenant_only && tenant_omit {
            return Err(McTechError::TenantOnlyWithTenantOmit);
        }
        Ok(Self {
            tenant_only,
            across_db,
            tenant_omit,
        })
    }
}

/// Resolved role information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedRoles {
    /// Role flags.
    pub flags: FlagRoles,
    /// Tenant code from `code_<tenant>` roles, or empty.
    pub tenant_code: String,
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves role flags and the role tenant code.
///
/// `force_tenant_only` applies `impersonate=tenant_only` before validation, so
/// impersonation is subject to the same `tenant_omit` exclusion as the role.
///
/// # Errors
///
/// Returns [`McTechError::MultipleTenantRoles`] when roles name different
/// tenants and [`McTechError::TenantOnlyWithTenantOmit`] for the forbidden
/// flag combination.
pub fn resolve_roles<S: AsRef<str>>(
    user: &str,
    active_roles: &[S],
    force_tenant_only: bool,
) -> McTechResult<ResolvedRoles> {
    let mut tenant_only = false;
    let mut across_db = false;
    let mut tenant_omit = false;
    let mut codes: Vec<&str> = Vec::new();
    for role in active_roles {
        let role = role.as_ref();
        match role {
            ROLE_TENANT_ONLY => tenant_only = true,
            ROLE_ACROSS_DB => across_db = true,
            ROLE_TENANT_OMIT => tenant_omit = true,
            _ => {
                if let Some(code) = tenant_code_of(role) {
                    codes.push(code);
                }
            }
        }
    }

    let mut tenant_code = String::new();
    if let Some(first) = codes.first() {
        tenant_only = true;
        if codes.iter().any(|code| code != first) {
            return Err(McTechError::MultipleTenantRoles(user.to_string()));
        }
        (*first).clone_into(&mut tenant_code);
    }
    if force_tenant_only {
        tenant_only = true;
    }

    Ok(ResolvedRoles {
        flags: FlagRoles::new(tenant_only, across_db, tenant_omit)?,
        tenant_code,
    })
}

/// Extracts the tenant code from a `code_<tenant>` role name.
fn tenant_code_of(role: &str) -> Option<&str> {
    let pattern = TENANT_CODE_PATTERN.as_ref()?;
    let captures = pattern.captures(role)?;
    Some(captures.get(1).map_or("", |m| m.as_str()))
}
