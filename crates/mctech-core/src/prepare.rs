// crates/mctech-core/src/prepare.rs
// ============================================================================
// Module: Prepare Result
// Description: Immutable per-statement identity, parameters and comments.
// Purpose: Assemble hints, roles and comments into one validated record.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`prepare_sql`] runs the text half of the pipeline in a fixed order:
//! format parameters, run actions over the SQL, resolve roles (honouring
//! `impersonate`), then build the [`PrepareResult`].
//!
//! # Invariants
//! - `global.set` and a non-empty tenant code never coexist.
//! - A tenant-only user never runs with tenant omission in effect.
//! - `mpp` is always present in the parameter map.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use crate::action::apply_actions;
use crate::error::McTechError;
use crate::error::McTechResult;
use crate::format::AcrossSpec;
use crate::format::GlobalValue;
use crate::format::ImpersonateRole;
use crate::format::MppMode;
use crate::format::PARAM_ACROSS;
use crate::format::PARAM_BACKGROUND;
use crate::format::PARAM_DB_PREFIX;
use crate::format::PARAM_GLOBAL;
use crate::format::PARAM_IMPERSONATE;
use crate::format::PARAM_MPP;
use crate::format::PARAM_REQUEST_ID;
use crate::format::PARAM_TENANT;
use crate::format::ParamValue;
use crate::format::format_param;
use crate::hint::Comments;
use crate::hint::scan_comments;
use crate::hint::scan_hints;
use crate::roles::FlagRoles;
use crate::roles::ResolvedRoles;
use crate::roles::resolve_roles;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Resolved tenant identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantInfo {
    /// Tenant code; empty when neither role nor hint supplies one.
    pub code: String,
    /// Whether the code came from a `code_<tenant>` role.
    pub from_role: bool,
}

/// Session identity consumed by preparation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Current user name.
    pub user: String,
    /// Active role names.
    pub roles: Vec<String>,
}

/// Immutable preparation record for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrepareResult {
    /// Tenant identity.
    tenant: TenantInfo,
    /// Physical database prefix.
    db_prefix: String,
    /// Formatted `global` hint.
    global: GlobalValue,
    /// Role flags after impersonation.
    roles: FlagRoles,
    /// Custom comments.
    comments: Comments,
    /// Remaining formatted parameters.
    params: BTreeMap<String, ParamValue>,
}

impl PrepareResult {
    /// Builds a validated result.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::TenantMismatch`] when role and hint tenants
    /// differ and [`McTechError::GlobalWithTenant`] when `global` is set
    /// alongside a tenant.
    pub fn new(
        roles: ResolvedRoles,
        comments: Comments,
        mut params: BTreeMap<String, ParamValue>,
        default_mpp: MppMode,
    ) -> McTechResult<Self> {
        let from_role = !roles.tenant_code.is_empty();
        let mut code = roles.tenant_code;
        params.entry(PARAM_MPP.to_string()).or_insert(ParamValue::Mpp(default_mpp));

        if let Some(hint) = params.get(PARAM_TENANT).and_then(ParamValue::as_text) {
            let hint = hint.trim();
            if code.is_empty() {
                code = hint.to_string();
            } else if hint != code {
                return Err(McTechError::TenantMismatch {
                    role: code,
                    hint: hint.to_string(),
                });
            }
        }

        let global = match params.remove(PARAM_GLOBAL) {
            Some(ParamValue::Global(global)) => global,
            _ => GlobalValue::default(),
        };
        if !code.is_empty() && global.set {
            return Err(McTechError::GlobalWithTenant);
        }

        let db_prefix =
            params.get(PARAM_DB_PREFIX).and_then(ParamValue::as_text).unwrap_or("").to_string();

        Ok(Self {
            tenant: TenantInfo {
                code,
                from_role,
            },
            db_prefix,
            global,
            roles: roles.flags,
            comments,
            params,
        })
    }

    /// Tenant identity.
    #[must_use]
    pub const fn tenant(&self) -> &TenantInfo {
        &self.tenant
    }

    /// Tenant code, possibly empty.
    #[must_use]
    pub fn tenant_code(&self) -> &str {
        &self.tenant.code
    }

    /// Physical database prefix, possibly empty.
    #[must_use]
    pub fn db_prefix(&self) -> &str {
        &self.db_prefix
    }

    /// Formatted `global` hint.
    #[must_use]
    pub const fn global(&self) -> &GlobalValue {
        &self.global
    }

    /// Role flags.
    #[must_use]
    pub const fn roles(&self) -> FlagRoles {
        self.roles
    }

    /// Custom comments.
    #[must_use]
    pub const fn comments(&self) -> &Comments {
        &self.comments
    }

    /// Formatted parameters (without `global`).
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// Whether tenant equality is replaced by include/exclude lists.
    #[must_use]
    pub const fn tenant_omit(&self) -> bool {
        self.roles.tenant_omit || self.global.set
    }

    /// Effective MPP mode.
    #[must_use]
    pub fn mpp(&self) -> MppMode {
        match self.params.get(PARAM_MPP) {
            Some(ParamValue::Mpp(mode)) => *mode,
            _ => MppMode::Allow,
        }
    }

    /// Groups declared by the `across` hint.
    #[must_use]
    pub fn across(&self) -> Option<&AcrossSpec> {
        match self.params.get(PARAM_ACROSS) {
            Some(ParamValue::Across(spec)) => Some(spec),
            _ => None,
        }
    }

    /// `requestId` hint.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.params.get(PARAM_REQUEST_ID).and_then(ParamValue::as_text)
    }

    /// Whether a `background` hint was supplied.
    #[must_use]
    pub fn background(&self) -> bool {
        self.params.contains_key(PARAM_BACKGROUND)
    }
}

/// SQL text after actions plus its preparation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSql {
    /// SQL handed to the parser.
    pub sql: String,
    /// Preparation record.
    pub result: PrepareResult,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Scans, formats, resolves and validates a raw SQL statement.
///
/// # Errors
///
/// Returns any [`McTechError`] raised by scanning, formatting, actions, role
/// resolution or result validation. A `global` hint under a tenant-only role
/// fails with [`McTechError::GlobalUnderTenantOnly`].
pub fn prepare_sql(
    sql: &str,
    identity: &SessionIdentity,
    default_mpp: MppMode,
) -> McTechResult<PreparedSql> {
    let scanned = scan_hints(sql)?;
    let comments = scan_comments(sql);

    let mut params = BTreeMap::new();
    for (name, value) in &scanned.params {
        params.insert(name.clone(), format_param(name, value)?);
    }

    let prepared = apply_actions(sql, &scanned.actions, &params)?;

    let force_tenant_only = matches!(
        params.get(PARAM_IMPERSONATE),
        Some(ParamValue::Impersonate(ImpersonateRole::TenantOnly))
    );
    let roles = resolve_roles(&identity.user, &identity.roles, force_tenant_only)?;
    let tenant_only = roles.flags.tenant_only;

    let result = PrepareResult::new(roles, comments, params, default_mpp)?;
    if result.tenant_omit() && tenant_only {
        return Err(McTechError::GlobalUnderTenantOnly);
    }

    Ok(PreparedSql {
        sql: prepared,
        result,
    })
}
