// crates/mctech-core/src/error.rs
// ============================================================================
// Module: MCTech Errors
// Description: Statement-failing error taxonomy for the preparation pipeline.
// Purpose: Give every policy rejection a typed kind and a stable message.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every error in this module fails the statement that produced it. Messages
//! are user-facing: they are returned to the SQL client verbatim, so their
//! wording is part of the external contract.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Statement-level policy and preparation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McTechError {
    /// The same hint appeared twice with different values.
    #[error("multiple '{name}' hints carry different values: {first} <=> {second}")]
    HintConflict {
        /// Hint name.
        name: String,
        /// First value seen.
        first: String,
        /// Conflicting value.
        second: String,
    },
    /// An action hint names an action that does not exist.
    #[error("unsupported action: {0}")]
    UnknownAction(String),
    /// A `replace` action found no value for its parameter.
    #[error("no value found for parameter '{0}' while executing [replace]")]
    MissingActionParam(String),
    /// A hint value failed validation.
    #[error("invalid '{name}' hint value '{value}': {reason}")]
    InvalidParam {
        /// Hint name.
        name: String,
        /// Raw hint value.
        value: String,
        /// Validation failure description.
        reason: String,
    },
    /// The user's roles name more than one tenant.
    #[error("user {0} has roles with multiple tenants")]
    MultipleTenantRoles(String),
    /// `tenant_only` and `tenant_omit` were both in effect.
    #[error("tenant_only and tenant_omit roles cannot be active at the same time")]
    TenantOnlyWithTenantOmit,
    /// Role tenant and hint tenant disagree.
    #[error(
        "tenant from the user's roles does not match the tenant in the sql. {role} (role) <=> {hint} (sql)"
    )]
    TenantMismatch {
        /// Tenant code derived from roles.
        role: String,
        /// Tenant code supplied by hint.
        hint: String,
    },
    /// `global:true` combined with a resolved tenant.
    #[error("`global` cannot be true when tenant information is present")]
    GlobalWithTenant,
    /// `global` requested by a tenant-isolated user.
    #[error("current user contains tenant-isolation role; `global` hint not permitted.")]
    GlobalUnderTenantOnly,
    /// A global database was touched without any tenant identity.
    #[error("user {0} cannot determine tenant; add hint /*& tenant:'{{tenantCode}}' */")]
    TenantRequired(String),
    /// The statement mixes databases from different groups.
    #[error("dbs not allow in the same statement. {groups}")]
    CrossDbForbidden {
        /// Rendered list of the conflicting groups.
        groups: String,
    },
    /// The statement digest is on the deny list.
    #[error("current sql is rejected and resumed at '{resumed_at}' . digest: {digest}")]
    DenyDigestHit {
        /// Formatted expiry instant.
        resumed_at: String,
        /// Statement digest.
        digest: String,
    },
    /// A database name could not be mapped.
    #[error("database mapping failed: {0}")]
    Mapping(String),
    /// The session context was used out of order.
    #[error("mctech context error: {0}")]
    Context(String),
}

/// Result alias for preparation operations.
pub type McTechResult<T> = Result<T, McTechError>;
