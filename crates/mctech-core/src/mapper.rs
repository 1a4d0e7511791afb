// crates/mctech-core/src/mapper.rs
// ============================================================================
// Module: Database Mapper
// Description: Logical to physical database name mapping.
// Purpose: Apply per-environment prefixes and DW slot suffixes.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Product databases (`global_*`, `public_data`, `asset_*`) may live under a
//! per-environment prefix: `global_platform` becomes `mt_global_platform` for
//! prefix `mt`. Global `*_dw` databases additionally carry the DW slot:
//! `global_ds_dw` becomes `global_ds_dw_1`.
//!
//! [`to_logical`] only strips the prefix, and only when the remainder is a
//! product database. The DW slot is never inverted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::dw_index::DbIndex;
use crate::error::McTechResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix of tenant-scoped global databases.
pub const DB_GLOBAL_PREFIX: &str = "global_";
/// Prefix of asset databases.
pub const DB_ASSET_PREFIX: &str = "asset_";
/// The shared public database.
pub const DB_PUBLIC_DATA: &str = "public_data";
/// Suffix of two-slot DW databases.
pub const DB_DW_SUFFIX: &str = "_dw";

// ============================================================================
// SECTION: Mapping
// ============================================================================

/// Returns true for databases eligible for prefixing.
#[must_use]
pub fn is_product_database(logical: &str) -> bool {
    logical.starts_with(DB_GLOBAL_PREFIX)
        || logical == DB_PUBLIC_DATA
        || logical.starts_with(DB_ASSET_PREFIX)
}

/// Returns true when `db` is a global database, prefixed or not.
#[must_use]
pub fn is_global_db(db: &str, db_prefix: &str) -> bool {
    if db.starts_with(DB_GLOBAL_PREFIX) {
        return true;
    }
    !db_prefix.is_empty()
        && db
            .strip_prefix(db_prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|rest| rest.starts_with(DB_GLOBAL_PREFIX))
}

/// Maps a logical name to its physical name.
///
/// `dw_index` is only invoked for global `*_dw` databases.
///
/// # Errors
///
/// Returns the error produced by `dw_index`.
pub fn to_physical<F>(db: &str, db_prefix: &str, dw_index: F) -> McTechResult<String>
where
    F: FnOnce() -> McTechResult<DbIndex>,
{
    if db.is_empty() {
        return Ok(String::new());
    }
    let mut name = db.to_string();
    if is_global_db(&name, db_prefix) && name.ends_with(DB_DW_SUFFIX) {
        let index = dw_index()?;
        name = format!("{name}_{}", index.get());
    }
    if !is_product_database(&name) || db_prefix.is_empty() {
        return Ok(name);
    }
    Ok(format!("{db_prefix}_{name}"))
}

/// Maps a physical name back to its logical name.
#[must_use]
pub fn to_logical(db: &str, db_prefix: &str) -> String {
    if db.is_empty() || db_prefix.is_empty() {
        return db.to_string();
    }
    match db.strip_prefix(db_prefix).and_then(|rest| rest.strip_prefix('_')) {
        Some(logical) if is_product_database(logical) => logical.to_string(),
        _ => db.to_string(),
    }
}
