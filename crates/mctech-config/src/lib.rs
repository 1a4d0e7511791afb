// crates/mctech-config/src/lib.rs
// ============================================================================
// Module: MCTech Config Library
// Description: Configuration model, normalisation and validation.
// Purpose: Single source of truth for mctech.toml semantics.
// Dependencies: mctech-core, serde, toml, url
// ============================================================================

//! ## Overview
//! `mctech-config` defines the configuration model for the MCTech extensions:
//! tenant isolation, the cross-database checker, DDL and MPP defaults, the
//! deny-digest gate, tracing and the UDF backends. It provides fail-closed
//! loading plus a canonical example document.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
