// crates/mctech-udf/src/lib.rs
// ============================================================================
// Module: MCTech UDF
// Description: Backends of the MCTech SQL functions.
// Purpose: Sequence ids, cell encryption and archived SQL lookup.
// Dependencies: aes, cbc, flate2, mctech-config, mctech-core
// ============================================================================

//! ## Overview
//! Each backend is a trait with a service-backed and a mock implementation,
//! selected from configuration by [`sequence_supplier`] and
//! [`crypto_client`]. [`FullSqlStore`] reads the full SQL archive.

pub mod crypto;
pub mod error;
pub mod full_sql;
pub mod sequence;

pub use crypto::AesCryptoClient;
pub use crypto::CryptoClient;
pub use crypto::MockCryptoClient;
pub use crypto::crypto_client;
pub use error::UdfError;
pub use error::UdfResult;
pub use full_sql::FullSqlStore;
pub use sequence::HttpSequenceSource;
pub use sequence::MockSequenceSupplier;
pub use sequence::SequenceCache;
pub use sequence::SequenceMetrics;
pub use sequence::SequenceSource;
pub use sequence::SequenceSupplier;
pub use sequence::sequence_supplier;
