// crates/mctech-largequery/src/lib.rs
// ============================================================================
// Module: MCTech Large Query
// Description: Large query log writer and concurrent retriever.
// Purpose: Record oversized statements and read them back by time range.
// Dependencies: base64, flate2, mctech-core, time
// ============================================================================

//! ## Overview
//! Statements whose text reaches a configured size are written as slow-log
//! style stanzas by [`LargeQueryWriter`]. [`LargeQueryRetriever`] reads the
//! current and rotated files back, filtered by [`Checker`], in forward or
//! reverse order.

pub mod checker;
pub mod error;
pub mod files;
pub mod retriever;
pub mod row;
pub mod stanza;

pub use checker::Checker;
pub use checker::TimeRange;
pub use error::LargeQueryError;
pub use error::LargeQueryResult;
pub use files::LogFile;
pub use files::collect_log_files;
pub use retriever::Direction;
pub use retriever::LargeQueryRetriever;
pub use retriever::MemoryTracker;
pub use retriever::RetrieverOptions;
pub use retriever::RetrieverStats;
pub use row::LargeQueryRow;
pub use stanza::ExecDetail;
pub use stanza::LargeQueryLogItems;
pub use stanza::LargeQueryPolicy;
pub use stanza::LargeQueryWriter;
pub use stanza::SqlType;
pub use stanza::format_stanza;
