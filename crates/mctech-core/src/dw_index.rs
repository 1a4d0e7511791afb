// crates/mctech-core/src/dw_index.rs
// ============================================================================
// Module: DW Index Selector
// Description: Resolves the active `{1,2}` slot for `*_dw` global databases.
// Purpose: Let foreground and background work read different DW copies.
// Dependencies: reqwest (via rpc), serde_json
// ============================================================================

//! ## Overview
//! A `global_*_dw` database exists in two physical copies. The DW index
//! service reports which one is current, either for a specific request id or
//! for the environment as a whole. Background statements read the opposite
//! slot (`index ^ 3`).
//!
//! Request id lookups are cached for 60 seconds, environment lookups for 15
//! seconds. The background path always asks the service.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;

use crate::error::McTechError;
use crate::error::McTechResult;
use crate::rpc::RpcClient;
use crate::rpc::api_url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Cache lifetime for request id lookups.
const REQUEST_CACHE_TTL: Duration = Duration::from_secs(60);
/// Cache lifetime for environment lookups.
const CURRENT_CACHE_TTL: Duration = Duration::from_secs(15);

// ============================================================================
// SECTION: Types
// ============================================================================

/// DW slot index, always 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbIndex(u8);

impl DbIndex {
    /// Validates a raw index.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::Mapping`] when `raw` is not 1 or 2.
    pub fn new(raw: i64) -> McTechResult<Self> {
        match raw {
            1 => Ok(Self(1)),
            2 => Ok(Self(2)),
            other => Err(McTechError::Mapping(format!("dw index out of range: {other}"))),
        }
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the opposite slot.
    #[must_use]
    pub const fn flipped(self) -> Self {
        Self(self.0 ^ 3)
    }
}

/// Inputs for a DW index lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbIndexRequest {
    /// Environment (the statement's `dbPrefix`).
    pub env: String,
    /// Request id hint.
    pub request_id: Option<String>,
    /// Background hint present.
    pub background: bool,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Resolves DW slot indices.
pub trait DbIndexSelector: Send + Sync {
    /// Returns the slot for a statement.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::Mapping`] when the lookup fails.
    fn db_index(&self, request: &DbIndexRequest) -> McTechResult<DbIndex>;
}

/// Selector returning a fixed slot.
#[derive(Debug, Clone, Copy)]
pub struct FixedDbIndexSelector {
    /// Slot returned for foreground statements.
    index: DbIndex,
}

impl FixedDbIndexSelector {
    /// Creates a fixed selector.
    #[must_use]
    pub const fn new(index: DbIndex) -> Self {
        Self {
            index,
        }
    }
}

impl DbIndexSelector for FixedDbIndexSelector {
    fn db_index(&self, request: &DbIndexRequest) -> McTechResult<DbIndex> {
        if request.background {
            return Ok(self.index.flipped());
        }
        Ok(self.index)
    }
}

// ============================================================================
// SECTION: HTTP Selector
// ============================================================================

/// Response of `current-db`.
#[derive(Debug, Deserialize)]
struct CurrentDbResponse {
    /// Current slot.
    current: i64,
}

/// Response of `db;by-request`.
#[derive(Debug, Deserialize)]
struct RequestDbResponse {
    /// Slot pinned for the request.
    db: i64,
}

/// Cached slot with its insertion time.
#[derive(Debug, Clone, Copy)]
struct CachedIndex {
    /// Cached slot.
    index: DbIndex,
    /// Insertion time.
    at: Instant,
}

/// Selector backed by the DW index service.
pub struct HttpDbIndexSelector {
    /// Service URL prefix.
    api_prefix: String,
    /// Shared RPC client.
    client: RpcClient,
    /// Request id cache.
    by_request: Mutex<HashMap<String, CachedIndex>>,
    /// Environment cache.
    current: Mutex<HashMap<String, CachedIndex>>,
}

impl HttpDbIndexSelector {
    /// Creates a selector for `api_prefix`.
    #[must_use]
    pub fn new(api_prefix: impl Into<String>, client: RpcClient) -> Self {
        Self {
            api_prefix: api_prefix.into(),
            client,
            by_request: Mutex::new(HashMap::new()),
            current: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches the environment's current slot.
    fn fetch_current(&self, env: &str) -> McTechResult<DbIndex> {
        let url = api_url(&self.api_prefix, "current-db", &[("env", env)])
            .map_err(|err| McTechError::Mapping(err.to_string()))?;
        let body = self.client.get(&url, &[]).map_err(|err| McTechError::Mapping(err.to_string()))?;
        let parsed: CurrentDbResponse = serde_json::from_slice(&body)
            .map_err(|err| McTechError::Mapping(format!("get dw index errors: {err}")))?;
        DbIndex::new(parsed.current)
    }

    /// Fetches the slot pinned for a request id.
    fn fetch_by_request(&self, env: &str, request_id: &str) -> McTechResult<DbIndex> {
        let url =
            api_url(&self.api_prefix, "db;by-request", &[("env", env), ("request_id", request_id)])
                .map_err(|err| McTechError::Mapping(err.to_string()))?;
        let body = self.client.get(&url, &[]).map_err(|err| McTechError::Mapping(err.to_string()))?;
        let parsed: RequestDbResponse = serde_json::from_slice(&body)
            .map_err(|err| McTechError::Mapping(format!("get dw index by request errors: {err}")))?;
        DbIndex::new(parsed.db)
    }
}

impl DbIndexSelector for HttpDbIndexSelector {
    fn db_index(&self, request: &DbIndexRequest) -> McTechResult<DbIndex> {
        if request.background {
            let index = self.fetch_current(&request.env)?;
            store(&self.current, &request.env, index);
            return Ok(index.flipped());
        }
        if let Some(request_id) = request.request_id.as_deref() {
            if let Some(index) = lookup(&self.by_request, request_id, REQUEST_CACHE_TTL) {
                return Ok(index);
            }
            let index = self.fetch_by_request(&request.env, request_id)?;
            store(&self.by_request, request_id, index);
            return Ok(index);
        }
        if let Some(index) = lookup(&self.current, &request.env, CURRENT_CACHE_TTL) {
            return Ok(index);
        }
        let index = self.fetch_current(&request.env)?;
        store(&self.current, &request.env, index);
        Ok(index)
    }
}

/// Reads a cache entry younger than `ttl`.
fn lookup(cache: &Mutex<HashMap<String, CachedIndex>>, key: &str, ttl: Duration) -> Option<DbIndex> {
    let guard = cache.lock().ok()?;
    let entry = guard.get(key)?;
    (entry.at.elapsed() < ttl).then_some(entry.index)
}

/// Stores a cache entry.
fn store(cache: &Mutex<HashMap<String, CachedIndex>>, key: &str, index: DbIndex) {
    if let Ok(mut guard) = cache.lock() {
        guard.insert(key.to_string(), CachedIndex {
            index,
            at: Instant::now(),
        });
    }
}
