// crates/mctech-udf/src/sequence.rs
// ============================================================================
// Module: Sequence Cache
// Description: Batched 64-bit id issuance backed by the sequence service.
// Purpose: Serve `MCTECH_SEQUENCE()` without a service call per row.
// Dependencies: mctech-config, mctech-core, serde
// ============================================================================

//! ## Overview
//! The sequence service answers `POST {api-prefix}nexts?count=N` with one or
//! more inclusive segments, `start,end;start,end`. A fetched batch is usable
//! for one second. [`SequenceCache`] queues batches, fetches directly when
//! nothing usable is left, and refills in the background (bounded by the
//! configured backend count) once fewer than two thirds of a full backend
//! round remain. The mock supplier counts locally.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use mctech_config::SequenceConfig;
use mctech_core::LogLevel;
use mctech_core::LogRecord;
use mctech_core::LogSink;
use mctech_core::RpcClient;
use mctech_core::rpc::api_url;
use serde::Serialize;

use crate::error::UdfError;
use crate::error::UdfResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lifetime of a fetched batch.
const BATCH_TTL: Duration = Duration::from_secs(1);

/// Body of the version call.
const VERSION_BODY: &str = "{ \"diff\": -3 }";

// ============================================================================
// SECTION: Segments
// ============================================================================

/// Inclusive run of consecutive ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    /// First id.
    start: i64,
    /// Last id.
    end: i64,
}

impl Segment {
    /// Parses `start,end`.
    fn parse(token: &str) -> UdfResult<Self> {
        let invalid = || UdfError::Response(format!("invalid sequence segment '{token}'"));
        let (start, end) = token.split_once(',').ok_or_else(invalid)?;
        let start: i64 = start.trim().parse().map_err(|_| invalid())?;
        let end: i64 = end.trim().parse().map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
        Ok(Self {
            start,
            end,
        })
    }

    /// Ids in the segment.
    const fn size(self) -> i64 {
        self.end - self.start + 1
    }
}

/// One fetched batch.
#[derive(Debug, Clone)]
pub struct SegmentRange {
    /// Ascending segments.
    segments: Vec<Segment>,
    /// Segment the cursor is in.
    index: usize,
    /// Next id to hand out.
    cursor: i64,
    /// Total ids.
    size: i64,
    /// Ids handed out.
    fetched: i64,
    /// Instant after which the batch is stale.
    expires_at: Instant,
}

impl SegmentRange {
    /// Parses a service response fetched at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`UdfError::Response`] for malformed segments.
    pub fn parse(text: &str, now: Instant) -> UdfResult<Self> {
        let segments = text.trim().split(';').map(Segment::parse).collect::<UdfResult<Vec<_>>>()?;
        let size = segments.iter().map(|segment| segment.size()).sum();
        let cursor = segments.first().map_or(0, |segment| segment.start);
        Ok(Self {
            segments,
            index: 0,
            cursor,
            size,
            fetched: 0,
            expires_at: now + BATCH_TTL,
        })
    }

    /// Hands out the next id.
    pub fn next_id(&mut self) -> Option<i64> {
        loop {
            let segment = *self.segments.get(self.index)?;
            self.cursor = self.cursor.max(segment.start);
            if self.cursor <= segment.end {
                let value = self.cursor;
                self.cursor += 1;
                self.fetched += 1;
                return Some(value);
            }
            self.index += 1;
        }
    }

    /// Ids left.
    #[must_use]
    pub const fn remaining(&self) -> i64 {
        self.size - self.fetched
    }

    /// True when ids are left and the batch is fresh at `now`.
    #[must_use]
    pub fn is_available(&self, now: Instant) -> bool {
        now <= self.expires_at && self.remaining() > 0
    }
}

/// Current batch plus the queued ones.
#[derive(Debug, Default)]
struct CompositeRange {
    /// Batch in use.
    current: Option<SegmentRange>,
    /// Batches not yet used.
    queue: VecDeque<SegmentRange>,
    /// Ids left in `queue`.
    remaining_in_queue: i64,
}

impl CompositeRange {
    /// Appends a batch.
    fn add(&mut self, range: SegmentRange) {
        if self.current.is_none() {
            self.current = Some(range);
        } else {
            self.remaining_in_queue += range.remaining();
            self.queue.push_back(range);
        }
    }

    /// Ids left across every batch.
    fn remaining(&self) -> i64 {
        self.current.as_ref().map_or(0, SegmentRange::remaining) + self.remaining_in_queue
    }

    /// Makes a usable batch current; false when none is left.
    fn ensure_available(&mut self, now: Instant) -> bool {
        if self.current.as_ref().is_some_and(|range| range.is_available(now)) {
            return true;
        }
        self.current = None;
        while let Some(range) = self.queue.pop_front() {
            self.remaining_in_queue -= range.remaining();
            if range.is_available(now) {
                self.current = Some(range);
                return true;
            }
        }
        false
    }

    /// Next id from a usable batch.
    fn next_id(&mut self, now: Instant) -> Option<i64> {
        if !self.ensure_available(now) {
            return None;
        }
        self.current.as_mut().and_then(SegmentRange::next_id)
    }
}

// ============================================================================
// SECTION: Suppliers
// ============================================================================

/// Fetch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SequenceMetrics {
    /// Fetches made on the calling thread.
    pub direct: u64,
    /// Fetches made in the background.
    pub backend: u64,
    /// Ids handed out.
    pub total_fetch_count: u64,
}

/// Hands out sequence ids.
pub trait SequenceSupplier: Send + Sync {
    /// Next id.
    ///
    /// # Errors
    ///
    /// Returns an error when no id can be obtained.
    fn next_id(&self) -> UdfResult<i64>;

    /// Version that every node has already passed.
    ///
    /// # Errors
    ///
    /// Returns an error when the service cannot be reached.
    fn version_just_pass(&self) -> UdfResult<i64>;

    /// Fetch counters.
    fn metrics(&self) -> SequenceMetrics;
}

/// Raw sequence service calls.
pub trait SequenceSource: Send + Sync {
    /// Fetches up to `count` ids as segment text.
    ///
    /// # Errors
    ///
    /// Returns an error when the call fails.
    fn fetch(&self, count: u64) -> UdfResult<String>;

    /// Fetches the version text.
    ///
    /// # Errors
    ///
    /// Returns an error when the call fails.
    fn version(&self) -> UdfResult<String>;
}

/// Sequence service over HTTP.
pub struct HttpSequenceSource {
    /// Shared client with retry.
    client: RpcClient,
    /// Service prefix ending in `/`.
    api_prefix: String,
}

impl HttpSequenceSource {
    /// Creates a source for `api_prefix`.
    #[must_use]
    pub fn new(client: RpcClient, api_prefix: impl Into<String>) -> Self {
        Self {
            client,
            api_prefix: api_prefix.into(),
        }
    }
}

impl SequenceSource for HttpSequenceSource {
    fn fetch(&self, count: u64) -> UdfResult<String> {
        let url = api_url(&self.api_prefix, "nexts", &[("count", &count.to_string())])?;
        let body = self.client.post(&url, None)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn version(&self) -> UdfResult<String> {
        let url = api_url(&self.api_prefix, "version", &[])?;
        let body = self.client.post(&url, Some(VERSION_BODY))?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// State shared with background fetches.
struct CacheInner {
    /// Service calls.
    source: Arc<dyn SequenceSource>,
    /// Batches.
    ranges: Mutex<CompositeRange>,
    /// Ids per fetch.
    max_fetch_count: u64,
    /// Remaining count at or below which a background fetch starts.
    backend_threshold: i64,
    /// Background fetches allowed at once.
    backend_limit: usize,
    /// Background fetches running.
    backend_running: AtomicUsize,
    /// Direct fetches.
    direct: AtomicU64,
    /// Background fetches.
    backend: AtomicU64,
    /// Ids handed out.
    total: AtomicU64,
    /// Log destination.
    log: Arc<dyn LogSink>,
}

impl CacheInner {
    /// Fetches one batch.
    fn load(&self) -> UdfResult<SegmentRange> {
        let text = self.source.fetch(self.max_fetch_count)?;
        SegmentRange::parse(&text, Instant::now())
    }

    /// Background refill body.
    fn backend_fetch(&self) {
        match self.load() {
            Ok(range) => {
                self.backend.fetch_add(1, Ordering::Relaxed);
                self.ranges.lock().unwrap_or_else(PoisonError::into_inner).add(range);
            }
            Err(err) => self.log.record(
                &LogRecord::new(LogLevel::Warn, "mctech.sequence", "background sequence fetch failed")
                    .with_field("error", err.to_string()),
            ),
        }
    }
}

/// Service-backed sequence cache.
pub struct SequenceCache {
    /// Shared state.
    inner: Arc<CacheInner>,
}

impl SequenceCache {
    /// Creates a cache fetching `max_fetch_count` ids per call with at most
    /// `backend` background fetches.
    #[must_use]
    pub fn new(source: Arc<dyn SequenceSource>, max_fetch_count: u64, backend: u32, log: Arc<dyn LogSink>) -> Self {
        let max_fetch_count = max_fetch_count.max(1);
        let backend = backend.max(1);
        let round = i64::try_from(max_fetch_count).unwrap_or(i64::MAX).saturating_mul(i64::from(backend));
        Self {
            inner: Arc::new(CacheInner {
                source,
                ranges: Mutex::new(CompositeRange::default()),
                max_fetch_count,
                backend_threshold: round.saturating_mul(2) / 3,
                backend_limit: usize::try_from(backend).unwrap_or(usize::MAX),
                backend_running: AtomicUsize::new(0),
                direct: AtomicU64::new(0),
                backend: AtomicU64::new(0),
                total: AtomicU64::new(0),
                log,
            }),
        }
    }

    /// Starts a background fetch when few ids remain and a slot is free.
    fn refill_if_needed(&self, remaining: i64) {
        if remaining > self.inner.backend_threshold {
            return;
        }
        let limit = self.inner.backend_limit;
        let acquired = self
            .inner
            .backend_running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| (running < limit).then_some(running + 1));
        if acquired.is_err() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new().name("mctech-sequence-backend".to_string()).spawn(move || {
            inner.backend_fetch();
            inner.backend_running.fetch_sub(1, Ordering::AcqRel);
        });
        if spawned.is_err() {
            self.inner.backend_running.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl SequenceSupplier for SequenceCache {
    fn next_id(&self) -> UdfResult<i64> {
        let (value, remaining) = {
            let mut ranges = self.inner.ranges.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if !ranges.ensure_available(now) {
                let range = self.inner.load()?;
                self.inner.direct.fetch_add(1, Ordering::Relaxed);
                ranges.add(range);
            }
            let value = ranges.next_id(now).ok_or(UdfError::SequenceExhausted)?;
            (value, ranges.remaining())
        };
        self.inner.total.fetch_add(1, Ordering::Relaxed);
        self.refill_if_needed(remaining);
        Ok(value)
    }

    fn version_just_pass(&self) -> UdfResult<i64> {
        let text = self.inner.source.version()?;
        text.trim().parse().map_err(|_| UdfError::Response(format!("invalid sequence version '{}'", text.trim())))
    }

    fn metrics(&self) -> SequenceMetrics {
        SequenceMetrics {
            direct: self.inner.direct.load(Ordering::Relaxed),
            backend: self.inner.backend.load(Ordering::Relaxed),
            total_fetch_count: self.inner.total.load(Ordering::Relaxed),
        }
    }
}

/// Local counter used when the service is mocked.
#[derive(Debug)]
pub struct MockSequenceSupplier {
    /// Last id handed out.
    last: AtomicI64,
}

impl MockSequenceSupplier {
    /// Creates a counter whose first id is `start`.
    #[must_use]
    pub const fn new(start: i64) -> Self {
        Self {
            last: AtomicI64::new(start - 1),
        }
    }
}

impl Default for MockSequenceSupplier {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SequenceSupplier for MockSequenceSupplier {
    fn next_id(&self) -> UdfResult<i64> {
        Ok(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn version_just_pass(&self) -> UdfResult<i64> {
        Ok(self.last.load(Ordering::Relaxed))
    }

    fn metrics(&self) -> SequenceMetrics {
        SequenceMetrics {
            total_fetch_count: u64::try_from(self.last.load(Ordering::Relaxed)).unwrap_or(0),
            ..SequenceMetrics::default()
        }
    }
}

/// Builds the supplier selected by `[sequence]`.
///
/// # Errors
///
/// Returns an error when the HTTP client cannot be built.
pub fn sequence_supplier(config: &SequenceConfig, log: Arc<dyn LogSink>) -> UdfResult<Arc<dyn SequenceSupplier>> {
    if config.mock {
        return Ok(Arc::new(MockSequenceSupplier::default()));
    }
    let source = HttpSequenceSource::new(RpcClient::new()?, config.api_prefix.clone());
    Ok(Arc::new(SequenceCache::new(Arc::new(source), config.max_fetch_count, config.backend, log)))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use mctech_core::log::NoopLogSink;

    use super::*;

    struct FixedSource(&'static str);

    impl SequenceSource for FixedSource {
        fn fetch(&self, _count: u64) -> UdfResult<String> {
            Ok(self.0.to_string())
        }

        fn version(&self) -> UdfResult<String> {
            Ok(" 77\n".to_string())
        }
    }

    #[test]
    fn segments_are_walked_in_order() {
        let mut range = SegmentRange::parse("10,12;20,21", Instant::now()).unwrap();
        assert_eq!(range.remaining(), 5);
        let ids: Vec<i64> = std::iter::from_fn(|| range.next_id()).collect();
        assert_eq!(ids, [10, 11, 12, 20, 21]);
        assert_eq!(range.remaining(), 0);
    }

    #[test]
    fn malformed_segments_are_rejected() {
        assert!(SegmentRange::parse("", Instant::now()).is_err());
        assert!(SegmentRange::parse("5,1", Instant::now()).is_err());
        assert!(SegmentRange::parse("1;2", Instant::now()).is_err());
    }

    #[test]
    fn stale_batches_are_skipped() {
        let fetched = Instant::now();
        let mut ranges = CompositeRange::default();
        ranges.add(SegmentRange::parse("1,2", fetched).unwrap());
        ranges.add(SegmentRange::parse("3,4", fetched + Duration::from_secs(5)).unwrap());
        assert_eq!(ranges.remaining(), 4);
        let later = fetched + Duration::from_secs(3);
        assert_eq!(ranges.next_id(later), Some(3));
        assert_eq!(ranges.remaining(), 1);
    }

    #[test]
    fn cache_fetches_directly_when_empty() {
        let cache = SequenceCache::new(Arc::new(FixedSource("100,101")), 2, 1, Arc::new(NoopLogSink));
        assert_eq!(cache.next_id().unwrap(), 100);
        assert_eq!(cache.metrics().direct, 1);
        assert_eq!(cache.version_just_pass().unwrap(), 77);
    }

    #[test]
    fn mock_counts_locally() {
        let mock = MockSequenceSupplier::default();
        assert_eq!(mock.next_id().unwrap(), 1);
        assert_eq!(mock.next_id().unwrap(), 2);
        assert_eq!(mock.metrics().total_fetch_count, 2);
    }
}
