// crates/mctech-largequery/src/checker.rs
// ============================================================================
// Module: Large Query Checker
// Description: Row visibility rules for retrieval.
// Purpose: Apply the caller's privilege and time range filters.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Callers without the process privilege only see their own statements.
//! Time ranges are inclusive on both ends; a row is kept when any range
//! contains it.

use time::OffsetDateTime;

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest instant.
    pub start: OffsetDateTime,
    /// Latest instant.
    pub end: OffsetDateTime,
}

impl TimeRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            start,
            end,
        }
    }

    /// True when `at` lies inside the range.
    #[must_use]
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.start <= at && at <= self.end
    }

    /// True when `[start, end]` overlaps this range.
    #[must_use]
    pub fn overlaps(&self, start: OffsetDateTime, end: OffsetDateTime) -> bool {
        start <= self.end && self.start <= end
    }
}

/// Visibility rules for one retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Checker {
    /// Caller may see every user's statements.
    pub has_process_priv: bool,
    /// Caller identity, when authenticated.
    pub user: Option<String>,
    /// Time ranges are enforced.
    pub enable_time_check: bool,
    /// Requested ranges.
    pub time_ranges: Vec<TimeRange>,
}

impl Checker {
    /// Checker that keeps rows from `ranges` for any user.
    #[must_use]
    pub fn with_ranges(ranges: Vec<TimeRange>) -> Self {
        Self {
            has_process_priv: true,
            user: None,
            enable_time_check: true,
            time_ranges: ranges,
        }
    }

    /// True when the caller may see rows of `user`.
    #[must_use]
    pub fn has_privilege(&self, user: &str) -> bool {
        self.has_process_priv || self.user.as_deref().is_none_or(|own| own == user)
    }

    /// True when `at` passes the time filter.
    #[must_use]
    pub fn is_time_valid(&self, at: OffsetDateTime) -> bool {
        !self.enable_time_check || self.time_ranges.iter().any(|range| range.contains(at))
    }

    /// True when a file spanning `[start, end]` may hold visible rows.
    #[must_use]
    pub fn overlaps(&self, start: OffsetDateTime, end: OffsetDateTime) -> bool {
        !self.enable_time_check || self.time_ranges.iter().any(|range| range.overlaps(start, end))
    }

    /// True when `start` lies after the end of every range.
    #[must_use]
    pub fn starts_after_all(&self, start: OffsetDateTime) -> bool {
        self.enable_time_check && self.time_ranges.iter().all(|range| start > range.end)
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use time::macros::datetime;

    use super::*;

    #[test]
    fn own_rows_are_visible_without_privilege() {
        let checker = Checker {
            user: Some("alice".to_string()),
            ..Checker::default()
        };
        assert!(checker.has_privilege("alice"));
        assert!(!checker.has_privilege("bob"));
        assert!(Checker::default().has_privilege("bob"));
    }

    #[test]
    fn ranges_are_inclusive() {
        let checker = Checker::with_ranges(vec![TimeRange::new(
            datetime!(2024-05-01 0:00 UTC),
            datetime!(2024-05-02 0:00 UTC),
        )]);
        assert!(checker.is_time_valid(datetime!(2024-05-02 0:00 UTC)));
        assert!(!checker.is_time_valid(datetime!(2024-05-02 0:00:01 UTC)));
        assert!(checker.starts_after_all(datetime!(2024-05-03 0:00 UTC)));
        assert!(checker.overlaps(datetime!(2024-04-30 0:00 UTC), datetime!(2024-05-01 0:00 UTC)));
    }
}
