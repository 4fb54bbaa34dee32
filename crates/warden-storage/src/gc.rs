//! Garbage collection results and the clock abstraction.

use std::fmt;

use time::OffsetDateTime;

/// Number of expired objects removed by one garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcResult {
    /// Deleted authorization requests.
    pub auth_requests: u64,
    /// Deleted authorization codes.
    pub auth_codes: u64,
    /// Deleted device requests.
    pub device_requests: u64,
    /// Deleted device tokens.
    pub device_tokens: u64,
}

impl GcResult {
    /// Total number of deleted objects.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.auth_requests + self.auth_codes + self.device_requests + self.device_tokens
    }

    /// Returns `true` if nothing was deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for GcResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "auth_requests={} auth_codes={} device_requests={} device_tokens={}",
            self.auth_requests, self.auth_codes, self.device_requests, self.device_tokens
        )
    }
}

/// Source of the current time.
///
/// Garbage collection asks a clock instead of reading the wall clock so that
/// expiry handling can be tested deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> OffsetDateTime;
}

/// [`Clock`] backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// [`Clock`] that always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}
