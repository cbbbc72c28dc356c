//! Host wait timeouts and status values.

use std::time::{Duration, Instant};

/// Host synchronization timeout in nanoseconds.
///
/// `0` polls once and `u64::MAX` waits forever, matching the driver ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timeout(u64);

impl Timeout {
    pub const ZERO: Self = Self(0);
    pub const INFINITE: Self = Self(u64::MAX);

    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    pub fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == u64::MAX
    }

    /// `None` means unbounded.
    pub fn as_duration(self) -> Option<Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(Duration::from_nanos(self.0))
        }
    }

    pub(crate) fn deadline(self) -> Deadline {
        Deadline(
            self.as_duration()
                .and_then(|d| Instant::now().checked_add(d)),
        )
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// Absolute form of a [`Timeout`]; `None` never expires.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    /// Time left, `None` if unbounded. Zero once expired.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    #[cfg(test)]
    pub(crate) fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

/// Outcome of a non-failing synchronization call.
///
/// `NotReady` is a status, not an error: the object is unchanged and the
/// caller may retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Ready,
    NotReady,
}

impl SyncStatus {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl From<bool> for SyncStatus {
    fn from(ready: bool) -> Self {
        if ready {
            Self::Ready
        } else {
            Self::NotReady
        }
    }
}
