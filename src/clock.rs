//! Time source abstraction so the queue's scoring and retry math are testable
//! without sleeping real wall-clock time.

use chrono::{DateTime, Utc};

/// A source of "now", injectable so tests can control time deterministically.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Current wall-clock time in nanoseconds since the Unix epoch, used for
    /// sorted-set scores.
    fn now_ns(&self) -> i64 {
        self.now().timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that starts at a fixed instant and only moves when told to.
///
/// Lives outside `#[cfg(test)]` so it's usable both by this crate's own unit
/// tests and, via [`crate::testing`], by downstream integration tests.
pub struct FixedClock {
    now_ns: std::sync::atomic::AtomicI64,
}

impl FixedClock {
    /// Start the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_ns: std::sync::atomic::AtomicI64::new(start.timestamp_nanos_opt().unwrap_or(0)),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: chrono::Duration) {
        self.now_ns.fetch_add(
            duration.num_nanoseconds().unwrap_or(0),
            std::sync::atomic::Ordering::SeqCst,
        );
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let ns = self.now_ns.load(std::sync::atomic::Ordering::SeqCst);
        let secs = ns.div_euclid(1_000_000_000);
        let nanos = ns.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }
}
