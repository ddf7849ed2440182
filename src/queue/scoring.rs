//! Sorted-set score and backoff arithmetic, split out so the pure math is
//! trivially unit-testable in isolation from any store.

use std::time::Duration;

use crate::config::QueueConfig;

/// Priority band width in nanoseconds (1000s). Scores within one priority
/// band are FIFO; a single unit of priority jumps a job ahead of any
/// same-priority backlog younger than this band width.
const PRIORITY_BAND_NS: i64 = 1_000_000_000_000;

/// Score for a freshly enqueued job: lower priority numbers sort later
/// (lower score = dequeued first), and within a priority band, earlier
/// `now_ns` sorts first (FIFO).
pub fn enqueue_score(now_ns: i64, priority: i64) -> i64 {
    now_ns.saturating_sub(priority.saturating_mul(PRIORITY_BAND_NS))
}

/// Backoff delay for the `attempt`-th failure (1-indexed): grows
/// exponentially from `retry_delay`, capped at `max_retry_delay`, with
/// optional +/-10% jitter.
pub fn backoff_delay(config: &QueueConfig, attempt: u32) -> chrono::Duration {
    let base = config.retry_delay.as_secs_f64();
    let multiplier = config.retry_multiplier.powi((attempt.saturating_sub(1)) as i32);
    let cap = config.max_retry_delay.as_secs_f64();
    let mut delay_secs = (base * multiplier).min(cap);

    if config.jitter {
        delay_secs *= jitter_factor(attempt);
    }

    chrono::Duration::from_std(Duration::from_secs_f64(delay_secs.max(0.0)))
        .unwrap_or_else(|_| chrono::Duration::milliseconds(0))
}

/// Deterministic pseudo-jitter in `[0.9, 1.1]`, derived from the attempt
/// number rather than a global RNG so backoff stays reproducible in tests.
fn jitter_factor(attempt: u32) -> f64 {
    // A cheap, dependency-free spread: take the fractional part of a golden
    // ratio multiple of the attempt number.
    let x = (attempt as f64) * 0.618_034;
    let frac = x - x.floor();
    0.9 + frac * 0.2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn higher_priority_yields_lower_score() {
        let now = 1_000_000_000_000_000;
        let lo = enqueue_score(now, 0);
        let hi = enqueue_score(now, 5);
        assert!(hi < lo);
    }

    #[test]
    fn equal_priority_is_fifo_by_time() {
        let earlier = enqueue_score(100, 3);
        let later = enqueue_score(200, 3);
        assert!(earlier < later);
    }

    fn config() -> QueueConfig {
        QueueConfig::builder()
            .retry_delay(StdDuration::from_millis(100))
            .max_retry_delay(StdDuration::from_secs(10))
            .retry_multiplier(2.0)
            .build()
    }

    #[test]
    fn backoff_grows_exponentially() {
        let config = config();
        let d1 = backoff_delay(&config, 1);
        let d2 = backoff_delay(&config, 2);
        let d3 = backoff_delay(&config, 3);
        assert_eq!(d1.num_milliseconds(), 100);
        assert_eq!(d2.num_milliseconds(), 200);
        assert_eq!(d3.num_milliseconds(), 400);
    }

    #[test]
    fn backoff_is_capped() {
        let config = config();
        let d10 = backoff_delay(&config, 10);
        assert_eq!(d10.num_milliseconds(), 10_000);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let mut config = config();
        config.jitter = true;
        for attempt in 1..8 {
            let base = {
                let mut no_jitter = config.clone();
                no_jitter.jitter = false;
                backoff_delay(&no_jitter, attempt).num_milliseconds() as f64
            };
            let jittered = backoff_delay(&config, attempt).num_milliseconds() as f64;
            assert!(jittered >= base * 0.9 - 1.0);
            assert!(jittered <= base * 1.1 + 1.0);
        }
    }
}
