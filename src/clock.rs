//! Time sources.
//!
//! Cache freshness decisions read time through [`Clock`] so that TTL and
//! refresh-margin boundaries can be tested to the second. Production code uses
//! [`SystemClock`]; tests drive a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of monotonic and wall-clock time.
pub trait Clock: std::fmt::Debug + Send + Sync + 'static {
    /// Monotonic instant, used for cache ages.
    fn now(&self) -> Instant;

    /// Wall-clock seconds since the Unix epoch, used for token expiry.
    fn unix_now(&self) -> u64;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// A clock that only moves when told to.
///
/// Both readings advance together: after `advance(10s)` the monotonic instant
/// is 10s later and the Unix time is 10 seconds larger.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    unix_origin: u64,
    elapsed_ms: AtomicU64,
}

impl ManualClock {
    /// Start a manual clock at the given Unix time.
    #[must_use]
    pub fn starting_at(unix_origin: u64) -> Self {
        Self {
            origin: Instant::now(),
            unix_origin,
            elapsed_ms: AtomicU64::new(0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the elapsed time since the clock was created.
    pub fn set_elapsed(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.elapsed_ms.store(ms, Ordering::SeqCst);
    }

    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn unix_now(&self) -> u64 {
        self.unix_origin + self.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_both_readings() {
        // GIVEN: a manual clock at a fixed Unix time
        let clock = ManualClock::starting_at(1_000);
        let start = clock.now();

        // WHEN: advanced by 90 seconds
        clock.advance(Duration::from_secs(90));

        // THEN: both readings moved by the same amount
        assert_eq!(clock.unix_now(), 1_090);
        assert_eq!(clock.now() - start, Duration::from_secs(90));
    }

    #[test]
    fn set_elapsed_is_absolute() {
        let clock = ManualClock::starting_at(0);
        clock.advance(Duration::from_secs(5));
        clock.set_elapsed(Duration::from_secs(3_599));
        assert_eq!(clock.unix_now(), 3_599);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.unix_now() > 1_577_836_800);
    }
}
