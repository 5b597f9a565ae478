//! Wall-clock abstraction so code under test can be pinned to a fixed time.
//!
//! ```rust,ignore
//! let clock = FixedClock::default();
//! assert_eq!(clock.now(), fixture_epoch());
//! clock.advance(Duration::from_secs(60));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// 2021-01-01T00:00:00Z, the time every fixture starts from.
pub const FIXTURE_EPOCH_SECS: i64 = 1_609_459_200;

pub fn fixture_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH + TimeDelta::seconds(FIXTURE_EPOCH_SECS)
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    nanos: Arc<AtomicI64>,
}

impl FixedClock {
    /// Timestamps outside the representable nanosecond range saturate.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(to_nanos(instant))),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        self.nanos.store(to_nanos(instant), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(delta))
            });
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::at(fixture_epoch())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn to_nanos(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_nanos_opt().unwrap_or(if instant.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_epoch_is_2021() {
        assert_eq!(fixture_epoch().to_rfc3339(), "2021-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_fixed_clock_starts_at_epoch_and_advances() {
        let clock = FixedClock::default();
        assert_eq!(clock.now(), fixture_epoch());

        let shared = clock.clone();
        shared.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), fixture_epoch() + TimeDelta::milliseconds(1500));
    }

    #[test]
    fn test_fixed_clock_set() {
        let clock = FixedClock::default();
        let later = fixture_epoch() + TimeDelta::days(31);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_clock_is_object_safe() {
        let clocks: Vec<Box<dyn Clock>> = vec![Box::new(SystemClock), Box::new(FixedClock::default())];
        assert!(clocks[0].now() > fixture_epoch());
        assert_eq!(clocks[1].now(), fixture_epoch());
    }
}
