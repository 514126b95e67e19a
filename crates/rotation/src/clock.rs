//! Wall-clock abstraction and saturating time arithmetic

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Wall-clock source for queue priorities and rotation timestamps
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `time + duration`, saturating at the largest representable time
pub(crate) fn add(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `later - earlier`, zero when `later` is not after `earlier`
pub(crate) fn saturating_sub(later: DateTime<Utc>, earlier: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_saturates() {
        let now = Utc::now();
        assert_eq!(add(now, Duration::from_secs(5)), now + TimeDelta::seconds(5));
        assert_eq!(add(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let now = Utc::now();
        let later = now + TimeDelta::seconds(3);
        assert_eq!(saturating_sub(later, now), Duration::from_secs(3));
        assert_eq!(saturating_sub(now, later), Duration::ZERO);
    }
}
