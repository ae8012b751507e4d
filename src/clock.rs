// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

//! Injectable clocks.
//!
//! Engine code never reads the wall clock directly: pipeline entry points
//! take a [Clock], so tests can pin time and run ids are reproducible.

use std::fmt::Debug;

use time::OffsetDateTime;

/// A source of time for deterministic behavior.
pub trait Clock: Debug + Send + Sync {
    /// Return the current time, in UTC.
    fn now(&self) -> OffsetDateTime;
}

/// Reads the real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Always returns one fixed instant; for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0.to_offset(time::UtcOffset::UTC)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn fixed_clock_returns_fixed_time() {
        let clock = FixedClock(datetime!(2025-01-01 12:00:00 UTC));
        assert_eq!(clock.now(), datetime!(2025-01-01 12:00:00 UTC));
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn fixed_clock_normalizes_to_utc() {
        let clock = FixedClock(datetime!(2025-01-01 14:00:00 +2));
        assert_eq!(clock.now(), datetime!(2025-01-01 12:00:00 UTC));
    }

    #[test]
    fn system_clock_is_utc() {
        assert_eq!(SystemClock.now().offset(), time::UtcOffset::UTC);
    }
}
