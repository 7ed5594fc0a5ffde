//! Virtual time
//!
//! [`SimTime`] is an absolute point on the simulation timeline with
//! microsecond resolution. It only moves when the driver advances the
//! [`EventClock`](crate::clock::EventClock).

use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Absolute virtual time, in microseconds since the start of the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// Start of the timeline
    pub const ZERO: SimTime = SimTime(0);

    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is later
    pub fn saturating_duration_since(self, earlier: SimTime) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(duration_micros(rhs)))
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:06}s", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_arithmetic() {
        let t = SimTime::from_secs(2) + Duration::from_millis(250);
        assert_eq!(t.as_micros(), 2_250_000);
        assert_eq!(
            t.saturating_duration_since(SimTime::from_secs(1)),
            Duration::from_millis(1_250)
        );
        assert_eq!(SimTime::ZERO.saturating_duration_since(t), Duration::ZERO);
    }

    #[test]
    fn test_time_display() {
        assert_eq!(SimTime::from_millis(1_500).to_string(), "1.500000s");
    }
}
