// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::num::ParseIntError;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::time::Duration;
#[cfg(not(test))]
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(test)]
use mock_instant::thread_local::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

/// Seconds since the UNIX epoch based on system time.
///
/// Node expiry is expressed in absolute timestamps of this kind. A node with an expiry equal to
/// or before "now" is considered expired.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Current system time.
    ///
    /// A clock set before the UNIX epoch yields zero.
    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or_default();
        Self(seconds)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Timestamp lying the given duration after this one, saturating at the maximum.
    pub fn after(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_secs()))
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub<u64> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_sub(rhs))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(u64::from_str(value)?))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mock_instant::thread_local::MockClock;

    use super::Timestamp;

    #[test]
    fn now_follows_clock() {
        MockClock::set_system_time(Duration::from_secs(100));
        assert_eq!(Timestamp::now(), Timestamp::new(100));

        MockClock::advance_system_time(Duration::from_secs(5));
        assert_eq!(Timestamp::now(), Timestamp::new(105));
    }

    #[test]
    fn saturating_arithmetic() {
        assert_eq!(Timestamp::new(3) - 5, Timestamp::new(0));
        assert_eq!(Timestamp::new(u64::MAX) + 1, Timestamp::new(u64::MAX));
        assert_eq!(
            Timestamp::new(10).after(Duration::from_secs(20)),
            Timestamp::new(30)
        );
    }
}
