// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::fmt::Display;
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Milliseconds since the unix epoch
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct MillisSinceEpoch(u64);

impl MillisSinceEpoch {
    pub const UNIX_EPOCH: MillisSinceEpoch = MillisSinceEpoch::new(0);

    pub const fn new(millis_since_epoch: u64) -> Self {
        MillisSinceEpoch(millis_since_epoch)
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn elapsed(&self) -> Duration {
        let now = Self::now();
        Duration::from_millis(now.0.saturating_sub(self.0))
    }
}

impl From<u64> for MillisSinceEpoch {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<SystemTime> for MillisSinceEpoch {
    fn from(value: SystemTime) -> Self {
        MillisSinceEpoch::new(
            u64::try_from(
                value
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .expect("duration since Unix epoch should be well-defined")
                    .as_millis(),
            )
            .expect("millis since Unix epoch should fit in u64"),
        )
    }
}

impl From<MillisSinceEpoch> for SystemTime {
    fn from(value: MillisSinceEpoch) -> Self {
        SystemTime::UNIX_EPOCH.add(Duration::from_millis(value.as_u64()))
    }
}

impl Display for MillisSinceEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            humantime::format_rfc3339_millis(SystemTime::from(*self))
        )
    }
}

/// Signed microseconds since the unix epoch. This is the resolution at which row timestamps
/// are partitioned and checkpointed. Pre-epoch timestamps are negative.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct MicrosSinceEpoch(i64);

impl MicrosSinceEpoch {
    pub const UNIX_EPOCH: MicrosSinceEpoch = MicrosSinceEpoch::new(0);
    pub const MIN: MicrosSinceEpoch = MicrosSinceEpoch::new(i64::MIN);
    pub const MAX: MicrosSinceEpoch = MicrosSinceEpoch::new(i64::MAX);

    pub const fn new(micros_since_epoch: i64) -> Self {
        MicrosSinceEpoch(micros_since_epoch)
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(micros))
    }
}

impl From<i64> for MicrosSinceEpoch {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<SystemTime> for MicrosSinceEpoch {
    fn from(value: SystemTime) -> Self {
        let micros = match value.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_micros()).unwrap_or(i64::MAX),
            Err(before) => i64::try_from(before.duration().as_micros())
                .map(|micros| -micros)
                .unwrap_or(i64::MIN),
        };
        MicrosSinceEpoch(micros)
    }
}

impl Display for MicrosSinceEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 0 {
            let ts = SystemTime::UNIX_EPOCH + Duration::from_micros(self.0.unsigned_abs());
            write!(f, "{}", humantime::format_rfc3339_micros(ts))
        } else {
            write!(f, "{}us since epoch", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip_system_time() {
        let ts = SystemTime::UNIX_EPOCH + Duration::from_micros(1_700_000_000_123_456);
        assert_eq!(
            MicrosSinceEpoch::from(ts),
            MicrosSinceEpoch::new(1_700_000_000_123_456)
        );

        let before = SystemTime::UNIX_EPOCH - Duration::from_micros(5);
        assert_eq!(MicrosSinceEpoch::from(before), MicrosSinceEpoch::new(-5));
    }

    #[test]
    fn display_micros_as_rfc3339() {
        assert_eq!(
            MicrosSinceEpoch::new(1_500_000).to_string(),
            "1970-01-01T00:00:01.500000Z"
        );
        assert_eq!(MicrosSinceEpoch::new(-3).to_string(), "-3us since epoch");
    }
}
