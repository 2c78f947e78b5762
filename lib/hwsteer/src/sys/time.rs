// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Moments and intervals.

use std::time::Duration;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;
/// The conversion from nanoseconds to milliseconds.
pub const NANOS_TO_MILLIS: u64 = NANOS / MILLIS;

/// A moment in time, relative to some unspecified epoch.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    inner: Instant,
}

impl Moment {
    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }

    /// The whole seconds elapsed from `earlier` to `self`, saturating at
    /// zero and at `u32::MAX`.
    pub fn delta_as_secs(&self, earlier: Moment) -> u32 {
        let d = self.inner.saturating_duration_since(earlier.inner);
        u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
    }

    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        let d = self.inner.saturating_duration_since(earlier.inner);
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn checked_add_secs(&self, secs: u32) -> Option<Self> {
        self.inner
            .checked_add(Duration::from_secs(u64::from(secs)))
            .map(|inner| Self { inner })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deltas_saturate() {
        let a = Moment::now();
        let b = a.checked_add_secs(7).unwrap();
        assert_eq!(b.delta_as_secs(a), 7);
        assert_eq!(a.delta_as_secs(b), 0);
        assert_eq!(b.delta_as_millis(a), 7 * MILLIS);
    }
}
