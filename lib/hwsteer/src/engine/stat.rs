// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Port-level operation counters.

use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;

macro_rules! port_stats {
    ($($(#[$attr:meta])* $name:ident),* $(,)?) => {
        /// Counters bumped as the port processes operations.
        #[derive(Debug, Default)]
        pub struct PortStats {
            $($(#[$attr])* pub $name: AtomicU64,)*
        }

        /// A point-in-time copy of [`PortStats`].
        #[derive(
            Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq,
            Serialize,
        )]
        pub struct PortStatsSnapshot {
            $(pub $name: u64,)*
        }

        impl PortStats {
            pub fn snapshot(&self) -> PortStatsSnapshot {
                PortStatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        impl PortStatsSnapshot {
            /// Name/value pairs, in declaration order.
            pub fn fields(
                &self,
            ) -> [(&'static str, u64); port_stats!(@count $($name)*)] {
                [$((stringify!($name), self.$name),)*]
            }
        }
    };

    (@count) => { 0 };
    (@count $head:ident $($tail:ident)*) => {
        1 + port_stats!(@count $($tail)*)
    };
}

port_stats!(
    /// Rule create jobs accepted onto a queue.
    rule_create,
    rule_create_ok,
    rule_create_fail,
    rule_destroy,
    rule_update,
    rule_move,
    /// Enqueue attempts refused because the queue had no free
    /// descriptor.
    queue_full,
    /// Failures raised by the steering engine, synchronous or in a
    /// completion.
    hw_error,
    indirect_create,
    indirect_destroy,
    completions,
    aged,
    table_resize,
);

impl PortStats {
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}
