// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flow-steering engine.

/// Return a `BadState` error unless `$sg` is one of the listed states.
macro_rules! check_state {
    ( $sg:expr, [ $( $state:expr ),* ] ) => {
        if $( $sg != $state )&&* {
            Err($crate::api::FlowError::BadState(format!("{}", $sg)))
        } else {
            Ok(())
        }
    };

    // Trailing comma after state list (because check_state! call
    // spans multiple lines).
    ( $sg:expr, [ $( $state:expr ),* ], ) => {
        check_state!($sg, [$( $state ),*])
    };

    // Trailing comma in state list.
    ( $sg:expr, [ $( $state:expr ),+ ,] ) => {
        check_state!($sg, [$( $state ),*])
    };
}

pub mod actions;
pub mod codec;
pub mod construct;
pub mod flex;
pub mod flow;
pub mod ipool;
pub mod job;
pub mod pattern;
pub mod pool;
pub mod port;
pub mod soft;
pub mod stat;
pub mod steering;
pub mod table;
