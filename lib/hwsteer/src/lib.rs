// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A hardware flow-steering template engine.
//!
//! Pattern and action templates are compiled once, bound into template
//! tables, and instantiated as flow rules through per-queue
//! asynchronous jobs. The hardware itself sits behind the
//! [`engine::steering::SteeringEngine`] trait; [`engine::soft`]
//! provides an in-memory implementation.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

pub mod api {
    pub use hwsteer_api::*;
}

pub mod engine;
pub mod print;
pub mod provider;
pub mod sys;

use alloc::boxed::Box;
use provider::LogProvider;

/// The execution context handed to a port: the ambient services it
/// runs with.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}

impl ExecCtx {
    pub fn new(log: impl LogProvider + 'static) -> Self {
        Self { log: Box::new(log) }
    }
}
