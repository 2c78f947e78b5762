// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared between the flow-steering engine and its consumers.
//!
//! Everything in this crate is plain data: it describes templates,
//! actions, tables, and the results of operations, but it carries no
//! engine state. The types are `serde` friendly so that they may be
//! logged, dumped, or loaded from configuration files.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod action;
pub mod conf;
pub mod dump;
pub mod error;
pub mod handle;
pub mod indirect;
pub mod item;
pub mod mac;

pub use action::*;
pub use conf::*;
pub use dump::*;
pub use error::*;
pub use handle::*;
pub use indirect::*;
pub use item::*;
pub use mac::*;

/// The overall version of the API. Anytime a type in this crate is
/// added, removed, or modified, this number should increment.
pub const API_VERSION: u64 = 3;

/// The maximum number of hardware action slots a single rule may use.
pub const MAX_RULE_ACTIONS: usize = 16;

/// The maximum number of pattern or action templates bound to a
/// single table.
pub const MAX_TABLE_TEMPLATES: usize = 32;

/// The maximum number of times a table may be resized over its
/// lifetime.
pub const MAX_TABLE_RESIZES: usize = 64;

/// The maximum length of raw encapsulation data.
pub const MAX_ENCAP_LEN: usize = 132;

/// The maximum number of modify-header commands in one template.
pub const MAX_MHDR_CMDS: usize = 32;

/// The number of tag registers addressable by `Tag` items and
/// `SetTag` actions.
pub const MAX_TAG_INDEX: u8 = 8;

bitflags! {
    /// The direction(s) a template or table applies to.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
        PartialOrd, Serialize,
    )]
    pub struct FlowDir: u8 {
        const INGRESS = 1;
        const EGRESS = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

impl FlowDir {
    /// Is exactly one direction set?
    pub fn is_single(&self) -> bool {
        self.bits().count_ones() == 1
    }
}

impl Display for FlowDir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }

        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        Ok(())
    }
}

impl core::str::FromStr for FlowDir {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let mut dir = FlowDir::empty();
        for part in s.split(['|', ',']) {
            match part.trim().to_ascii_lowercase().as_str() {
                "ingress" | "in" => dir |= FlowDir::INGRESS,
                "egress" | "out" => dir |= FlowDir::EGRESS,
                "transfer" | "fdb" => dir |= FlowDir::TRANSFER,
                _ => return Err(format!("invalid direction: {part}")),
            }
        }
        Ok(dir)
    }
}

/// Attributes common to pattern and action templates.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TemplateAttr {
    pub dir: FlowDir,

    /// When set, the pattern matches exactly the items listed and no
    /// implicit protocol items are inferred.
    pub relaxed: bool,
}

impl TemplateAttr {
    pub fn new(dir: FlowDir) -> Self {
        Self { dir, relaxed: false }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flow_dir_parse_and_display() {
        let dir: FlowDir = "ingress|transfer".parse().unwrap();
        assert_eq!(dir, FlowDir::INGRESS | FlowDir::TRANSFER);
        assert!(!dir.is_single());
        assert_eq!(format!("{dir}"), "INGRESS|TRANSFER");
        assert!("sideways".parse::<FlowDir>().is_err());
        assert_eq!(format!("{}", FlowDir::empty()), "NONE");
    }
}
