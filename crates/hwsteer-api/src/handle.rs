// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Opaque identifiers handed out by a port.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

macro_rules! id_type {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq,
            PartialOrd, Serialize,
        )]
        pub struct $name(pub u32);

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// A pattern template registered with a port.
    PatternTemplateId,
    "pt"
);
id_type!(
    /// An action template registered with a port.
    ActionsTemplateId,
    "at"
);
id_type!(
    /// A template table.
    TableId,
    "tbl"
);
id_type!(
    /// A flex parser item.
    FlexHandle,
    "flex"
);
id_type!(
    /// A meter profile.
    MeterProfileId,
    "prof"
);
id_type!(
    /// An indirect action list (mirror).
    IndirectListHandle,
    "list"
);

/// A flow rule instance.
///
/// The rule index is 0-based and unique within its table for as long
/// as the rule exists. In an index-based table it is the index the
/// rule was inserted at.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct FlowHandle {
    pub table: TableId,
    pub rule_idx: u32,
}

impl Display for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.rule_idx)
    }
}
