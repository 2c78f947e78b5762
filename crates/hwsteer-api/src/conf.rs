// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Port, table, and operation attributes.

use super::FlowDir;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Port-level object-count hints and queue layout.
///
/// Every field has a default so that partial configuration files are
/// accepted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PortConfig {
    /// The port's own id, used for implicit represented-port matching.
    pub port_id: u16,

    /// The number of flow queues, not counting the control queue.
    pub nb_queues: u16,

    /// The number of job descriptors per queue.
    pub queue_size: u32,

    pub nb_counters: u32,
    pub nb_aging: u32,
    pub nb_meters: u32,
    pub nb_meter_profiles: u32,
    pub nb_conn_tracks: u32,

    /// Require resource operations to be drained on the queue they
    /// were submitted on.
    pub strict_queue: bool,

    /// Control-plane default rules are installed in the transfer root,
    /// so user transfer groups are shifted by one.
    pub default_rules: bool,

    /// Prepend an implicit represented-port item to transfer pattern
    /// templates.
    pub repr_matching: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_id: 0,
            nb_queues: 4,
            queue_size: 64,
            nb_counters: 1024,
            nb_aging: 256,
            nb_meters: 256,
            nb_meter_profiles: 16,
            nb_conn_tracks: 256,
            strict_queue: false,
            default_rules: true,
            repr_matching: true,
        }
    }
}

/// How rules are placed in a table.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum InsertionType {
    /// By hash of the pattern.
    #[default]
    Pattern,
    /// By caller-provided index; no pattern is matched.
    Index,
    /// By caller-provided index, additionally matching the pattern.
    IndexWithPattern,
}

impl InsertionType {
    pub fn is_by_index(&self) -> bool {
        !matches!(self, Self::Pattern)
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum HashFunc {
    #[default]
    Default,
    Crc32,
    Crc16,
    Linear,
}

/// Attributes of a template table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableAttr {
    pub group: u32,
    pub priority: u32,
    pub dir: FlowDir,
    pub capacity: u32,
    pub insertion: InsertionType,
    pub hash: HashFunc,
    pub resizable: bool,

    /// Rules in the table may have their actions replaced with
    /// `async_update`.
    pub updatable: bool,
}

impl TableAttr {
    pub fn new(group: u32, dir: FlowDir, capacity: u32) -> Self {
        Self {
            group,
            priority: 0,
            dir,
            capacity,
            insertion: InsertionType::Pattern,
            hash: HashFunc::Default,
            resizable: false,
            updatable: false,
        }
    }

    pub fn resizable(mut self) -> Self {
        self.resizable = true;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub fn insertion(mut self, insertion: InsertionType) -> Self {
        self.insertion = insertion;
        self
    }
}

/// Per-operation attributes.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct OpAttr {
    /// Accumulate the submission; it only becomes visible after the
    /// next `push` on the queue.
    pub postpone: bool,
}

impl OpAttr {
    pub const NOW: Self = Self { postpone: false };
    pub const POSTPONE: Self = Self { postpone: true };
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum QueryAction {
    Count { reset: bool },
    Age,
}

impl Display for QueryAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Count { .. } => write!(f, "count"),
            Self::Age => write!(f, "age"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: PortConfig =
            toml::from_str("nb_queues = 2\nstrict_queue = true\n").unwrap();
        assert_eq!(cfg.nb_queues, 2);
        assert!(cfg.strict_queue);
        assert_eq!(cfg.queue_size, PortConfig::default().queue_size);
    }
}
