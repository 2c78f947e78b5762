// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Indirect (shared) actions and the configuration of the stateful
//! objects behind them.

use super::Action;
use super::MeterProfileId;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum IndirectKind {
    Count = 1,
    Age = 2,
    MeterMark = 3,
    Conntrack = 4,
}

impl Display for IndirectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Count => "count",
            Self::Age => "age",
            Self::MeterMark => "meter_mark",
            Self::Conntrack => "conntrack",
        };
        write!(f, "{s}")
    }
}

/// A handle to an indirect action.
///
/// The index is 1-based within the pool of its kind. The raw form
/// packs the kind into the top three bits so that a handle can travel
/// through interfaces that only carry a `u32`.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct IndirectHandle {
    pub kind: IndirectKind,
    pub index: u32,
}

impl IndirectHandle {
    pub const KIND_SHIFT: u32 = 29;
    pub const INDEX_MASK: u32 = (1 << Self::KIND_SHIFT) - 1;

    pub fn new(kind: IndirectKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub fn raw(&self) -> u32 {
        let kind = (self.kind as u32) << Self::KIND_SHIFT;
        kind | (self.index & Self::INDEX_MASK)
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        let kind = match raw >> Self::KIND_SHIFT {
            1 => IndirectKind::Count,
            2 => IndirectKind::Age,
            3 => IndirectKind::MeterMark,
            4 => IndirectKind::Conntrack,
            _ => return None,
        };
        Some(Self { kind, index: raw & Self::INDEX_MASK })
    }
}

impl Display for IndirectHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.index)
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum Color {
    #[default]
    Green,
    Yellow,
    Red,
}

/// A single-rate three-color meter profile.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct MeterProfile {
    /// Committed information rate, bytes per second.
    pub cir: u64,
    /// Committed burst size, bytes.
    pub cbs: u64,
    /// Excess burst size, bytes.
    pub ebs: u64,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct MeterMarkConf {
    pub profile: MeterProfileId,
    pub color_aware: bool,
    pub init_color: Color,
    pub enabled: bool,
}

impl MeterMarkConf {
    pub fn new(profile: MeterProfileId) -> Self {
        Self {
            profile,
            color_aware: false,
            init_color: Color::Green,
            enabled: true,
        }
    }
}

impl Default for MeterMarkConf {
    fn default() -> Self {
        Self::new(MeterProfileId(0))
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum CtState {
    #[default]
    SynRecv,
    Established,
    FinWait,
    CloseWait,
    LastAck,
    TimeWait,
}

/// The connection-tracking context profile.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct CtProfile {
    pub peer_port: u16,
    pub is_original_dir: bool,
    pub enable: bool,
    pub live_connection: bool,
    pub state: CtState,
    pub max_ack_window: u8,
    pub last_window: u16,
    pub last_seq: u32,
    pub last_ack: u32,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct AgeConf {
    /// Seconds without a hit before the record ages out.
    pub timeout: u32,
    /// Reported by the aged-flows query; zero selects the handle's raw
    /// value.
    pub context: u64,
}

/// Configuration for a new indirect action.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IndirectActionConf {
    Count,
    Age(AgeConf),
    MeterMark(MeterMarkConf),
    Conntrack(CtProfile),
}

impl IndirectActionConf {
    pub fn kind(&self) -> IndirectKind {
        match self {
            Self::Count => IndirectKind::Count,
            Self::Age(_) => IndirectKind::Age,
            Self::MeterMark(_) => IndirectKind::MeterMark,
            Self::Conntrack(_) => IndirectKind::Conntrack,
        }
    }
}

/// An in-place update to an existing indirect action.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IndirectUpdate {
    /// Replace the timeout (when given) and restart the aging timer.
    Age { timeout: Option<u32> },
    MeterMark {
        profile: Option<MeterProfileId>,
        init_color: Option<Color>,
        enabled: Option<bool>,
    },
    Conntrack {
        profile: Option<CtProfile>,
        is_original_dir: Option<bool>,
    },
}

/// The configuration of an indirect action list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IndirectListConf {
    /// Replicate the packet to each clone chain in addition to the
    /// rule's own fate. Each chain may start with a raw encap and must
    /// end in a represented port, queue, or jump.
    Mirror { clones: Vec<Vec<Action>> },
}
