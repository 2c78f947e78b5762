// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Flow actions.

use super::IndirectHandle;
use super::IndirectListHandle;
use super::MeterMarkConf;
use super::TableId;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// A header field addressable by a modify-field action.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum Field {
    MacDst,
    MacSrc,
    VlanVid,
    VlanPcp,
    Ipv4Dscp,
    Ipv4Ttl,
    Ipv6HopLimit,
    TcpSeq,
    TcpAck,
    L4SrcPort,
    L4DstPort,
    Tag(u8),
    Meta,
    Mark,
}

impl Field {
    /// The width of the field in bits.
    pub fn bits(&self) -> u32 {
        match self {
            Self::MacDst | Self::MacSrc => 48,
            Self::VlanVid => 12,
            Self::VlanPcp => 3,
            Self::Ipv4Dscp => 6,
            Self::Ipv4Ttl | Self::Ipv6HopLimit => 8,
            Self::TcpSeq | Self::TcpAck => 32,
            Self::L4SrcPort | Self::L4DstPort => 16,
            Self::Tag(_) | Self::Meta => 32,
            Self::Mark => 24,
        }
    }
}

/// A field reference: which field, at which encapsulation level, and
/// starting at which bit offset.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct FieldId {
    pub field: Field,
    pub level: u8,
    pub offset: u32,
}

impl FieldId {
    pub fn new(field: Field) -> Self {
        Self { field, level: 0, offset: 0 }
    }

    /// The mask form of this field reference: the same selector with
    /// the level and offset fully masked.
    pub fn full_mask(&self) -> Self {
        Self { field: self.field, level: u8::MAX, offset: u32::MAX }
    }

    pub fn is_full_mask_of(&self, other: &FieldId) -> bool {
        self.field == other.field
            && self.level == u8::MAX
            && self.offset == u32::MAX
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum ModifyOp {
    Set,
    Add,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum ModifySrc {
    Value(u64),
    Field(FieldId),
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct ModifyField {
    pub op: ModifyOp,
    pub dst: FieldId,
    pub src: ModifySrc,
    pub width: u32,
}

impl ModifyField {
    pub fn set(field: Field, value: u64) -> Self {
        Self {
            op: ModifyOp::Set,
            dst: FieldId::new(field),
            src: ModifySrc::Value(value),
            width: field.bits(),
        }
    }

    /// A mask which fixes the field selector and width, and fixes the
    /// source value only when `value_mask` is non-zero.
    pub fn mask_with(&self, value_mask: u64) -> Self {
        let src = match self.src {
            ModifySrc::Value(_) => ModifySrc::Value(value_mask),
            ModifySrc::Field(f) => ModifySrc::Field(f.full_mask()),
        };
        Self { op: self.op, dst: self.dst.full_mask(), src, width: u32::MAX }
    }
}

/// A flow action.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Action {
    Drop,
    Mark { id: u32 },
    Jump { group: u32 },
    JumpToTableIndex { table: TableId, index: u32 },
    Queue { index: u16 },
    Rss { queues: Vec<u16> },
    Count { id: u32 },
    Age { timeout: u32, context: Option<u64> },
    MeterMark(MeterMarkConf),
    RepresentedPort { port_id: u16 },
    ModifyField(ModifyField),
    SetTag { index: u8, data: u32, mask: u32 },
    PushVlan { ethertype: u16, vid: u16, pcp: u8 },
    SetVlanVid { vid: u16 },
    SetVlanPcp { pcp: u8 },
    PopVlan,
    RawEncap { data: Vec<u8> },
    RawDecap { size: u16 },
    Indirect(IndirectHandle),
    IndirectList(IndirectListHandle),
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum ActionKind {
    Drop,
    Mark,
    Jump,
    JumpToTableIndex,
    Queue,
    Rss,
    Count,
    Age,
    MeterMark,
    RepresentedPort,
    ModifyField,
    SetTag,
    PushVlan,
    SetVlanVid,
    SetVlanPcp,
    PopVlan,
    RawEncap,
    RawDecap,
    Indirect,
    IndirectList,
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Drop => "drop",
            Self::Mark => "mark",
            Self::Jump => "jump",
            Self::JumpToTableIndex => "jump_to_table_index",
            Self::Queue => "queue",
            Self::Rss => "rss",
            Self::Count => "count",
            Self::Age => "age",
            Self::MeterMark => "meter_mark",
            Self::RepresentedPort => "represented_port",
            Self::ModifyField => "modify_field",
            Self::SetTag => "set_tag",
            Self::PushVlan => "push_vlan",
            Self::SetVlanVid => "set_vlan_vid",
            Self::SetVlanPcp => "set_vlan_pcp",
            Self::PopVlan => "pop_vlan",
            Self::RawEncap => "raw_encap",
            Self::RawDecap => "raw_decap",
            Self::Indirect => "indirect",
            Self::IndirectList => "indirect_list",
        };
        write!(f, "{s}")
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Drop => ActionKind::Drop,
            Self::Mark { .. } => ActionKind::Mark,
            Self::Jump { .. } => ActionKind::Jump,
            Self::JumpToTableIndex { .. } => ActionKind::JumpToTableIndex,
            Self::Queue { .. } => ActionKind::Queue,
            Self::Rss { .. } => ActionKind::Rss,
            Self::Count { .. } => ActionKind::Count,
            Self::Age { .. } => ActionKind::Age,
            Self::MeterMark(_) => ActionKind::MeterMark,
            Self::RepresentedPort { .. } => ActionKind::RepresentedPort,
            Self::ModifyField(_) => ActionKind::ModifyField,
            Self::SetTag { .. } => ActionKind::SetTag,
            Self::PushVlan { .. } => ActionKind::PushVlan,
            Self::SetVlanVid { .. } => ActionKind::SetVlanVid,
            Self::SetVlanPcp { .. } => ActionKind::SetVlanPcp,
            Self::PopVlan => ActionKind::PopVlan,
            Self::RawEncap { .. } => ActionKind::RawEncap,
            Self::RawDecap { .. } => ActionKind::RawDecap,
            Self::Indirect(_) => ActionKind::Indirect,
            Self::IndirectList(_) => ActionKind::IndirectList,
        }
    }

    /// The all-ones mask for this action: used as a mask it fixes
    /// every value of `self` in the template.
    pub fn full_mask(&self) -> Action {
        match self {
            Self::Drop => Self::Drop,
            Self::Mark { .. } => Self::Mark { id: u32::MAX },
            Self::Jump { .. } => Self::Jump { group: u32::MAX },
            Self::JumpToTableIndex { table, .. } => {
                Self::JumpToTableIndex { table: *table, index: u32::MAX }
            }
            Self::Queue { .. } => Self::Queue { index: u16::MAX },
            Self::Rss { queues } => Self::Rss { queues: queues.clone() },
            Self::Count { .. } => Self::Count { id: u32::MAX },
            Self::Age { .. } => {
                Self::Age { timeout: u32::MAX, context: Some(u64::MAX) }
            }
            Self::MeterMark(conf) => Self::MeterMark(*conf),
            Self::RepresentedPort { .. } => {
                Self::RepresentedPort { port_id: u16::MAX }
            }
            Self::ModifyField(mf) => Self::ModifyField(mf.mask_with(u64::MAX)),
            Self::SetTag { index, .. } => {
                Self::SetTag { index: *index, data: u32::MAX, mask: u32::MAX }
            }
            Self::PushVlan { .. } => Self::PushVlan {
                ethertype: u16::MAX,
                vid: u16::MAX,
                pcp: u8::MAX,
            },
            Self::SetVlanVid { .. } => Self::SetVlanVid { vid: u16::MAX },
            Self::SetVlanPcp { .. } => Self::SetVlanPcp { pcp: u8::MAX },
            Self::PopVlan => Self::PopVlan,
            Self::RawEncap { data } => Self::RawEncap { data: data.clone() },
            Self::RawDecap { .. } => Self::RawDecap { size: u16::MAX },
            Self::Indirect(h) => Self::Indirect(*h),
            Self::IndirectList(h) => Self::IndirectList(*h),
        }
    }

    /// Does this action, used as a mask, fix no value at all?
    ///
    /// Actions without a value (drop, pop VLAN) are never considered
    /// zero.
    pub fn is_zero_mask(&self) -> bool {
        match self {
            Self::Drop | Self::PopVlan => false,
            Self::Mark { id } => *id == 0,
            Self::Jump { group } => *group == 0,
            Self::JumpToTableIndex { index, .. } => *index == 0,
            Self::Queue { index } => *index == 0,
            Self::Rss { queues } => queues.is_empty(),
            Self::Count { id } => *id == 0,
            Self::Age { timeout, .. } => *timeout == 0,
            Self::MeterMark(conf) => conf.profile.0 == 0,
            Self::RepresentedPort { port_id } => *port_id == 0,
            Self::ModifyField(mf) => match mf.src {
                ModifySrc::Value(v) => v == 0,
                ModifySrc::Field(_) => false,
            },
            Self::SetTag { data, .. } => *data == 0,
            Self::PushVlan { ethertype, .. } => *ethertype == 0,
            Self::SetVlanVid { vid } => *vid == 0,
            Self::SetVlanPcp { pcp } => *pcp == 0,
            Self::RawEncap { data } => data.is_empty(),
            Self::RawDecap { size } => *size == 0,
            Self::Indirect(h) => h.index == 0,
            Self::IndirectList(h) => h.0 == 0,
        }
    }

    /// Is this a fate action, ending the action list's processing?
    pub fn is_terminating(&self) -> bool {
        matches!(
            self,
            Self::Drop
                | Self::Jump { .. }
                | Self::JumpToTableIndex { .. }
                | Self::Queue { .. }
                | Self::Rss { .. }
                | Self::RepresentedPort { .. }
                | Self::IndirectList(_)
        )
    }
}

/// An action as it appears in an action template, with its mask.
///
/// A non-zero mask fixes the action's value in the template. A `None`
/// or zero mask defers the value to each rule.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionSpec {
    pub action: Action,
    pub mask: Option<Action>,
}

impl ActionSpec {
    /// An action whose value is fixed by the template.
    pub fn fixed(action: Action) -> Self {
        let mask = Some(action.full_mask());
        Self { action, mask }
    }

    /// An action whose value is supplied per rule.
    ///
    /// A modify-field action still fixes its field selector and
    /// width; only its source value is deferred.
    pub fn per_rule(action: Action) -> Self {
        let mask = match &action {
            Action::ModifyField(mf) => {
                Some(Action::ModifyField(mf.mask_with(0)))
            }
            _ => None,
        };
        Self { action, mask }
    }

    /// Is the action's value fixed by the template?
    pub fn is_masked(&self) -> bool {
        self.mask.as_ref().is_some_and(|m| !m.is_zero_mask())
    }

    pub fn with_mask(action: Action, mask: Action) -> Self {
        Self { action, mask: Some(mask) }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}
