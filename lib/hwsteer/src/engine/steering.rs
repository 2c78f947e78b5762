// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The steering-engine boundary.
//!
//! The port never programs hardware itself. Everything below the
//! template/table/rule abstraction (matcher objects, typed action
//! objects, work-queue submission and completion polling) is reached
//! through the [`SteeringEngine`] trait. Every queued call carries an
//! opaque correlation token which the engine hands back verbatim in
//! the matching [`HwCompletion`].

use crate::api::CtProfile;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::HashFunc;
use crate::api::InsertionType;
use crate::api::Item;
use crate::api::MAX_RULE_ACTIONS;
use crate::api::MeterMarkConf;
use crate::api::MeterProfile;
use crate::api::PatternItem;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct MatchTemplateId(pub u32);

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct HwActionTemplateId(pub u32);

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct MatcherId(pub u32);

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct ActionObjId(pub u32);

impl ActionObjId {
    /// Placeholder for slots whose object is only known per rule.
    pub const NONE: Self = Self(0);
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct RuleHandle(pub u64);

/// An error reported by the steering engine. The status is a negative
/// errno.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HwError {
    pub status: i32,
    pub msg: String,
}

impl HwError {
    pub fn new(status: i32, msg: impl Into<String>) -> Self {
        Self { status, msg: msg.into() }
    }
}

impl Display for HwError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.msg, self.status)
    }
}

impl From<HwError> for FlowError {
    fn from(e: HwError) -> Self {
        FlowError::Hardware { status: e.status, msg: e.msg }
    }
}

/// The packet reformat performed by a reformat action.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum ReformatKind {
    /// Remove an L2 tunnel, keeping the inner Ethernet header.
    TnlL2ToL2,
    /// Push a tunnel in front of the Ethernet header.
    L2ToTnlL2,
    /// Remove an L3 tunnel and write a new Ethernet header.
    TnlL3ToL2,
    /// Replace the Ethernet header with an L3 tunnel.
    L2ToTnlL3,
}

impl ReformatKind {
    /// Does this reformat run before the rest of the action list (a
    /// decap) rather than after it (an encap)?
    pub fn is_decap(&self) -> bool {
        matches!(self, Self::TnlL2ToL2 | Self::TnlL3ToL2)
    }
}

impl Display for ReformatKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::TnlL2ToL2 => "tnl_l2_to_l2",
            Self::L2ToTnlL2 => "l2_to_tnl_l2",
            Self::TnlL3ToL2 => "tnl_l3_to_l2",
            Self::L2ToTnlL3 => "l2_to_tnl_l3",
        };
        write!(f, "{s}")
    }
}

/// The hardware action slot kinds, in the order the hardware executes
/// them.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum HwActionKind {
    Decap,
    PopVlan,
    Counter,
    Tag,
    AsoMeter,
    AsoCt,
    PushVlan,
    ModifyHeader,
    Encap,
    Drop,
    Jump,
    JumpToMatcher,
    Queue,
    Rss,
    Vport,
    DestArray,
}

impl HwActionKind {
    /// The position class of the slot: slots are sorted by this rank,
    /// and all fate actions share the last one.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Decap => 0,
            Self::PopVlan => 1,
            Self::Counter => 2,
            Self::Tag => 3,
            Self::AsoMeter => 4,
            Self::AsoCt => 5,
            Self::PushVlan => 6,
            Self::ModifyHeader => 7,
            Self::Encap => 8,
            Self::Drop
            | Self::Jump
            | Self::JumpToMatcher
            | Self::Queue
            | Self::Rss
            | Self::Vport
            | Self::DestArray => 9,
        }
    }

    pub fn is_fate(&self) -> bool {
        self.rank() == 9
    }
}

impl Display for HwActionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Decap => "decap",
            Self::PopVlan => "pop_vlan",
            Self::Counter => "ctr",
            Self::Tag => "tag",
            Self::AsoMeter => "aso_meter",
            Self::AsoCt => "aso_ct",
            Self::PushVlan => "push_vlan",
            Self::ModifyHeader => "modify_hdr",
            Self::Encap => "encap",
            Self::Drop => "drop",
            Self::Jump => "jump",
            Self::JumpToMatcher => "jump_to_matcher",
            Self::Queue => "queue",
            Self::Rss => "rss",
            Self::Vport => "vport",
            Self::DestArray => "dest_array",
        };
        write!(f, "{s}")
    }
}

/// One destination of a mirror.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorDest {
    pub fate: ActionObjId,
    pub reformat: Option<ActionObjId>,
}

/// The description of a typed action object.
///
/// `bulk` objects hold one entry per rule (or per pool entry); rules
/// address their entry with the offset carried in the rule action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HwActionDesc {
    Drop,
    Tag,
    Jump { group: u32 },
    JumpToMatcher { matcher: MatcherId },
    Queue,
    Rss { queues: Vec<u16> },
    Vport { port_id: u16 },
    CounterBulk { count: u32 },
    ModifyHeader { cmds: Vec<u8>, bulk: u32 },
    Reformat { kind: ReformatKind, data: Vec<u8>, bulk: u32 },
    PushVlan,
    PopVlan,
    AsoMeterBulk { count: u32 },
    AsoCtBulk { count: u32 },
    DestArray { dests: Vec<MirrorDest> },
}

/// The per-rule argument of a hardware action slot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum RuleActionArg {
    #[default]
    None,
    Tag(u32),
    Queue(u16),
    /// An entry of a bulk object.
    Offset(u32),
    /// An entry of a bulk object, with the data to write into it.
    Data { offset: u32, data: Vec<u8> },
    /// The VLAN header pushed: TPID in the upper half, TCI in the
    /// lower.
    VlanHdr(u32),
    /// An entry of a bulk ASO object. For conntrack `param` is the
    /// direction (1 for the original direction); for meters it is the
    /// initial color.
    Aso { offset: u32, param: u32 },
    /// A rule index in the target matcher.
    Index(u32),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleAction {
    pub kind: HwActionKind,
    pub obj: ActionObjId,
    pub arg: RuleActionArg,
}

impl RuleAction {
    pub fn new(kind: HwActionKind, obj: ActionObjId) -> Self {
        Self { kind, obj, arg: RuleActionArg::None }
    }
}

/// A complete rule action set.
pub type RuleActions = heapless::Vec<RuleAction, MAX_RULE_ACTIONS>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MatcherAttr {
    pub group: u32,
    pub priority: u32,
    pub dir: FlowDir,
    pub capacity: u32,
    pub insertion: InsertionType,
    pub hash: HashFunc,
    pub resizable: bool,
}

/// A rule insertion request.
#[derive(Clone, Copy, Debug)]
pub struct RuleRequest<'a> {
    pub queue: u16,
    pub matcher: MatcherId,
    pub mt_idx: u8,
    pub items: &'a [Item],
    pub at_idx: u8,
    pub actions: &'a [RuleAction],
    /// For index-based insertion, the 0-based rule index.
    pub rule_idx: Option<u32>,
    pub token: u64,
    pub burst: bool,
}

/// An operation on a bulk ASO object entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AsoOp {
    MeterInit { offset: u32, profile: MeterProfile, conf: MeterMarkConf },
    MeterUpdate { offset: u32, profile: MeterProfile, conf: MeterMarkConf },
    CtInit { offset: u32, profile: CtProfile },
    CtUpdate { offset: u32, profile: CtProfile },
    CtQuery { offset: u32 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HwCompletion {
    pub token: u64,
    /// Zero on success, otherwise a negative errno.
    pub status: i32,
    /// The context read back by a conntrack query.
    pub ct: Option<CtProfile>,
}

impl HwCompletion {
    pub fn ok(token: u64) -> Self {
        Self { token, status: 0, ct: None }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// The capability the port drives to program the hardware.
///
/// Object creation and destruction are synchronous. Rule operations and
/// ASO operations are queued on one of the engine's queues and complete
/// through [`SteeringEngine::queue_poll`], in submission order per
/// queue. A `burst` submission is held back until the next
/// [`SteeringEngine::queue_drain`] on its queue.
pub trait SteeringEngine: Send + Sync {
    /// Prepare `nb_queues` queues (including the control queue) of
    /// depth `queue_size`.
    fn configure(&self, nb_queues: u16, queue_size: u32) -> Result<(), HwError>;

    fn match_template_create(
        &self,
        items: &[PatternItem],
        relaxed: bool,
    ) -> Result<MatchTemplateId, HwError>;

    fn match_template_destroy(
        &self,
        id: MatchTemplateId,
    ) -> Result<(), HwError>;

    fn action_template_create(
        &self,
        kinds: &[HwActionKind],
    ) -> Result<HwActionTemplateId, HwError>;

    fn action_template_destroy(
        &self,
        id: HwActionTemplateId,
    ) -> Result<(), HwError>;

    fn matcher_create(
        &self,
        attr: &MatcherAttr,
        mts: &[MatchTemplateId],
        ats: &[HwActionTemplateId],
    ) -> Result<MatcherId, HwError>;

    fn matcher_destroy(&self, id: MatcherId) -> Result<(), HwError>;

    /// Make `dst` the target of rules moved out of `src`.
    fn matcher_resize_set_target(
        &self,
        src: MatcherId,
        dst: MatcherId,
    ) -> Result<(), HwError>;

    fn action_create(
        &self,
        desc: &HwActionDesc,
        dir: FlowDir,
    ) -> Result<ActionObjId, HwError>;

    fn action_destroy(&self, id: ActionObjId) -> Result<(), HwError>;

    fn rule_create(&self, req: &RuleRequest<'_>) -> Result<RuleHandle, HwError>;

    fn rule_destroy(
        &self,
        queue: u16,
        rule: RuleHandle,
        token: u64,
        burst: bool,
    ) -> Result<(), HwError>;

    fn rule_action_update(
        &self,
        queue: u16,
        rule: RuleHandle,
        at_idx: u8,
        actions: &[RuleAction],
        token: u64,
        burst: bool,
    ) -> Result<(), HwError>;

    /// Move a rule from its matcher to that matcher's resize target.
    fn rule_move(
        &self,
        queue: u16,
        rule: RuleHandle,
        token: u64,
        burst: bool,
    ) -> Result<(), HwError>;

    fn rule_hash(
        &self,
        matcher: MatcherId,
        mt_idx: u8,
        items: &[Item],
    ) -> Result<u32, HwError>;

    fn aso_submit(
        &self,
        queue: u16,
        obj: ActionObjId,
        op: &AsoOp,
        token: u64,
        burst: bool,
    ) -> Result<(), HwError>;

    /// Ring the doorbell: make every held-back submission on `queue`
    /// visible to the hardware.
    fn queue_drain(&self, queue: u16) -> Result<(), HwError>;

    /// Append up to `max` completions from `queue` to `out`, returning
    /// how many were appended.
    fn queue_poll(
        &self,
        queue: u16,
        out: &mut Vec<HwCompletion>,
        max: usize,
    ) -> Result<usize, HwError>;

    /// Read the (packets, bytes) of entry `offset` of a counter bulk.
    fn counter_query(
        &self,
        obj: ActionObjId,
        offset: u32,
    ) -> Result<(u64, u64), HwError>;
}
