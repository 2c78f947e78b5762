// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Action templates.
//!
//! Compiling an action template fixes the hardware slot layout every
//! rule of the template uses. Slots are laid out in execution order:
//!
//! ```text
//!   decap | pop_vlan | counter | tag | meter | ct | push_vlan
//!         | modify_hdr | encap | fate
//! ```
//!
//! Several user actions may feed one slot: COUNT and AGE share the
//! counter slot; SET_VLAN_VID, SET_VLAN_PCP, MODIFY_FIELD, SET_TAG and
//! the VID/PCP half of PUSH_VLAN share the modify-header slot; a raw
//! decap and raw encap fuse into one reformat slot.
//!
//! `dr_offset[i]` is the slot of user action `i`; `src_offset[s]` is
//! the first user action that produced slot `s`.

use super::mhdr;
use super::mhdr::MhdrCmd;
use super::reformat;
use crate::api::Action;
use crate::api::ActionSpec;
use crate::api::ActionsTemplateId;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::IndirectKind;
use crate::api::MAX_ENCAP_LEN;
use crate::api::MAX_MHDR_CMDS;
use crate::api::MAX_RULE_ACTIONS;
use crate::api::MAX_TAG_INDEX;
use crate::api::ModifySrc;
use crate::api::TemplateAttr;
use crate::api::TemplateDump;
use crate::api::TemplateKind;
use crate::engine::codec;
use crate::engine::codec::ActionFlags;
use crate::engine::steering::HwActionKind;
use crate::engine::steering::HwActionTemplateId;
use crate::engine::steering::ReformatKind;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

/// The most user actions a template may list.
pub const MAX_TEMPLATE_ACTIONS: usize = 64;

/// The contiguous commands produced by one user action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MhdrRange {
    pub src: u16,
    pub start: u16,
    pub end: u16,
    pub fixed: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MhdrLayout {
    /// The template's commands. Per-rule ranges hold the template's
    /// (placeholder) values until patched.
    pub cmds: Vec<MhdrCmd>,
    pub ranges: Vec<MhdrRange>,
}

impl MhdrLayout {
    /// When every range is fixed all rules share one object.
    pub fn is_shared(&self) -> bool {
        self.ranges.iter().all(|r| r.fixed)
    }

    pub fn range_of(&self, src: u16) -> Option<&MhdrRange> {
        self.ranges.iter().find(|r| r.src == src)
    }

    fn push(&mut self, src: usize, fixed: bool, cmds: Vec<MhdrCmd>) {
        let start = self.cmds.len() as u16;
        self.cmds.extend(cmds);
        let end = self.cmds.len() as u16;
        self.ranges.push(MhdrRange { src: src as u16, start, end, fixed });
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReformatLayout {
    pub kind: ReformatKind,
    /// The length of the data written per rule.
    pub data_len: usize,
    /// The data, when fixed by the template.
    pub data: Option<Vec<u8>>,
    pub decap_src: Option<u16>,
    pub encap_src: Option<u16>,
}

impl ReformatLayout {
    pub fn is_shared(&self) -> bool {
        self.data.is_some()
    }
}

/// The compiled, immutable form of an action template.
#[derive(Clone, Debug)]
pub struct ActionTemplateLayout {
    pub attr: TemplateAttr,
    pub orig_actions: Vec<ActionSpec>,
    pub slots: Vec<HwActionKind>,
    pub dr_offset: Vec<u16>,
    pub src_offset: Vec<u16>,
    pub flags: ActionFlags,
    /// Bit `i` is set when user action `i` is resolved per rule.
    pub flex_map: u64,
    /// The template is a lone DROP; rules need no construction.
    pub only_drop: bool,
    pub mhdr: Option<MhdrLayout>,
    /// The modify-header slot, which PUSH_VLAN feeds without owning.
    pub mhdr_slot: Option<u16>,
    pub reformat: Option<ReformatLayout>,
    pub encoded: Vec<u8>,
    pub digest: u32,
}

/// Is this action's value taken from the template rather than from
/// each rule?
///
/// Value-less actions are always fixed. Stateful actions are always
/// resolved per rule, with a masked template supplying the
/// configuration.
pub fn is_fixed(spec: &ActionSpec) -> bool {
    match spec.action {
        Action::Drop | Action::PopVlan | Action::RawDecap { .. } => true,
        Action::Count { .. }
        | Action::Age { .. }
        | Action::MeterMark(_)
        | Action::Indirect(_)
        | Action::IndirectList(_) => false,
        _ => spec.is_masked(),
    }
}

#[derive(Default)]
struct SlotBuilder {
    slots: Vec<(HwActionKind, u16)>,
}

impl SlotBuilder {
    fn find(&self, kind: HwActionKind) -> Option<usize> {
        self.slots.iter().position(|(k, _)| *k == kind)
    }

    /// A slot several actions may share.
    fn shared(&mut self, kind: HwActionKind, src: usize) -> usize {
        match self.find(kind) {
            Some(pos) => pos,
            None => {
                self.slots.push((kind, src as u16));
                self.slots.len() - 1
            }
        }
    }

    fn unique(
        &mut self,
        kind: HwActionKind,
        src: usize,
    ) -> Result<usize, FlowError> {
        if self.find(kind).is_some() {
            return Err(FlowError::action(src, format!("duplicate {kind}")));
        }
        Ok(self.shared(kind, src))
    }

    fn fate(
        &mut self,
        kind: HwActionKind,
        src: usize,
    ) -> Result<usize, FlowError> {
        if self.slots.iter().any(|(k, _)| k.is_fate()) {
            return Err(FlowError::action(src, "more than one fate action"));
        }
        Ok(self.shared(kind, src))
    }
}

fn require_dir(
    tmpl: FlowDir,
    allowed: FlowDir,
    idx: usize,
    what: &str,
) -> Result<(), FlowError> {
    if !allowed.contains(tmpl) {
        return Err(FlowError::action(
            idx,
            format!("{what} is not allowed in {tmpl} templates"),
        ));
    }
    Ok(())
}

fn check_modify_mask(
    spec: &ActionSpec,
    idx: usize,
) -> Result<(), FlowError> {
    let (Action::ModifyField(mf), Some(Action::ModifyField(m))) =
        (&spec.action, &spec.mask)
    else {
        return Err(FlowError::action(idx, "modify_field requires a mask"));
    };

    if !m.dst.is_full_mask_of(&mf.dst) || m.width != u32::MAX || m.op != mf.op
    {
        return Err(FlowError::action(
            idx,
            "modify_field destination and width must be fully masked",
        ));
    }

    match (&mf.src, &m.src) {
        (ModifySrc::Value(_), ModifySrc::Value(_)) => Ok(()),
        (ModifySrc::Field(s), ModifySrc::Field(ms))
            if ms.is_full_mask_of(s) =>
        {
            Ok(())
        }
        _ => Err(FlowError::action(
            idx,
            "modify_field source selector must be fully masked",
        )),
    }
}

/// The commands of a modify-header action, given its current value.
pub fn action_cmds(action: &Action) -> Result<Vec<MhdrCmd>, String> {
    match action {
        Action::ModifyField(mf) => {
            mhdr::modify_field_cmds(mf.op, &mf.dst, &mf.src, mf.width)
        }
        Action::SetTag { index, data, mask } => {
            Ok(vec![mhdr::set_tag_cmd(*index, *data, *mask)?])
        }
        Action::SetVlanVid { vid } => Ok(vec![mhdr::vlan_vid_cmd(*vid)]),
        Action::SetVlanPcp { pcp } => Ok(vec![mhdr::vlan_pcp_cmd(*pcp)]),
        Action::PushVlan { vid, pcp, .. } => {
            Ok(vec![mhdr::vlan_vid_cmd(*vid), mhdr::vlan_pcp_cmd(*pcp)])
        }
        _ => Err(format!("{} has no modify-header form", action.kind())),
    }
}

/// Compile a masked action list.
pub fn compile(
    attr: TemplateAttr,
    actions: &[ActionSpec],
) -> Result<ActionTemplateLayout, FlowError> {
    let dir = attr.dir;
    if dir.is_empty() {
        return Err(FlowError::InvalidAttr("empty direction".into()));
    }
    if actions.is_empty() {
        return Err(FlowError::InvalidAttr("empty action list".into()));
    }
    if actions.len() > MAX_TEMPLATE_ACTIONS {
        return Err(FlowError::InvalidAttr(format!(
            "more than {MAX_TEMPLATE_ACTIONS} actions"
        )));
    }

    let mut sb = SlotBuilder::default();
    let mut pre = Vec::with_capacity(actions.len());
    let mut mhdr = MhdrLayout::default();
    let mut has_count = false;
    let mut has_age = false;
    let mut decap: Option<(usize, usize)> = None;
    let mut encap: Option<(usize, usize, Option<Vec<u8>>)> = None;
    // The reformat slot is placed once both halves are known.
    const REFORMAT: usize = usize::MAX;

    for (i, spec) in actions.iter().enumerate() {
        if spec.mask.as_ref().is_some_and(|m| m.kind() != spec.kind()) {
            return Err(FlowError::action(i, "mask kind differs from action"));
        }

        let fixed = is_fixed(spec);
        let counter = |has: &mut bool, what: &str| {
            if *has {
                return Err(FlowError::action(i, format!("duplicate {what}")));
            }
            *has = true;
            Ok(())
        };

        let pos = match &spec.action {
            Action::Drop => sb.fate(HwActionKind::Drop, i)?,

            Action::Mark { .. } => {
                require_dir(dir, FlowDir::INGRESS, i, "mark")?;
                sb.unique(HwActionKind::Tag, i)?
            }

            Action::Jump { .. } => sb.fate(HwActionKind::Jump, i)?,

            Action::JumpToTableIndex { .. } => {
                sb.fate(HwActionKind::JumpToMatcher, i)?
            }

            Action::Queue { .. } => {
                require_dir(dir, FlowDir::INGRESS, i, "queue")?;
                sb.fate(HwActionKind::Queue, i)?
            }

            Action::Rss { queues } => {
                require_dir(dir, FlowDir::INGRESS, i, "rss")?;
                if fixed && queues.is_empty() {
                    return Err(FlowError::action(i, "empty rss queue list"));
                }
                sb.fate(HwActionKind::Rss, i)?
            }

            Action::RepresentedPort { .. } => {
                require_dir(dir, FlowDir::TRANSFER, i, "represented_port")?;
                sb.fate(HwActionKind::Vport, i)?
            }

            Action::IndirectList(_) => sb.fate(HwActionKind::DestArray, i)?,

            Action::Count { .. } => {
                counter(&mut has_count, "counter")?;
                sb.shared(HwActionKind::Counter, i)
            }

            Action::Age { .. } => {
                counter(&mut has_age, "age")?;
                sb.shared(HwActionKind::Counter, i)
            }

            Action::MeterMark(_) => sb.unique(HwActionKind::AsoMeter, i)?,

            Action::Indirect(h) => match h.kind {
                IndirectKind::Count => {
                    counter(&mut has_count, "counter")?;
                    sb.shared(HwActionKind::Counter, i)
                }
                IndirectKind::Age => {
                    counter(&mut has_age, "age")?;
                    sb.shared(HwActionKind::Counter, i)
                }
                IndirectKind::MeterMark => {
                    sb.unique(HwActionKind::AsoMeter, i)?
                }
                IndirectKind::Conntrack => sb.unique(HwActionKind::AsoCt, i)?,
            },

            Action::ModifyField(_) => {
                check_modify_mask(spec, i)?;
                let cmds = action_cmds(&spec.action)
                    .map_err(|e| FlowError::action(i, e))?;
                mhdr.push(i, fixed, cmds);
                sb.shared(HwActionKind::ModifyHeader, i)
            }

            Action::SetTag { index, .. } => {
                if *index >= MAX_TAG_INDEX {
                    return Err(FlowError::action(
                        i,
                        format!("tag index {index} out of range"),
                    ));
                }
                let cmds = action_cmds(&spec.action)
                    .map_err(|e| FlowError::action(i, e))?;
                mhdr.push(i, fixed, cmds);
                sb.shared(HwActionKind::ModifyHeader, i)
            }

            Action::SetVlanVid { .. } | Action::SetVlanPcp { .. } => {
                let cmds = action_cmds(&spec.action)
                    .map_err(|e| FlowError::action(i, e))?;
                mhdr.push(i, fixed, cmds);
                sb.shared(HwActionKind::ModifyHeader, i)
            }

            Action::PushVlan { .. } => {
                let pos = sb.unique(HwActionKind::PushVlan, i)?;
                let cmds = action_cmds(&spec.action)
                    .map_err(|e| FlowError::action(i, e))?;
                mhdr.push(i, fixed, cmds);
                sb.shared(HwActionKind::ModifyHeader, i);
                pos
            }

            Action::PopVlan => sb.unique(HwActionKind::PopVlan, i)?,

            Action::RawEncap { data } => {
                if encap.is_some() {
                    return Err(FlowError::action(i, "duplicate raw_encap"));
                }
                if data.is_empty() || data.len() > MAX_ENCAP_LEN {
                    return Err(FlowError::action(
                        i,
                        format!(
                            "encap length {} not in 1..={MAX_ENCAP_LEN}",
                            data.len()
                        ),
                    ));
                }
                encap = Some((i, data.len(), fixed.then(|| data.clone())));
                REFORMAT
            }

            Action::RawDecap { size } => {
                if decap.is_some() {
                    return Err(FlowError::action(i, "duplicate raw_decap"));
                }
                decap = Some((i, usize::from(*size)));
                REFORMAT
            }
        };

        pre.push(pos);
    }

    if mhdr.cmds.len() > MAX_MHDR_CMDS {
        let src = mhdr.ranges.last().map_or(0, |r| usize::from(r.src));
        return Err(FlowError::action(
            src,
            format!(
                "{} modify-header commands exceed {MAX_MHDR_CMDS}",
                mhdr.cmds.len()
            ),
        ));
    }

    let reformat = if decap.is_some() || encap.is_some() {
        let first = match (&decap, &encap) {
            (Some((d, _)), Some((e, ..))) => *d.min(e),
            (Some((d, _)), None) => *d,
            (None, Some((e, ..))) => *e,
            (None, None) => 0,
        };
        let kind = reformat::classify(
            decap.as_ref().map(|(_, sz)| *sz),
            encap.as_ref().map(|(_, len, _)| *len),
        )
        .map_err(|e| FlowError::action(first, e))?;
        let slot_kind = if kind.is_decap() {
            HwActionKind::Decap
        } else {
            HwActionKind::Encap
        };
        let pos = sb.shared(slot_kind, first);
        for p in pre.iter_mut().filter(|p| **p == REFORMAT) {
            *p = pos;
        }

        let (data_len, data) = match &encap {
            Some((_, len, data)) => (*len, data.clone()),
            None => (0, Some(Vec::new())),
        };
        Some(ReformatLayout {
            kind,
            data_len,
            data,
            decap_src: decap.map(|(i, _)| i as u16),
            encap_src: encap.as_ref().map(|(i, ..)| *i as u16),
        })
    } else {
        None
    };

    if sb.slots.len() > MAX_RULE_ACTIONS {
        return Err(FlowError::TooManyActions { max: MAX_RULE_ACTIONS });
    }

    // A stable sort keeps the user's order within a rank; only fates
    // share a rank and there is at most one of those.
    let mut order: Vec<usize> = (0..sb.slots.len()).collect();
    order.sort_by_key(|&p| sb.slots[p].0.rank());
    let mut new_pos = vec![0u16; order.len()];
    for (new, &old) in order.iter().enumerate() {
        new_pos[old] = new as u16;
    }

    let slots = order.iter().map(|&p| sb.slots[p].0).collect();
    let src_offset = order.iter().map(|&p| sb.slots[p].1).collect();
    let dr_offset = pre.iter().map(|&p| new_pos[p]).collect();
    let mhdr_slot = sb.find(HwActionKind::ModifyHeader).map(|p| new_pos[p]);

    let flex_map = actions
        .iter()
        .enumerate()
        .filter(|(_, spec)| !is_fixed(spec))
        .fold(0u64, |acc, (i, _)| acc | (1 << i));

    let encoded = codec::encode(&(attr, actions))?;
    let digest = codec::digest(&encoded);

    Ok(ActionTemplateLayout {
        attr,
        orig_actions: actions.to_vec(),
        slots,
        dr_offset,
        src_offset,
        flags: codec::action_flags(actions),
        flex_map,
        only_drop: actions.len() == 1 && actions[0].action == Action::Drop,
        mhdr: if mhdr.cmds.is_empty() { None } else { Some(mhdr) },
        mhdr_slot,
        reformat,
        encoded,
        digest,
    })
}

/// A registered action template.
#[derive(Debug)]
pub struct ActionTemplate {
    pub id: ActionsTemplateId,
    pub layout: ActionTemplateLayout,
    pub hw: HwActionTemplateId,
    refcnt: AtomicU32,
}

impl ActionTemplate {
    pub fn new(
        id: ActionsTemplateId,
        layout: ActionTemplateLayout,
        hw: HwActionTemplateId,
    ) -> Self {
        Self { id, layout, hw, refcnt: AtomicU32::new(1) }
    }

    /// One for the creator plus one per table using the template.
    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    pub fn hold(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        self.refcnt.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn dump(&self) -> TemplateDump {
        TemplateDump {
            kind: TemplateKind::Actions,
            id: self.id.0,
            dir: self.layout.attr.dir,
            refcnt: self.refcnt(),
            len: self.layout.orig_actions.len(),
            digest: self.layout.digest,
            flags: self
                .layout
                .slots
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}
