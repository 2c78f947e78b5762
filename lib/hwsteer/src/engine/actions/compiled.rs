// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! An action template bound to a table.
//!
//! Binding resolves everything the template fixes: the singleton
//! objects every rule shares (drop, tag, queue, push/pop VLAN), masked
//! jump, RSS and vport objects, and modify-header or reformat objects
//! whose data is entirely template-fixed. What is left is a list of
//! [`ActionConstructData`] entries, one per value a rule must supply,
//! which the constructor walks at rule time.

use super::mhdr;
use super::mhdr::MhdrCmd;
use super::template;
use super::template::ActionTemplateLayout;
use crate::api::Action;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::IndirectKind;
use crate::api::PortConfig;
use crate::engine::pool::cache::ActionCache;
use crate::engine::pool::cache::CacheKey;
use crate::engine::steering::ActionObjId;
use crate::engine::steering::HwActionDesc;
use crate::engine::steering::ReformatKind;
use crate::engine::steering::RuleAction;
use crate::engine::steering::RuleActionArg;
use crate::engine::steering::RuleActions;
use crate::engine::steering::SteeringEngine;
use crate::engine::table::hw_group;
use alloc::vec::Vec;

/// How to resolve one per-rule value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConstructPayload {
    Mark,
    Jump,
    JumpToTableIndex,
    Queue,
    Rss,
    Vport,
    Count,
    Age,
    MeterMark,
    Indirect(IndirectKind),
    IndirectList,
    /// Rewrite commands `start..end` of the rule's modify-header data.
    Mhdr { start: u16, end: u16 },
    /// Build the VLAN header, and rewrite the VID/PCP commands when
    /// the modify-header data is per rule.
    PushVlan { mhdr: Option<(u16, u16)> },
    /// Copy encap data, which must be exactly `len` bytes.
    Encap { len: usize },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionConstructData {
    /// The user action index.
    pub src: u16,
    /// The hardware slot written.
    pub dst: u16,
    /// The value comes from the template rather than the rule.
    pub masked: bool,
    pub payload: ConstructPayload,
}

impl ActionConstructData {
    /// AGE entries are resolved before everything else so that the
    /// counter resolved after them can be tagged.
    fn is_age(&self) -> bool {
        matches!(
            self.payload,
            ConstructPayload::Age
                | ConstructPayload::Indirect(IndirectKind::Age)
        )
    }

    /// The action the entry resolves: the template's own when masked,
    /// the rule's otherwise.
    pub fn value<'a>(
        &self,
        layout: &'a ActionTemplateLayout,
        actions: &'a [Action],
    ) -> Option<&'a Action> {
        let src = usize::from(self.src);
        if self.masked {
            layout.orig_actions.get(src).map(|s| &s.action)
        } else {
            actions.get(src)
        }
    }
}

/// The modify-header slot of a template whose commands vary per rule.
#[derive(Clone, Debug)]
pub struct MhdrSlot {
    pub dst: u16,
    /// The template's commands, patched per rule.
    pub cmds: Vec<MhdrCmd>,
}

/// The reformat slot of a template whose encap data varies per rule.
#[derive(Clone, Copy, Debug)]
pub struct ReformatSlot {
    pub dst: u16,
    pub kind: ReformatKind,
}

/// The per-segment bulk objects backing per-rule modify-header and
/// reformat data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SegObjs {
    pub mhdr: Option<ActionObjId>,
    pub reformat: Option<ActionObjId>,
}

#[derive(Debug)]
pub struct CompiledActions {
    /// The rule action set with every template-fixed slot filled in.
    pub rule_acts: RuleActions,
    pub construct: Vec<ActionConstructData>,
    /// The counter slot, shared by COUNT and AGE.
    pub counter_dst: Option<u16>,
    pub mhdr: Option<MhdrSlot>,
    pub reformat: Option<ReformatSlot>,
    owned_keys: Vec<CacheKey>,
    owned_objs: Vec<ActionObjId>,
}

impl CompiledActions {
    /// Bind `layout` to a table of direction `dir`.
    pub fn compile<E: SteeringEngine>(
        engine: &E,
        cache: &ActionCache,
        cfg: &PortConfig,
        dir: FlowDir,
        layout: &ActionTemplateLayout,
    ) -> Result<Self, FlowError> {
        let mut ca = Self {
            rule_acts: RuleActions::new(),
            construct: Vec::new(),
            counter_dst: None,
            mhdr: None,
            reformat: None,
            owned_keys: Vec::new(),
            owned_objs: Vec::new(),
        };

        match ca.fill(engine, cache, cfg, dir, layout) {
            Ok(()) => Ok(ca),
            Err(e) => {
                ca.destroy(engine, cache);
                Err(e)
            }
        }
    }

    fn acquire<E: SteeringEngine>(
        &mut self,
        engine: &E,
        cache: &ActionCache,
        key: CacheKey,
    ) -> Result<ActionObjId, FlowError> {
        let obj = cache.acquire(engine, &key)?;
        self.owned_keys.push(key);
        Ok(obj)
    }

    fn fill<E: SteeringEngine>(
        &mut self,
        engine: &E,
        cache: &ActionCache,
        cfg: &PortConfig,
        dir: FlowDir,
        layout: &ActionTemplateLayout,
    ) -> Result<(), FlowError> {
        for kind in &layout.slots {
            self.rule_acts
                .push(RuleAction::new(*kind, ActionObjId::NONE))
                .map_err(|_| FlowError::TooManyActions {
                    max: self.rule_acts.capacity(),
                })?;
        }

        let mhdr_bulk =
            layout.mhdr.as_ref().is_some_and(|m| !m.is_shared());

        for (i, spec) in layout.orig_actions.iter().enumerate() {
            let dst = layout.dr_offset[i];
            let slot = usize::from(dst);
            let masked = template::is_fixed(spec);

            match &spec.action {
                Action::Drop => {
                    let obj = self.acquire(engine, cache, CacheKey::Drop(dir))?;
                    self.rule_acts[slot].obj = obj;
                }

                Action::Mark { id } => {
                    let obj = self.acquire(engine, cache, CacheKey::Tag(dir))?;
                    self.rule_acts[slot].obj = obj;
                    if masked {
                        self.rule_acts[slot].arg = RuleActionArg::Tag(*id);
                    } else {
                        self.push(i, dst, false, ConstructPayload::Mark);
                    }
                }

                Action::Jump { group } if masked => {
                    let key = CacheKey::Jump(dir, hw_group(cfg, dir, *group));
                    let obj = self.acquire(engine, cache, key)?;
                    self.rule_acts[slot].obj = obj;
                }

                Action::Jump { .. } => {
                    self.push(i, dst, masked, ConstructPayload::Jump)
                }

                Action::JumpToTableIndex { .. } => {
                    let payload = ConstructPayload::JumpToTableIndex;
                    self.push(i, dst, masked, payload)
                }

                Action::Queue { index } => {
                    let obj =
                        self.acquire(engine, cache, CacheKey::Queue(dir))?;
                    self.rule_acts[slot].obj = obj;
                    if masked {
                        self.rule_acts[slot].arg = RuleActionArg::Queue(*index);
                    } else {
                        self.push(i, dst, false, ConstructPayload::Queue);
                    }
                }

                Action::Rss { queues } if masked => {
                    let key = CacheKey::Rss(dir, queues.clone());
                    let obj = self.acquire(engine, cache, key)?;
                    self.rule_acts[slot].obj = obj;
                }

                Action::Rss { .. } => {
                    self.push(i, dst, masked, ConstructPayload::Rss)
                }

                Action::RepresentedPort { port_id } if masked => {
                    let key = CacheKey::Vport(dir, *port_id);
                    let obj = self.acquire(engine, cache, key)?;
                    self.rule_acts[slot].obj = obj;
                }

                Action::RepresentedPort { .. } => {
                    self.push(i, dst, masked, ConstructPayload::Vport)
                }

                Action::Count { .. } => {
                    self.counter_dst = Some(dst);
                    self.push(i, dst, masked, ConstructPayload::Count);
                }

                Action::Age { .. } => {
                    self.counter_dst = Some(dst);
                    self.push(i, dst, masked, ConstructPayload::Age);
                }

                Action::MeterMark(_) => {
                    self.push(i, dst, masked, ConstructPayload::MeterMark)
                }

                Action::Indirect(h) => {
                    let kind = h.kind;
                    if matches!(kind, IndirectKind::Count | IndirectKind::Age) {
                        self.counter_dst = Some(dst);
                    }
                    self.push(i, dst, masked, ConstructPayload::Indirect(kind));
                }

                Action::IndirectList(_) => {
                    self.push(i, dst, masked, ConstructPayload::IndirectList)
                }

                Action::ModifyField(_)
                | Action::SetTag { .. }
                | Action::SetVlanVid { .. }
                | Action::SetVlanPcp { .. } => {
                    if !masked {
                        let range = layout
                            .mhdr
                            .as_ref()
                            .and_then(|m| m.range_of(i as u16))
                            .ok_or_else(|| {
                                FlowError::action(i, "no modify-header range")
                            })?;
                        let (start, end) = (range.start, range.end);
                        self.push(
                            i,
                            dst,
                            false,
                            ConstructPayload::Mhdr { start, end },
                        );
                    }
                }

                Action::PushVlan { ethertype, vid, pcp } => {
                    let obj =
                        self.acquire(engine, cache, CacheKey::PushVlan(dir))?;
                    self.rule_acts[slot].obj = obj;
                    if masked {
                        self.rule_acts[slot].arg = RuleActionArg::VlanHdr(
                            vlan_hdr(*ethertype, *vid, *pcp),
                        );
                    } else {
                        let mhdr = layout
                            .mhdr
                            .as_ref()
                            .and_then(|m| m.range_of(i as u16))
                            .filter(|_| mhdr_bulk)
                            .map(|r| (r.start, r.end));
                        self.push(
                            i,
                            dst,
                            false,
                            ConstructPayload::PushVlan { mhdr },
                        );
                    }
                }

                Action::PopVlan => {
                    let obj =
                        self.acquire(engine, cache, CacheKey::PopVlan(dir))?;
                    self.rule_acts[slot].obj = obj;
                }

                Action::RawEncap { .. } => {
                    if let Some(r) = layout.reformat.as_ref()
                        && !r.is_shared()
                    {
                        self.push(
                            i,
                            dst,
                            false,
                            ConstructPayload::Encap { len: r.data_len },
                        );
                    }
                }

                Action::RawDecap { .. } => {}
            }
        }

        // Stable: entries keep template order within each class.
        self.construct.sort_by_key(|cd| !cd.is_age());

        if let Some(m) = &layout.mhdr {
            let dst = layout.mhdr_slot.ok_or_else(|| {
                FlowError::BadState("modify-header without a slot".into())
            })?;
            if m.is_shared() {
                let desc = HwActionDesc::ModifyHeader {
                    cmds: mhdr::cmds_as_bytes(&m.cmds),
                    bulk: 0,
                };
                let obj = engine.action_create(&desc, dir)?;
                self.owned_objs.push(obj);
                self.rule_acts[usize::from(dst)].obj = obj;
            } else {
                self.mhdr = Some(MhdrSlot { dst, cmds: m.cmds.clone() });
            }
        }

        if let Some(r) = &layout.reformat {
            let src = match (r.decap_src, r.encap_src) {
                (Some(d), Some(e)) => d.min(e),
                (Some(s), None) | (None, Some(s)) => s,
                (None, None) => 0,
            };
            let dst = layout.dr_offset[usize::from(src)];
            match &r.data {
                Some(data) => {
                    let desc = HwActionDesc::Reformat {
                        kind: r.kind,
                        data: data.clone(),
                        bulk: 0,
                    };
                    let obj = engine.action_create(&desc, dir)?;
                    self.owned_objs.push(obj);
                    self.rule_acts[usize::from(dst)].obj = obj;
                }
                None => {
                    self.reformat = Some(ReformatSlot { dst, kind: r.kind });
                }
            }
        }

        Ok(())
    }

    fn push(
        &mut self,
        src: usize,
        dst: u16,
        masked: bool,
        payload: ConstructPayload,
    ) {
        self.construct.push(ActionConstructData {
            src: src as u16,
            dst,
            masked,
            payload,
        });
    }

    /// Does rule data live in per-segment bulk objects?
    pub fn needs_segment(&self) -> bool {
        self.mhdr.is_some() || self.reformat.is_some()
    }

    /// Create the bulk objects of a segment of `len` rules.
    pub fn segment_objs<E: SteeringEngine>(
        &self,
        engine: &E,
        dir: FlowDir,
        len: u32,
    ) -> Result<SegObjs, FlowError> {
        let mut objs = SegObjs::default();
        if let Some(m) = &self.mhdr {
            let desc = HwActionDesc::ModifyHeader {
                cmds: mhdr::cmds_as_bytes(&m.cmds),
                bulk: len,
            };
            objs.mhdr = Some(engine.action_create(&desc, dir)?);
        }
        if let Some(r) = &self.reformat {
            let desc = HwActionDesc::Reformat {
                kind: r.kind,
                data: Vec::new(),
                bulk: len,
            };
            match engine.action_create(&desc, dir) {
                Ok(obj) => objs.reformat = Some(obj),
                Err(e) => {
                    if let Some(obj) = objs.mhdr {
                        let _ = engine.action_destroy(obj);
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(objs)
    }

    /// Release everything the binding holds.
    pub fn destroy<E: SteeringEngine>(
        &mut self,
        engine: &E,
        cache: &ActionCache,
    ) {
        for obj in self.owned_objs.drain(..).rev() {
            let _ = engine.action_destroy(obj);
        }
        for key in self.owned_keys.drain(..).rev() {
            let _ = cache.release(engine, &key);
        }
    }
}

/// The pushed VLAN header: TPID in the upper half, TCI in the lower.
pub fn vlan_hdr(ethertype: u16, vid: u16, pcp: u8) -> u32 {
    let tci = (u16::from(pcp & 0x7) << 13) | (vid & 0x0FFF);
    (u32::from(ethertype) << 16) | u32::from(tci)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ActionSpec;
    use crate::api::IndirectHandle;
    use crate::api::TemplateAttr;
    use crate::engine::actions::template::compile;
    use crate::engine::soft::SoftEngine;
    use crate::engine::steering::HwActionKind;

    fn bind(
        eng: &SoftEngine,
        cache: &ActionCache,
        acts: &[ActionSpec],
    ) -> CompiledActions {
        let layout =
            compile(TemplateAttr::new(FlowDir::INGRESS), acts).unwrap();
        CompiledActions::compile(
            eng,
            cache,
            &PortConfig::default(),
            FlowDir::INGRESS,
            &layout,
        )
        .unwrap()
    }

    #[test]
    fn fixed_objects_shared_through_cache() {
        let eng = SoftEngine::new();
        let cache = ActionCache::default();
        let acts = [
            ActionSpec::fixed(Action::Mark { id: 9 }),
            ActionSpec::fixed(Action::Jump { group: 3 }),
        ];
        let mut a = bind(&eng, &cache, &acts);
        let mut b = bind(&eng, &cache, &acts);
        assert!(a.construct.is_empty());
        assert_eq!(a.rule_acts[0].arg, RuleActionArg::Tag(9));
        assert_eq!(a.rule_acts[1].obj, b.rule_acts[1].obj);
        assert_eq!(cache.refcnt(&CacheKey::Jump(FlowDir::INGRESS, 3)), 2);

        a.destroy(&eng, &cache);
        b.destroy(&eng, &cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn age_resolved_first() {
        let eng = SoftEngine::new();
        let cache = ActionCache::default();
        let acts = [
            ActionSpec::per_rule(Action::Count { id: 0 }),
            ActionSpec::per_rule(Action::Indirect(IndirectHandle::new(
                IndirectKind::Age,
                0,
            ))),
            ActionSpec::per_rule(Action::Queue { index: 0 }),
        ];
        let mut ca = bind(&eng, &cache, &acts);
        let payloads: Vec<_> =
            ca.construct.iter().map(|cd| cd.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                ConstructPayload::Indirect(IndirectKind::Age),
                ConstructPayload::Count,
                ConstructPayload::Queue,
            ]
        );
        assert_eq!(ca.counter_dst, Some(0));
        ca.destroy(&eng, &cache);
    }

    #[test]
    fn per_rule_data_needs_segments() {
        let eng = SoftEngine::new();
        let cache = ActionCache::default();
        let acts = [
            ActionSpec::per_rule(Action::SetVlanVid { vid: 0 }),
            ActionSpec::per_rule(Action::RawEncap { data: vec![0; 60] }),
            ActionSpec::fixed(Action::Drop),
        ];
        let mut ca = bind(&eng, &cache, &acts);
        assert!(ca.needs_segment());
        let objs = ca.segment_objs(&eng, FlowDir::INGRESS, 8).unwrap();
        assert!(objs.mhdr.is_some() && objs.reformat.is_some());
        ca.destroy(&eng, &cache);
    }

    #[test]
    fn push_vlan_fills_its_modify_header_slot() {
        let eng = SoftEngine::new();
        let cache = ActionCache::default();
        let push = Action::PushVlan { ethertype: 0x8100, vid: 42, pcp: 2 };
        let kinds = vec![
            HwActionKind::PushVlan,
            HwActionKind::ModifyHeader,
            HwActionKind::Drop,
        ];

        let fixed = [
            ActionSpec::fixed(push.clone()),
            ActionSpec::fixed(Action::Drop),
        ];
        let mut ca = bind(&eng, &cache, &fixed);
        let got: Vec<_> = ca.rule_acts.iter().map(|a| a.kind).collect();
        assert_eq!(got, kinds);
        assert!(ca.rule_acts.iter().all(|a| a.obj != ActionObjId::NONE));
        assert_ne!(ca.rule_acts[0].obj, ca.rule_acts[1].obj);
        assert_eq!(
            ca.rule_acts[0].arg,
            RuleActionArg::VlanHdr(vlan_hdr(0x8100, 42, 2))
        );
        assert!(ca.mhdr.is_none());
        ca.destroy(&eng, &cache);

        let per_rule =
            [ActionSpec::per_rule(push), ActionSpec::fixed(Action::Drop)];
        let mut ca = bind(&eng, &cache, &per_rule);
        let got: Vec<_> = ca.rule_acts.iter().map(|a| a.kind).collect();
        assert_eq!(got, kinds);
        assert_ne!(ca.rule_acts[0].obj, ActionObjId::NONE);
        assert_eq!(ca.mhdr.as_ref().map(|m| m.dst), Some(1));
        ca.destroy(&eng, &cache);
    }

    #[test]
    fn vlan_header_layout() {
        assert_eq!(vlan_hdr(0x8100, 100, 3), 0x8100_6064);
    }
}
