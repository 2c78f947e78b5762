// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Rule action construction.
//!
//! The constructor turns a rule's concrete actions into the hardware
//! rule action set of its table's [`CompiledActions`], acquiring the
//! pool entries the rule holds for its lifetime. Construction is
//! all-or-nothing: on failure everything acquired so far is released
//! in reverse order.

use super::actions::compiled::CompiledActions;
use super::actions::compiled::ConstructPayload;
use super::actions::compiled::SegObjs;
use super::actions::compiled::vlan_hdr;
use super::actions::mhdr;
use super::actions::mhdr::MhdrCmd;
use super::actions::template::ActionTemplateLayout;
use super::actions::template::action_cmds;
use super::flow::Acquired;
use super::flow::MAX_HELD;
use super::flow::Resources;
use super::flow::release_one;
use super::job::InternalOp;
use super::job::internal_token;
use super::pool::CtPool;
use super::pool::MeterPool;
use super::pool::Pools;
use super::pool::aso::AsoState;
use super::pool::cache::CacheKey;
use super::pool::counter::CounterPool;
use super::steering::ActionObjId;
use super::steering::AsoOp;
use super::steering::RuleActionArg;
use super::steering::RuleActions;
use super::steering::SteeringEngine;
use super::table::TableMap;
use super::table::hw_group;
use crate::api::Action;
use crate::api::AgeConf;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::IndirectHandle;
use crate::api::IndirectKind;
use crate::api::PortConfig;
use alloc::vec::Vec;

/// Check a rule's actions against the template they instantiate.
pub fn validate(
    layout: &ActionTemplateLayout,
    actions: &[Action],
) -> Result<(), FlowError> {
    if actions.len() != layout.orig_actions.len() {
        return Err(FlowError::action(
            actions.len().min(layout.orig_actions.len()),
            format!(
                "template has {} actions, rule has {}",
                layout.orig_actions.len(),
                actions.len()
            ),
        ));
    }

    for (i, (act, tmpl)) in actions.iter().zip(&layout.orig_actions).enumerate()
    {
        if act.kind() != tmpl.kind() {
            return Err(FlowError::action(
                i,
                format!("expected {:?}, got {:?}", tmpl.kind(), act.kind()),
            ));
        }
        if let (Action::Indirect(h), Action::Indirect(t)) = (act, &tmpl.action)
            && h.kind != t.kind
        {
            return Err(FlowError::action(
                i,
                format!("expected indirect {:?}, got {:?}", t.kind, h.kind),
            ));
        }
    }

    Ok(())
}

fn mismatch(src: u16) -> FlowError {
    FlowError::action(usize::from(src), "action does not match its template")
}

/// Everything a construction needs beyond the template.
pub struct Constructor<'a, E: SteeringEngine> {
    pub engine: &'a E,
    pub pools: &'a Pools,
    pub cfg: &'a PortConfig,
    pub tables: &'a TableMap,
    pub queue: u16,
    pub dir: FlowDir,
    /// The context reported for an aged rule whose AGE action gives
    /// none.
    pub age_context: u64,
    pub postpone: bool,
}

/// Scratch state of one construction.
struct Scratch {
    acts: RuleActions,
    res: Resources,
    cmds: Option<Vec<MhdrCmd>>,
    encap: Option<Vec<u8>>,
}

impl<E: SteeringEngine> Constructor<'_, E> {
    /// Build the rule action set for `actions`, whose per-rule data,
    /// if any, lives at `seg`.
    pub fn build(
        &self,
        layout: &ActionTemplateLayout,
        compiled: &CompiledActions,
        actions: &[Action],
        seg: Option<(u32, SegObjs)>,
    ) -> Result<(RuleActions, Resources), FlowError> {
        let mut sc = Scratch {
            acts: compiled.rule_acts.clone(),
            res: Resources::default(),
            cmds: compiled.mhdr.as_ref().map(|m| m.cmds.clone()),
            encap: None,
        };

        match self.fill(layout, compiled, actions, seg, &mut sc) {
            Ok(()) => Ok((sc.acts, sc.res)),
            Err(e) => {
                sc.res.release(self.engine, self.pools, self.queue);
                Err(e)
            }
        }
    }

    fn keep(
        &self,
        res: &mut Resources,
        acq: Acquired,
    ) -> Result<(), FlowError> {
        res.push(acq).map_err(|acq| {
            release_one(self.engine, self.pools, self.queue, acq);
            FlowError::TooManyActions { max: MAX_HELD }
        })
    }

    fn cached(
        &self,
        res: &mut Resources,
        key: CacheKey,
    ) -> Result<ActionObjId, FlowError> {
        let obj = self.pools.cache.acquire(self.engine, &key)?;
        self.keep(res, Acquired::Cache(key))?;
        Ok(obj)
    }

    fn fill(
        &self,
        layout: &ActionTemplateLayout,
        compiled: &CompiledActions,
        actions: &[Action],
        seg: Option<(u32, SegObjs)>,
        sc: &mut Scratch,
    ) -> Result<(), FlowError> {
        for cd in &compiled.construct {
            let src = cd.src;
            let slot = usize::from(cd.dst);
            let value = cd.value(layout, actions).ok_or_else(|| mismatch(src))?;

            match (&cd.payload, value) {
                (ConstructPayload::Mark, Action::Mark { id }) => {
                    sc.acts[slot].arg = RuleActionArg::Tag(*id);
                }

                (ConstructPayload::Jump, Action::Jump { group }) => {
                    let g = hw_group(self.cfg, self.dir, *group);
                    let key = CacheKey::Jump(self.dir, g);
                    sc.acts[slot].obj = self.cached(&mut sc.res, key)?;
                }

                (
                    ConstructPayload::JumpToTableIndex,
                    Action::JumpToTableIndex { table, index },
                ) => {
                    let (obj, index) =
                        self.table_index(sc, src, *table, *index)?;
                    sc.acts[slot].obj = obj;
                    sc.acts[slot].arg = RuleActionArg::Index(index);
                }

                (ConstructPayload::Queue, Action::Queue { index }) => {
                    sc.acts[slot].arg = RuleActionArg::Queue(*index);
                }

                (ConstructPayload::Rss, Action::Rss { queues }) => {
                    if queues.is_empty() {
                        return Err(FlowError::action(
                            usize::from(src),
                            "RSS needs at least one queue",
                        ));
                    }
                    let key = CacheKey::Rss(self.dir, queues.clone());
                    sc.acts[slot].obj = self.cached(&mut sc.res, key)?;
                }

                (
                    ConstructPayload::Vport,
                    Action::RepresentedPort { port_id },
                ) => {
                    let key = CacheKey::Vport(self.dir, *port_id);
                    sc.acts[slot].obj = self.cached(&mut sc.res, key)?;
                }

                (ConstructPayload::Age, Action::Age { timeout, context }) => {
                    let conf = AgeConf {
                        timeout: *timeout,
                        context: context.unwrap_or(self.age_context),
                    };
                    let ages = self.pools.ages()?;
                    let idx = ages.alloc(self.queue, conf, false)?;
                    self.keep(&mut sc.res, Acquired::Age(idx))?;
                    sc.res.age = Some(idx);
                }

                (ConstructPayload::Count, Action::Count { .. }) => {
                    self.direct_counter(&mut sc.res)?;
                }

                (ConstructPayload::Indirect(kind), Action::Indirect(h)) => {
                    if h.kind != *kind {
                        return Err(mismatch(src));
                    }
                    self.indirect(sc, slot, *h)?;
                }

                (ConstructPayload::MeterMark, Action::MeterMark(conf)) => {
                    let meters = self.pools.meters()?;
                    let profile = self.pools.profiles.get(conf.profile)?;
                    let idx = match meters.alloc(self.queue, *conf, false) {
                        Ok(idx) => idx,
                        Err(e) => {
                            self.pools.profiles.put(conf.profile);
                            return Err(e);
                        }
                    };
                    let acq = Acquired::Meter { idx, profile: conf.profile };
                    self.keep(&mut sc.res, acq)?;

                    let offset = MeterPool::offset(idx);
                    let op = AsoOp::MeterInit { offset, profile, conf: *conf };
                    let generation = meters.generation(idx).unwrap_or(0);
                    let token =
                        internal_token(InternalOp::MeterInit, idx, generation);
                    self.engine.aso_submit(
                        self.queue,
                        meters.bulk(),
                        &op,
                        token,
                        self.postpone,
                    )?;
                    sc.acts[slot].obj = meters.bulk();
                    sc.acts[slot].arg = RuleActionArg::Aso {
                        offset,
                        param: conf.init_color as u32,
                    };
                }

                (ConstructPayload::IndirectList, Action::IndirectList(h)) => {
                    let obj = self.pools.mirrors.get(*h, self.dir)?;
                    self.keep(&mut sc.res, Acquired::Mirror(*h))?;
                    sc.acts[slot].obj = obj;
                }

                (ConstructPayload::Mhdr { start, end }, _) => {
                    let new = action_cmds(value)
                        .map_err(|m| FlowError::action(usize::from(src), m))?;
                    patch(sc, src, *start, *end, &new)?;
                }

                (
                    ConstructPayload::PushVlan { mhdr },
                    Action::PushVlan { ethertype, vid, pcp },
                ) => {
                    let hdr = vlan_hdr(*ethertype, *vid, *pcp);
                    sc.acts[slot].arg = RuleActionArg::VlanHdr(hdr);
                    if let Some((start, end)) = mhdr {
                        let new = action_cmds(value).map_err(|m| {
                            FlowError::action(usize::from(src), m)
                        })?;
                        patch(sc, src, *start, *end, &new)?;
                    }
                }

                (
                    ConstructPayload::Encap { len },
                    Action::RawEncap { data },
                ) => {
                    if data.len() != *len {
                        return Err(FlowError::action(
                            usize::from(src),
                            format!(
                                "encap data is {} bytes, template has {len}",
                                data.len()
                            ),
                        ));
                    }
                    sc.encap = Some(data.clone());
                }

                _ => return Err(mismatch(src)),
            }
        }

        self.finish(compiled, seg, sc)
    }

    /// Allocate a counter owned by the rule, tagged with the rule's
    /// aging record if it has one.
    fn direct_counter(&self, res: &mut Resources) -> Result<(), FlowError> {
        let counters = self.pools.counters()?;
        let age = res.age.unwrap_or(0);
        let id = counters.alloc(self.engine, self.queue, age, false)?;
        if age != 0 {
            self.pools.ages()?.inc_cnts(age);
        }
        self.keep(res, Acquired::Counter(id))?;
        res.counter = Some(id);
        Ok(())
    }

    fn table_index(
        &self,
        sc: &mut Scratch,
        src: u16,
        id: crate::api::TableId,
        index: u32,
    ) -> Result<(ActionObjId, u32), FlowError> {
        let target = self
            .tables
            .get(&id)
            .ok_or_else(|| FlowError::NotFound(format!("{id}")))?;
        if !target.attr.insertion.is_by_index() || target.attr.dir != self.dir {
            return Err(FlowError::action(
                usize::from(src),
                format!("{id} is not an index-based {} table", self.dir),
            ));
        }
        if index >= target.capacity() {
            return Err(FlowError::action(
                usize::from(src),
                format!("rule index {index} beyond {id} capacity"),
            ));
        }
        let (_, _, jump) = target.active()?;
        target.hold_ref();
        self.keep(&mut sc.res, Acquired::TableRef(target.clone()))?;
        Ok((jump, index))
    }

    fn indirect(
        &self,
        sc: &mut Scratch,
        slot: usize,
        h: IndirectHandle,
    ) -> Result<(), FlowError> {
        let idx = h.index;
        match h.kind {
            IndirectKind::Count => {
                let counters = self.pools.counters()?;
                counters.get(idx)?;
                let age = sc.res.age.unwrap_or(0);
                let acq = Acquired::SharedCounter { id: idx, age };
                self.keep(&mut sc.res, acq)?;
                if age != 0 {
                    // The most recent rule's aging record owns the
                    // counter's hits.
                    let ages = self.pools.ages()?;
                    let old = counters.swap_age(idx, age);
                    if old != age {
                        ages.inc_cnts(age);
                        if old != 0 {
                            ages.dec_cnts(old);
                        }
                    }
                }
                sc.res.counter = Some(idx);
            }

            IndirectKind::Age => {
                self.pools.ages()?.get(idx)?;
                self.keep(&mut sc.res, Acquired::SharedAge(idx))?;
                sc.res.age = Some(idx);
            }

            IndirectKind::MeterMark => {
                let meters = self.pools.meters()?;
                if meters.state(idx) == AsoState::Error {
                    return Err(FlowError::BadState(format!(
                        "meter {idx} {}",
                        AsoState::Error
                    )));
                }
                meters.get(idx)?;
                self.keep(&mut sc.res, Acquired::SharedMeter(idx))?;
                let conf = meters.conf(idx)?;
                sc.acts[slot].obj = meters.bulk();
                sc.acts[slot].arg = RuleActionArg::Aso {
                    offset: MeterPool::offset(idx),
                    param: conf.init_color as u32,
                };
            }

            IndirectKind::Conntrack => {
                let cts = self.pools.cts()?;
                cts.get(idx)?;
                self.keep(&mut sc.res, Acquired::SharedCt(idx))?;
                let profile = cts.conf(idx)?;
                sc.acts[slot].obj = cts.bulk();
                sc.acts[slot].arg = RuleActionArg::Aso {
                    offset: CtPool::offset(idx),
                    param: u32::from(profile.is_original_dir),
                };
            }
        }
        Ok(())
    }

    /// Point the counter, modify-header, and reformat slots at what
    /// the rule resolved.
    fn finish(
        &self,
        compiled: &CompiledActions,
        seg: Option<(u32, SegObjs)>,
        sc: &mut Scratch,
    ) -> Result<(), FlowError> {
        if sc.res.age.is_some() && sc.res.counter.is_none() {
            self.direct_counter(&mut sc.res)?;
        }

        if let (Some(dst), Some(id)) = (compiled.counter_dst, sc.res.counter) {
            let slot = usize::from(dst);
            sc.acts[slot].obj = self.pools.counters()?.bulk();
            sc.acts[slot].arg = RuleActionArg::Offset(CounterPool::offset(id));
        }

        let no_seg = || FlowError::BadState("no per-rule data segment".into());

        if let (Some(m), Some(cmds)) = (&compiled.mhdr, &sc.cmds) {
            let (offset, objs) = seg.ok_or_else(no_seg)?;
            let slot = usize::from(m.dst);
            sc.acts[slot].obj = objs.mhdr.ok_or_else(no_seg)?;
            sc.acts[slot].arg = RuleActionArg::Data {
                offset,
                data: mhdr::cmds_as_bytes(cmds),
            };
        }

        if let Some(r) = &compiled.reformat {
            let (offset, objs) = seg.ok_or_else(no_seg)?;
            let data = sc.encap.take().ok_or_else(|| {
                FlowError::action(usize::from(r.dst), "no encap data")
            })?;
            let slot = usize::from(r.dst);
            sc.acts[slot].obj = objs.reformat.ok_or_else(no_seg)?;
            sc.acts[slot].arg = RuleActionArg::Data { offset, data };
        }

        Ok(())
    }
}

fn patch(
    sc: &mut Scratch,
    src: u16,
    start: u16,
    end: u16,
    new: &[MhdrCmd],
) -> Result<(), FlowError> {
    let cmds = sc.cmds.as_mut().ok_or_else(|| mismatch(src))?;
    let range = usize::from(start)..usize::from(end);
    if new.len() != range.len() || range.end > cmds.len() {
        return Err(FlowError::action(
            usize::from(src),
            format!(
                "{} modify-header commands, template has {}",
                new.len(),
                range.len()
            ),
        ));
    }
    cmds[range].copy_from_slice(new);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ActionSpec;
    use crate::api::Color;
    use crate::api::MeterMarkConf;
    use crate::api::MeterProfile;
    use crate::api::MeterProfileId;
    use crate::api::TemplateAttr;
    use crate::engine::actions::template;
    use crate::engine::flow::FlowFlags;
    use crate::engine::job::parse_internal;
    use crate::engine::soft::SoftEngine;
    use crate::engine::soft::SoftOp;
    use crate::engine::steering::HwActionKind;

    struct Fixture {
        eng: SoftEngine,
        cfg: PortConfig,
        pools: Pools,
        tables: TableMap,
    }

    impl Fixture {
        fn new() -> Self {
            let eng = SoftEngine::new();
            let cfg = PortConfig::default();
            eng.configure(cfg.nb_queues + 1, cfg.queue_size).unwrap();
            let pools = Pools::new(&eng, &cfg).unwrap();
            Self { eng, cfg, pools, tables: TableMap::new() }
        }

        fn ctor(&self) -> Constructor<'_, SoftEngine> {
            Constructor {
                engine: &self.eng,
                pools: &self.pools,
                cfg: &self.cfg,
                tables: &self.tables,
                queue: 0,
                dir: FlowDir::INGRESS,
                age_context: 77,
                postpone: false,
            }
        }

        fn bind(
            &self,
            acts: &[ActionSpec],
        ) -> (ActionTemplateLayout, CompiledActions) {
            let layout =
                template::compile(TemplateAttr::new(FlowDir::INGRESS), acts)
                    .unwrap();
            let ca = CompiledActions::compile(
                &self.eng,
                &self.pools.cache,
                &self.cfg,
                FlowDir::INGRESS,
                &layout,
            )
            .unwrap();
            (layout, ca)
        }
    }

    #[test]
    fn age_and_count_share_one_counter() {
        let fx = Fixture::new();
        let (layout, ca) = fx.bind(&[
            ActionSpec::per_rule(Action::Count { id: 0 }),
            ActionSpec::per_rule(Action::Age { timeout: 30, context: None }),
            ActionSpec::fixed(Action::Drop),
        ]);
        let acts = [
            Action::Count { id: 0 },
            Action::Age { timeout: 30, context: None },
            Action::Drop,
        ];

        let (ra, mut res) = fx.ctor().build(&layout, &ca, &acts, None).unwrap();
        let counters = fx.pools.counters().unwrap();
        let ages = fx.pools.ages().unwrap();
        assert_eq!(counters.live(), 1);
        assert_eq!(ages.live(), 1);

        let age = res.age.unwrap();
        let id = res.counter.unwrap();
        assert_eq!(counters.age_idx(id), age);
        assert_eq!(ages.nb_cnts(age), 1);
        assert_eq!(res.flags(), FlowFlags::AGE | FlowFlags::COUNTER);

        let slot = ra.iter().find(|a| a.kind == HwActionKind::Counter).unwrap();
        assert_eq!(slot.obj, counters.bulk());
        assert_eq!(slot.arg, RuleActionArg::Offset(CounterPool::offset(id)));

        res.release(&fx.eng, &fx.pools, 0);
        assert_eq!(counters.live(), 0);
        assert_eq!(ages.live(), 0);
    }

    #[test]
    fn age_alone_gets_tagged_counter() {
        let fx = Fixture::new();
        let (layout, ca) = fx.bind(&[
            ActionSpec::per_rule(Action::Age { timeout: 30, context: None }),
            ActionSpec::fixed(Action::Drop),
        ]);
        let acts = [Action::Age { timeout: 30, context: None }, Action::Drop];
        let (_, mut res) = fx.ctor().build(&layout, &ca, &acts, None).unwrap();
        let counters = fx.pools.counters().unwrap();
        assert_eq!(counters.age_idx(res.counter.unwrap()), res.age.unwrap());
        res.release(&fx.eng, &fx.pools, 0);
    }

    #[test]
    fn shared_counter_retagged_by_newest_age() {
        let fx = Fixture::new();
        let counters = fx.pools.counters().unwrap();
        let ages = fx.pools.ages().unwrap();
        let shared = counters.alloc(&fx.eng, 0, 0, true).unwrap();
        let h = IndirectHandle::new(IndirectKind::Count, shared);

        let (layout, ca) = fx.bind(&[
            ActionSpec::per_rule(Action::Indirect(h)),
            ActionSpec::per_rule(Action::Age { timeout: 30, context: None }),
            ActionSpec::fixed(Action::Drop),
        ]);
        let acts = [
            Action::Indirect(h),
            Action::Age { timeout: 30, context: None },
            Action::Drop,
        ];

        let (_, mut r1) = fx.ctor().build(&layout, &ca, &acts, None).unwrap();
        let a1 = r1.age.unwrap();
        let (_, mut r2) = fx.ctor().build(&layout, &ca, &acts, None).unwrap();
        let a2 = r2.age.unwrap();

        assert_eq!(counters.refcnt(shared), 3);
        assert_eq!(counters.age_idx(shared), a2);
        assert_eq!(ages.nb_cnts(a1), 0);
        assert_eq!(ages.nb_cnts(a2), 1);

        r2.release(&fx.eng, &fx.pools, 0);
        assert_eq!(counters.age_idx(shared), 0);
        r1.release(&fx.eng, &fx.pools, 0);
        assert_eq!(counters.refcnt(shared), 1);
        assert_eq!(ages.live(), 0);
    }

    #[test]
    fn failure_releases_in_reverse() {
        let fx = Fixture::new();
        let (layout, ca) = fx.bind(&[
            ActionSpec::per_rule(Action::Count { id: 0 }),
            ActionSpec::per_rule(Action::Jump { group: 0 }),
        ]);
        let acts = [Action::Count { id: 0 }, Action::Jump { group: 4 }];

        fx.eng.fail_next(SoftOp::ActionCreate, -libc::ENOMEM);
        let err = fx.ctor().build(&layout, &ca, &acts, None).unwrap_err();
        assert!(matches!(err, FlowError::Hardware { .. }));
        assert_eq!(fx.pools.counters().unwrap().live(), 0);
        assert!(fx.pools.cache.is_empty());
    }

    #[test]
    fn direct_meter_initialized_internally() {
        let fx = Fixture::new();
        let pid = MeterProfileId(1);
        fx.pools
            .profiles
            .add(pid, MeterProfile { cir: 1000, cbs: 100, ebs: 0 })
            .unwrap();
        let conf = MeterMarkConf {
            init_color: Color::Yellow,
            ..MeterMarkConf::new(pid)
        };
        let (layout, ca) = fx.bind(&[
            ActionSpec::per_rule(Action::MeterMark(conf)),
            ActionSpec::fixed(Action::Drop),
        ]);
        let acts = [Action::MeterMark(conf), Action::Drop];
        let (ra, mut res) = fx.ctor().build(&layout, &ca, &acts, None).unwrap();

        let meters = fx.pools.meters().unwrap();
        assert_eq!(meters.live(), 1);
        assert_eq!(fx.pools.profiles.refcnt(pid), Some(1));
        let slot =
            ra.iter().find(|a| a.kind == HwActionKind::AsoMeter).unwrap();
        assert_eq!(slot.obj, meters.bulk());
        assert!(matches!(slot.arg, RuleActionArg::Aso { param: 1, .. }));

        let mut done = Vec::new();
        assert_eq!(fx.eng.queue_poll(0, &mut done, 8).unwrap(), 1);
        assert!(done[0].is_ok());
        assert!(matches!(
            parse_internal(done[0].token),
            Some((InternalOp::MeterInit, _, _))
        ));

        res.release(&fx.eng, &fx.pools, 0);
        assert_eq!(meters.live(), 0);
        assert_eq!(fx.pools.profiles.refcnt(pid), Some(0));
    }

    #[test]
    fn encap_length_enforced() {
        let fx = Fixture::new();
        let (layout, ca) = fx.bind(&[
            ActionSpec::per_rule(Action::RawEncap { data: vec![0; 50] }),
            ActionSpec::fixed(Action::Drop),
        ]);
        let seg = ca.segment_objs(&fx.eng, FlowDir::INGRESS, 4).unwrap();

        let short = [Action::RawEncap { data: vec![0; 40] }, Action::Drop];
        assert!(matches!(
            fx.ctor().build(&layout, &ca, &short, Some((0, seg))),
            Err(FlowError::InvalidAction { index: 0, .. })
        ));

        let ok = [Action::RawEncap { data: vec![7; 50] }, Action::Drop];
        let (ra, _) =
            fx.ctor().build(&layout, &ca, &ok, Some((2, seg))).unwrap();
        let slot = ra.iter().find(|a| a.obj == seg.reformat.unwrap()).unwrap();
        assert_eq!(
            slot.arg,
            RuleActionArg::Data { offset: 2, data: vec![7; 50] }
        );
    }

    #[test]
    fn kinds_validated() {
        let layout = template::compile(
            TemplateAttr::new(FlowDir::INGRESS),
            &[ActionSpec::per_rule(Action::Queue { index: 0 })],
        )
        .unwrap();
        assert!(validate(&layout, &[Action::Queue { index: 3 }]).is_ok());
        assert!(validate(&layout, &[Action::Drop]).is_err());
        assert!(validate(&layout, &[]).is_err());
    }
}
