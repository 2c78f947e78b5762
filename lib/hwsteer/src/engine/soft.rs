// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A software steering engine.
//!
//! `SoftEngine` keeps every object in memory and models the queue
//! protocol of real hardware: a submission made with `burst` set is
//! held until the queue is drained, every other submission takes
//! effect immediately, and completions are handed out in submission
//! order. It validates rules against their matcher and action template
//! the way the hardware would, keeps per-entry counters which tests can
//! bump with [`SoftEngine::hit_rule`], and can be told to fail any
//! operation with [`SoftEngine::fail_next`].

use super::steering::ActionObjId;
use super::steering::AsoOp;
use super::steering::HwActionDesc;
use super::steering::HwActionKind;
use super::steering::HwActionTemplateId;
use super::steering::HwCompletion;
use super::steering::HwError;
use super::steering::MatchTemplateId;
use super::steering::MatcherAttr;
use super::steering::MatcherId;
use super::steering::RuleAction;
use super::steering::RuleActionArg;
use super::steering::RuleHandle;
use super::steering::RuleRequest;
use super::steering::SteeringEngine;
use crate::api::CtProfile;
use crate::api::FlowDir;
use crate::api::Item;
use crate::api::PatternItem;
use crate::sys::sync::KMutex;
use alloc::collections::BTreeMap;
use alloc::collections::BTreeSet;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// The operations a fault can be injected into.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum SoftOp {
    Configure,
    MatchTemplateCreate,
    ActionTemplateCreate,
    MatcherCreate,
    ResizeTarget,
    ActionCreate,
    RuleCreate,
    RuleDestroy,
    RuleUpdate,
    RuleMove,
    RuleHash,
    AsoSubmit,
    QueueDrain,
    CounterQuery,
    /// The next completion generated carries the fault's status.
    Completion,
}

struct Fault {
    op: SoftOp,
    countdown: u32,
    status: i32,
}

/// A rule as the engine holds it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SoftRule {
    pub matcher: MatcherId,
    pub mt_idx: u8,
    pub at_idx: u8,
    pub items: Vec<Item>,
    pub actions: Vec<RuleAction>,
    pub rule_idx: Option<u32>,
}

struct SoftMatcher {
    attr: MatcherAttr,
    mts: Vec<MatchTemplateId>,
    ats: Vec<HwActionTemplateId>,
    resize_target: Option<MatcherId>,
    used_idx: BTreeSet<u32>,
}

enum Effect {
    None,
    Insert(RuleHandle, SoftRule),
    Remove(RuleHandle),
    Update(RuleHandle, u8, Vec<RuleAction>),
    Move(RuleHandle),
    CtWrite(ActionObjId, u32, CtProfile),
    CtQuery(ActionObjId, u32),
}

struct Submission {
    token: u64,
    effect: Effect,
}

#[derive(Default)]
struct SoftQueue {
    held: Vec<Submission>,
    done: VecDeque<HwCompletion>,
}

#[derive(Default)]
struct SoftState {
    next_id: u32,
    queues: Vec<SoftQueue>,
    queue_size: u32,
    mts: BTreeMap<MatchTemplateId, Vec<PatternItem>>,
    ats: BTreeMap<HwActionTemplateId, Vec<HwActionKind>>,
    matchers: BTreeMap<MatcherId, SoftMatcher>,
    objects: BTreeMap<ActionObjId, (HwActionDesc, FlowDir)>,
    rules: BTreeMap<RuleHandle, SoftRule>,
    /// Rules whose creation has been submitted but not yet applied.
    reserved: BTreeSet<RuleHandle>,
    next_rule: u64,
    counters: BTreeMap<(ActionObjId, u32), (u64, u64)>,
    cts: BTreeMap<(ActionObjId, u32), CtProfile>,
    faults: Vec<Fault>,
}

fn einval(msg: impl Into<alloc::string::String>) -> HwError {
    HwError::new(-libc::EINVAL, msg)
}

impl SoftState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&mut self, op: SoftOp) -> Result<(), HwError> {
        let Some(pos) = self.faults.iter().position(|f| f.op == op) else {
            return Ok(());
        };
        let fault = &mut self.faults[pos];
        fault.countdown -= 1;
        if fault.countdown > 0 {
            return Ok(());
        }
        let status = self.faults.remove(pos).status;
        Err(HwError::new(status, format!("injected {op:?} failure")))
    }

    fn completion_status(&mut self) -> i32 {
        match self.check(SoftOp::Completion) {
            Ok(()) => 0,
            Err(e) => e.status,
        }
    }

    fn queue(&mut self, queue: u16) -> Result<&mut SoftQueue, HwError> {
        self.queues
            .get_mut(usize::from(queue))
            .ok_or_else(|| einval(format!("no queue {queue}")))
    }

    fn submit(
        &mut self,
        queue: u16,
        token: u64,
        effect: Effect,
        burst: bool,
    ) -> Result<(), HwError> {
        self.queue(queue)?;
        let sub = Submission { token, effect };
        if burst {
            self.queue(queue)?.held.push(sub);
        } else {
            self.apply(queue, sub);
        }
        Ok(())
    }

    /// Carry out a submission and queue its completion.
    fn apply(&mut self, queue: u16, sub: Submission) {
        let mut status = self.completion_status();
        let mut ct = None;

        if status == 0 {
            match sub.effect {
                Effect::None => {}

                Effect::Insert(handle, rule) => {
                    self.reserved.remove(&handle);
                    self.rules.insert(handle, rule);
                }

                Effect::Remove(handle) => {
                    if let Some(rule) = self.rules.remove(&handle) {
                        let m = self.matchers.get_mut(&rule.matcher);
                        if let (Some(idx), Some(m)) = (rule.rule_idx, m) {
                            m.used_idx.remove(&idx);
                        }
                    } else {
                        status = -libc::ENOENT;
                    }
                }

                Effect::Update(handle, at_idx, actions) => {
                    match self.rules.get_mut(&handle) {
                        Some(rule) => {
                            rule.at_idx = at_idx;
                            rule.actions = actions;
                        }
                        None => status = -libc::ENOENT,
                    }
                }

                Effect::Move(handle) => {
                    let target = self.rules.get(&handle).and_then(|r| {
                        self.matchers.get(&r.matcher)?.resize_target
                    });
                    match (target, self.rules.get_mut(&handle)) {
                        (Some(t), Some(rule)) => rule.matcher = t,
                        _ => status = -libc::EINVAL,
                    }
                }

                Effect::CtWrite(obj, off, profile) => {
                    self.cts.insert((obj, off), profile);
                }

                Effect::CtQuery(obj, off) => {
                    let prof = self.cts.get(&(obj, off)).copied();
                    ct = Some(prof.unwrap_or_default());
                }
            }
        } else if let Effect::Insert(handle, _) = sub.effect {
            self.reserved.remove(&handle);
        }

        if let Some(q) = self.queues.get_mut(usize::from(queue)) {
            q.done.push_back(HwCompletion { token: sub.token, status, ct });
        }
    }

    fn check_rule(&self, req: &RuleRequest<'_>) -> Result<(), HwError> {
        let m = self
            .matchers
            .get(&req.matcher)
            .ok_or_else(|| einval(format!("no matcher {}", req.matcher.0)))?;

        let mt = m
            .mts
            .get(usize::from(req.mt_idx))
            .and_then(|id| self.mts.get(id))
            .ok_or_else(|| einval("bad match template index"))?;
        if mt.len() != req.items.len() {
            return Err(einval(format!(
                "matcher expects {} items, got {}",
                mt.len(),
                req.items.len()
            )));
        }

        let at = m
            .ats
            .get(usize::from(req.at_idx))
            .and_then(|id| self.ats.get(id))
            .ok_or_else(|| einval("bad action template index"))?;
        check_actions(at, req.actions, &self.objects)?;

        if let Some(idx) = req.rule_idx {
            if idx >= m.attr.capacity {
                return Err(einval(format!("rule index {idx} out of range")));
            }
            if m.used_idx.contains(&idx) {
                return Err(HwError::new(-libc::EEXIST, "rule index in use"));
            }
        }
        Ok(())
    }
}

fn check_actions(
    kinds: &[HwActionKind],
    actions: &[RuleAction],
    objects: &BTreeMap<ActionObjId, (HwActionDesc, FlowDir)>,
) -> Result<(), HwError> {
    if kinds.len() != actions.len() {
        return Err(einval(format!(
            "template has {} actions, rule has {}",
            kinds.len(),
            actions.len()
        )));
    }
    for (slot, (kind, act)) in kinds.iter().zip(actions).enumerate() {
        if *kind != act.kind {
            return Err(einval(format!(
                "slot {slot}: expected {kind}, got {}",
                act.kind
            )));
        }
        if !objects.contains_key(&act.obj) {
            return Err(einval(format!("slot {slot}: no object {}", act.obj.0)));
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct SoftEngine {
    state: KMutex<SoftState>,
}

impl SoftEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `op` with `status`.
    pub fn fail_next(&self, op: SoftOp, status: i32) {
        self.fail_nth(op, 1, status);
    }

    /// Fail the `nth` (1-based) next `op` with `status`.
    pub fn fail_nth(&self, op: SoftOp, nth: u32, status: i32) {
        self.state.lock().faults.push(Fault {
            op,
            countdown: nth.max(1),
            status,
        });
    }

    /// Credit traffic to entry `offset` of a counter bulk object.
    pub fn hit_counter(
        &self,
        obj: ActionObjId,
        offset: u32,
        pkts: u64,
        bytes: u64,
    ) {
        let mut st = self.state.lock();
        let c = st.counters.entry((obj, offset)).or_default();
        c.0 += pkts;
        c.1 += bytes;
    }

    /// Credit traffic to the counter a rule points at. Returns false if
    /// the rule does not exist or has no counter.
    pub fn hit_rule(&self, rule: RuleHandle, pkts: u64, bytes: u64) -> bool {
        let target = {
            let st = self.state.lock();
            st.rules.get(&rule).and_then(|r| {
                r.actions.iter().find_map(|a| match (a.kind, &a.arg) {
                    (HwActionKind::Counter, RuleActionArg::Offset(off)) => {
                        Some((a.obj, *off))
                    }
                    _ => None,
                })
            })
        };
        match target {
            Some((obj, off)) => {
                self.hit_counter(obj, off, pkts, bytes);
                true
            }
            None => false,
        }
    }

    pub fn rule(&self, rule: RuleHandle) -> Option<SoftRule> {
        self.state.lock().rules.get(&rule).cloned()
    }

    pub fn rule_count(&self) -> usize {
        self.state.lock().rules.len()
    }

    /// The rules currently in `matcher`.
    pub fn matcher_rules(&self, matcher: MatcherId) -> usize {
        self.state
            .lock()
            .rules
            .values()
            .filter(|r| r.matcher == matcher)
            .count()
    }

    pub fn matcher_count(&self) -> usize {
        self.state.lock().matchers.len()
    }

    pub fn resize_target(&self, matcher: MatcherId) -> Option<MatcherId> {
        self.state.lock().matchers.get(&matcher)?.resize_target
    }

    pub fn action_desc(&self, obj: ActionObjId) -> Option<HwActionDesc> {
        self.state.lock().objects.get(&obj).map(|(d, _)| d.clone())
    }

    /// Every live object: templates, matchers, and action objects.
    pub fn object_count(&self) -> usize {
        let st = self.state.lock();
        st.mts.len() + st.ats.len() + st.matchers.len() + st.objects.len()
    }

    pub fn ct_profile(
        &self,
        obj: ActionObjId,
        offset: u32,
    ) -> Option<CtProfile> {
        self.state.lock().cts.get(&(obj, offset)).copied()
    }

    /// Submissions held back waiting for a drain.
    pub fn held(&self, queue: u16) -> usize {
        self.state
            .lock()
            .queues
            .get(usize::from(queue))
            .map_or(0, |q| q.held.len())
    }
}

impl SteeringEngine for SoftEngine {
    fn configure(
        &self,
        nb_queues: u16,
        queue_size: u32,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::Configure)?;
        if nb_queues == 0 || queue_size == 0 {
            return Err(einval("queues must be non-empty"));
        }
        st.queues = (0..nb_queues).map(|_| SoftQueue::default()).collect();
        st.queue_size = queue_size;
        Ok(())
    }

    fn match_template_create(
        &self,
        items: &[PatternItem],
        _relaxed: bool,
    ) -> Result<MatchTemplateId, HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::MatchTemplateCreate)?;
        let id = MatchTemplateId(st.next_id());
        st.mts.insert(id, items.to_vec());
        Ok(id)
    }

    fn match_template_destroy(
        &self,
        id: MatchTemplateId,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        if st.matchers.values().any(|m| m.mts.contains(&id)) {
            return Err(HwError::new(-libc::EBUSY, "match template in use"));
        }
        st.mts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| einval("no such match template"))
    }

    fn action_template_create(
        &self,
        kinds: &[HwActionKind],
    ) -> Result<HwActionTemplateId, HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::ActionTemplateCreate)?;
        let id = HwActionTemplateId(st.next_id());
        st.ats.insert(id, kinds.to_vec());
        Ok(id)
    }

    fn action_template_destroy(
        &self,
        id: HwActionTemplateId,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        if st.matchers.values().any(|m| m.ats.contains(&id)) {
            return Err(HwError::new(-libc::EBUSY, "action template in use"));
        }
        st.ats
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| einval("no such action template"))
    }

    fn matcher_create(
        &self,
        attr: &MatcherAttr,
        mts: &[MatchTemplateId],
        ats: &[HwActionTemplateId],
    ) -> Result<MatcherId, HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::MatcherCreate)?;
        if mts.iter().any(|id| !st.mts.contains_key(id))
            || ats.iter().any(|id| !st.ats.contains_key(id))
        {
            return Err(einval("unknown template"));
        }
        let id = MatcherId(st.next_id());
        st.matchers.insert(
            id,
            SoftMatcher {
                attr: *attr,
                mts: mts.to_vec(),
                ats: ats.to_vec(),
                resize_target: None,
                used_idx: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    fn matcher_destroy(&self, id: MatcherId) -> Result<(), HwError> {
        let mut st = self.state.lock();
        if st.rules.values().any(|r| r.matcher == id) {
            return Err(HwError::new(-libc::EBUSY, "matcher has rules"));
        }
        st.matchers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| einval("no such matcher"))
    }

    fn matcher_resize_set_target(
        &self,
        src: MatcherId,
        dst: MatcherId,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::ResizeTarget)?;
        if !st.matchers.contains_key(&dst) {
            return Err(einval("no such target matcher"));
        }
        let m = st
            .matchers
            .get_mut(&src)
            .ok_or_else(|| einval("no such matcher"))?;
        m.resize_target = Some(dst);
        Ok(())
    }

    fn action_create(
        &self,
        desc: &HwActionDesc,
        dir: FlowDir,
    ) -> Result<ActionObjId, HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::ActionCreate)?;
        if let HwActionDesc::JumpToMatcher { matcher } = desc
            && !st.matchers.contains_key(matcher)
        {
            return Err(einval("jump to unknown matcher"));
        }
        let id = ActionObjId(st.next_id());
        st.objects.insert(id, (desc.clone(), dir));
        Ok(id)
    }

    fn action_destroy(&self, id: ActionObjId) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.objects
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| einval(format!("no object {}", id.0)))
    }

    fn rule_create(
        &self,
        req: &RuleRequest<'_>,
    ) -> Result<RuleHandle, HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::RuleCreate)?;
        st.queue(req.queue)?;
        st.check_rule(req)?;

        st.next_rule += 1;
        let handle = RuleHandle(st.next_rule);
        if let Some(idx) = req.rule_idx
            && let Some(m) = st.matchers.get_mut(&req.matcher)
        {
            m.used_idx.insert(idx);
        }
        st.reserved.insert(handle);

        let rule = SoftRule {
            matcher: req.matcher,
            mt_idx: req.mt_idx,
            at_idx: req.at_idx,
            items: req.items.to_vec(),
            actions: req.actions.to_vec(),
            rule_idx: req.rule_idx,
        };
        let effect = Effect::Insert(handle, rule);
        st.submit(req.queue, req.token, effect, req.burst)?;
        Ok(handle)
    }

    fn rule_destroy(
        &self,
        queue: u16,
        rule: RuleHandle,
        token: u64,
        burst: bool,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::RuleDestroy)?;
        if !st.rules.contains_key(&rule) && !st.reserved.contains(&rule) {
            return Err(HwError::new(-libc::ENOENT, "no such rule"));
        }
        st.submit(queue, token, Effect::Remove(rule), burst)
    }

    fn rule_action_update(
        &self,
        queue: u16,
        rule: RuleHandle,
        at_idx: u8,
        actions: &[RuleAction],
        token: u64,
        burst: bool,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::RuleUpdate)?;
        let matcher = st
            .rules
            .get(&rule)
            .map(|r| r.matcher)
            .ok_or_else(|| HwError::new(-libc::ENOENT, "no such rule"))?;
        let kinds = st
            .matchers
            .get(&matcher)
            .and_then(|m| m.ats.get(usize::from(at_idx)))
            .and_then(|id| st.ats.get(id))
            .ok_or_else(|| einval("bad action template index"))?;
        check_actions(kinds, actions, &st.objects)?;
        st.submit(
            queue,
            token,
            Effect::Update(rule, at_idx, actions.to_vec()),
            burst,
        )
    }

    fn rule_move(
        &self,
        queue: u16,
        rule: RuleHandle,
        token: u64,
        burst: bool,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::RuleMove)?;
        let has_target = st
            .rules
            .get(&rule)
            .and_then(|r| st.matchers.get(&r.matcher))
            .is_some_and(|m| m.resize_target.is_some());
        if !has_target {
            return Err(einval("rule's matcher has no resize target"));
        }
        st.submit(queue, token, Effect::Move(rule), burst)
    }

    fn rule_hash(
        &self,
        matcher: MatcherId,
        mt_idx: u8,
        items: &[Item],
    ) -> Result<u32, HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::RuleHash)?;
        let m = st
            .matchers
            .get(&matcher)
            .ok_or_else(|| einval("no such matcher"))?;
        if usize::from(mt_idx) >= m.mts.len() {
            return Err(einval("bad match template index"));
        }
        let bytes = postcard::to_allocvec(items)
            .map_err(|e| einval(format!("encode: {e}")))?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&matcher.0.to_be_bytes());
        hasher.update(&[mt_idx]);
        hasher.update(&bytes);
        Ok(hasher.finalize())
    }

    fn aso_submit(
        &self,
        queue: u16,
        obj: ActionObjId,
        op: &AsoOp,
        token: u64,
        burst: bool,
    ) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::AsoSubmit)?;
        let Some((desc, _)) = st.objects.get(&obj) else {
            return Err(einval(format!("no object {}", obj.0)));
        };
        let (count, is_ct) = match desc {
            HwActionDesc::AsoMeterBulk { count } => (*count, false),
            HwActionDesc::AsoCtBulk { count } => (*count, true),
            _ => return Err(einval("not an ASO object")),
        };

        let (offset, effect) = match *op {
            AsoOp::MeterInit { offset, .. } | AsoOp::MeterUpdate { offset, .. }
                if !is_ct =>
            {
                (offset, Effect::None)
            }
            AsoOp::CtInit { offset, profile }
            | AsoOp::CtUpdate { offset, profile }
                if is_ct =>
            {
                (offset, Effect::CtWrite(obj, offset, profile))
            }
            AsoOp::CtQuery { offset } if is_ct => {
                (offset, Effect::CtQuery(obj, offset))
            }
            _ => return Err(einval("ASO operation does not fit object")),
        };
        if offset >= count {
            return Err(einval(format!("ASO offset {offset} out of range")));
        }
        st.submit(queue, token, effect, burst)
    }

    fn queue_drain(&self, queue: u16) -> Result<(), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::QueueDrain)?;
        let held = core::mem::take(&mut st.queue(queue)?.held);
        for sub in held {
            st.apply(queue, sub);
        }
        Ok(())
    }

    fn queue_poll(
        &self,
        queue: u16,
        out: &mut Vec<HwCompletion>,
        max: usize,
    ) -> Result<usize, HwError> {
        let mut st = self.state.lock();
        let q = st.queue(queue)?;
        let n = max.min(q.done.len());
        out.extend(q.done.drain(..n));
        Ok(n)
    }

    fn counter_query(
        &self,
        obj: ActionObjId,
        offset: u32,
    ) -> Result<(u64, u64), HwError> {
        let mut st = self.state.lock();
        st.check(SoftOp::CounterQuery)?;
        match st.objects.get(&obj) {
            Some((HwActionDesc::CounterBulk { count }, _))
                if offset < *count =>
            {
                let hits = st.counters.get(&(obj, offset)).copied();
                Ok(hits.unwrap_or_default())
            }
            _ => Err(einval(format!("no counter {}:{offset}", obj.0))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::HashFunc;
    use crate::api::InsertionType;
    use crate::api::L4Item;

    fn setup(eng: &SoftEngine) -> (MatcherId, ActionObjId) {
        eng.configure(2, 8).unwrap();
        let udp = [PatternItem::any(Item::Udp(L4Item::default()))];
        let mt = eng.match_template_create(&udp, false).unwrap();
        let at = eng.action_template_create(&[HwActionKind::Drop]).unwrap();
        let attr = MatcherAttr {
            group: 1,
            priority: 0,
            dir: FlowDir::INGRESS,
            capacity: 4,
            insertion: InsertionType::Pattern,
            hash: HashFunc::Default,
            resizable: false,
        };
        let m = eng.matcher_create(&attr, &[mt], &[at]).unwrap();
        let drop =
            eng.action_create(&HwActionDesc::Drop, FlowDir::INGRESS).unwrap();
        (m, drop)
    }

    fn req<'a>(
        m: MatcherId,
        items: &'a [Item],
        actions: &'a [RuleAction],
        token: u64,
        burst: bool,
    ) -> RuleRequest<'a> {
        RuleRequest {
            queue: 0,
            matcher: m,
            mt_idx: 0,
            items,
            at_idx: 0,
            actions,
            rule_idx: None,
            token,
            burst,
        }
    }

    #[test]
    fn burst_held_until_drain() {
        let eng = SoftEngine::new();
        let (m, drop) = setup(&eng);
        let items = [Item::Udp(L4Item { src_port: 1, dst_port: 2 })];
        let acts = [RuleAction::new(HwActionKind::Drop, drop)];

        eng.rule_create(&req(m, &items, &acts, 1, true)).unwrap();
        eng.rule_create(&req(m, &items, &acts, 2, true)).unwrap();
        let mut out = Vec::new();
        assert_eq!(eng.queue_poll(0, &mut out, 8).unwrap(), 0);
        assert_eq!(eng.held(0), 2);

        eng.queue_drain(0).unwrap();
        assert_eq!(eng.queue_poll(0, &mut out, 8).unwrap(), 2);
        assert_eq!(out.iter().map(|c| c.token).collect::<Vec<_>>(), vec![1, 2]);
        assert!(out.iter().all(HwCompletion::is_ok));
        assert_eq!(eng.matcher_rules(m), 2);
    }

    #[test]
    fn rules_validated_against_templates() {
        let eng = SoftEngine::new();
        let (m, drop) = setup(&eng);
        let items = [Item::Udp(L4Item::default())];
        let wrong = [RuleAction::new(HwActionKind::Jump, drop)];
        assert!(eng.rule_create(&req(m, &items, &wrong, 1, false)).is_err());
        let acts = [RuleAction::new(HwActionKind::Drop, drop)];
        assert!(eng.rule_create(&req(m, &[], &acts, 1, false)).is_err());
    }

    #[test]
    fn injected_faults() {
        let eng = SoftEngine::new();
        let (m, drop) = setup(&eng);
        let items = [Item::Udp(L4Item::default())];
        let acts = [RuleAction::new(HwActionKind::Drop, drop)];

        eng.fail_next(SoftOp::RuleCreate, -libc::ENOSPC);
        let err =
            eng.rule_create(&req(m, &items, &acts, 1, false)).unwrap_err();
        assert_eq!(err.status, -libc::ENOSPC);

        eng.fail_next(SoftOp::Completion, -libc::EIO);
        eng.rule_create(&req(m, &items, &acts, 2, false)).unwrap();
        let mut out = Vec::new();
        eng.queue_poll(0, &mut out, 8).unwrap();
        assert_eq!(out[0].status, -libc::EIO);
        assert_eq!(eng.rule_count(), 0);
    }

    #[test]
    fn hash_is_stable() {
        let eng = SoftEngine::new();
        let (m, _) = setup(&eng);
        let items = [Item::Udp(L4Item { src_port: 7, dst_port: 9 })];
        let a = eng.rule_hash(m, 0, &items).unwrap();
        assert_eq!(a, eng.rule_hash(m, 0, &items).unwrap());
        assert!(eng.rule_hash(m, 1, &items).is_err());
    }
}
