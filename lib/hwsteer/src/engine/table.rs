// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Template tables.
//!
//! A table binds pattern and action templates to a matcher in one
//! flow group, and owns the storage of the rules inserted into it.
//!
//! # Resize
//!
//! A resizable table carries two matcher slots. Resizing creates a
//! larger matcher in the idle slot, makes it the resize target of the
//! live one, and flips the selector so new rules land in the new
//! matcher. Rules in the old matcher are moved one at a time with
//! `async_update_resized`. Once the old matcher is empty,
//! `resize_complete` destroys it.
//!
//! Per-rule modify-header and reformat data live in bulk objects, one
//! per *segment* of the resource index space. A resize appends the
//! segment covering the new indexes.

use super::actions::compiled::CompiledActions;
use super::actions::compiled::SegObjs;
use super::actions::template::ActionTemplate;
use super::codec::ActionFlags;
use super::flow::Flow;
use super::ipool::IndexPool;
use super::pattern::PatternTemplate;
use super::pool::Pools;
use super::steering::ActionObjId;
use super::steering::HwActionDesc;
use super::steering::MatcherAttr;
use super::steering::MatcherId;
use super::steering::SteeringEngine;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::MAX_TABLE_RESIZES;
use crate::api::MAX_TABLE_TEMPLATES;
use crate::api::PortConfig;
use crate::api::TableAttr;
use crate::api::TableDump;
use crate::api::TableId;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::sys::sync::KMutex;
use crate::sys::sync::KRwLock;
use crate::sys::sync::KRwLockReadGuard;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

pub type TableMap = BTreeMap<TableId, Arc<Table>>;

/// Translate a user group to the hardware group of a table in `dir`.
///
/// The port reserves group 0 of the transfer domain for its default
/// rules, and group 0 of the egress domain for represented-port
/// matching.
pub fn hw_group(cfg: &PortConfig, dir: FlowDir, group: u32) -> u32 {
    let shifted = (dir == FlowDir::TRANSFER && cfg.default_rules)
        || (dir == FlowDir::EGRESS && cfg.repr_matching);
    if shifted { group.saturating_add(1) } else { group }
}

/// The actions a root table cannot carry.
const ROOT_FORBIDDEN: ActionFlags = ActionFlags::AGE
    .union(ActionFlags::METER)
    .union(ActionFlags::CT)
    .union(ActionFlags::MIRROR);

/// The lifecycle of a table.
///
/// ```text
/// create --> Unbound -- matcher built --> Bound
///
/// Bound -- resize --> Resizing -- resize_complete --> Bound
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableState {
    Unbound,
    Bound,
    Resizing,
}

impl Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Unbound => "UNBOUND",
            Self::Bound => "BOUND",
            Self::Resizing => "RESIZING",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct MatcherInfo {
    pub matcher: MatcherId,
    /// The jump-to-matcher object other tables' rules use to reach
    /// this matcher.
    pub jump: ActionObjId,
    pub capacity: u32,
    rules: AtomicU32,
}

impl MatcherInfo {
    pub fn rules(&self) -> u32 {
        self.rules.load(Ordering::Acquire)
    }
}

/// Bulk objects covering resource indexes `head..head + len`.
#[derive(Debug)]
pub struct MpSegment {
    pub head: u32,
    pub len: u32,
    /// One entry per action template.
    pub objs: Vec<SegObjs>,
}

#[derive(Debug)]
struct TableInner {
    state: TableState,
    selector: u8,
    matchers: [Option<MatcherInfo>; 2],
    segments: Vec<MpSegment>,
    capacity: u32,
    resizes: u32,
}

pub struct Table {
    pub id: TableId,
    pub attr: TableAttr,
    pub hw_group: u32,
    pub pts: Vec<Arc<PatternTemplate>>,
    pub ats: Vec<Arc<ActionTemplate>>,
    compiled: KRwLock<Vec<CompiledActions>>,
    inner: KRwLock<TableInner>,
    flows: KRwLock<Vec<KMutex<Option<Flow>>>>,
    rule_pool: IndexPool,
    res_pool: Option<IndexPool>,
    /// References from jump-to-table-index rules of other tables.
    refcnt: AtomicU32,
    /// A resize is being built.
    resize_pending: AtomicBool,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("attr", &self.attr)
            .field("hw_group", &self.hw_group)
            .finish_non_exhaustive()
    }
}

/// The number of resource indexes a table of `capacity` rules needs:
/// an updatable table holds old and new actions of every rule at once.
fn res_space(attr: &TableAttr, capacity: u32) -> u32 {
    if attr.updatable { capacity.saturating_mul(2) } else { capacity }
}

fn validate(
    pools: &Pools,
    attr: &TableAttr,
    hw_group: u32,
    pts: &[Arc<PatternTemplate>],
    ats: &[Arc<ActionTemplate>],
) -> Result<(), FlowError> {
    if !attr.dir.is_single() {
        return Err(FlowError::InvalidAttr(format!(
            "table direction {} must be exactly one direction",
            attr.dir
        )));
    }
    if attr.capacity == 0 {
        return Err(FlowError::InvalidAttr("table capacity is zero".into()));
    }
    for (what, n) in [("pattern", pts.len()), ("actions", ats.len())] {
        if n == 0 || n > MAX_TABLE_TEMPLATES {
            return Err(FlowError::InvalidAttr(format!(
                "table needs 1..={MAX_TABLE_TEMPLATES} {what} templates"
            )));
        }
    }
    if attr.resizable && attr.insertion.is_by_index() {
        return Err(FlowError::InvalidAttr(
            "index-based tables cannot be resizable".into(),
        ));
    }

    let root = hw_group == 0;
    if root && (attr.resizable || attr.insertion.is_by_index()) {
        return Err(FlowError::InvalidAttr(
            "root table cannot be resizable or index-based".into(),
        ));
    }

    for pt in pts {
        if !pt.layout.attr.dir.contains(attr.dir) {
            return Err(FlowError::InvalidAttr(format!(
                "{} does not cover {}",
                pt.id, attr.dir
            )));
        }
    }

    for at in ats {
        if !at.layout.attr.dir.contains(attr.dir) {
            return Err(FlowError::InvalidAttr(format!(
                "{} does not cover {}",
                at.id, attr.dir
            )));
        }
        if root && at.layout.flags.intersects(ROOT_FORBIDDEN) {
            return Err(FlowError::Unsupported(format!(
                "{} uses actions not allowed in the root table",
                at.id
            )));
        }
        pools.check_flags(at.layout.flags)?;
    }

    Ok(())
}

/// Hardware objects made while building a table, destroyed in reverse
/// if the build fails.
#[derive(Default)]
struct Undo {
    matchers: Vec<MatcherId>,
    objs: Vec<ActionObjId>,
    compiled: Vec<CompiledActions>,
}

impl Undo {
    fn run<E: SteeringEngine>(mut self, engine: &E, pools: &Pools) {
        for mut ca in self.compiled.drain(..).rev() {
            ca.destroy(engine, &pools.cache);
        }
        self.unwind(engine);
    }

    /// Destroy the objects, then the matchers they jump to.
    fn unwind<E: SteeringEngine>(&mut self, engine: &E) {
        for obj in self.objs.drain(..).rev() {
            let _ = engine.action_destroy(obj);
        }
        for m in self.matchers.drain(..).rev() {
            let _ = engine.matcher_destroy(m);
        }
    }
}

impl Table {
    /// Build a table. On success the table holds a reference to each
    /// template; on failure nothing remains.
    pub fn create<E: SteeringEngine>(
        engine: &E,
        pools: &Pools,
        cfg: &PortConfig,
        id: TableId,
        attr: TableAttr,
        pts: Vec<Arc<PatternTemplate>>,
        ats: Vec<Arc<ActionTemplate>>,
    ) -> Result<Self, FlowError> {
        let hw_group = hw_group(cfg, attr.dir, attr.group);
        validate(pools, &attr, hw_group, &pts, &ats)?;

        let mut undo = Undo::default();
        let res = Self::build(
            engine, pools, cfg, &attr, hw_group, &pts, &ats, &mut undo,
        );
        let (matcher, segment) = match res {
            Ok(built) => built,
            Err(e) => {
                undo.run(engine, pools);
                return Err(e);
            }
        };

        for pt in &pts {
            pt.hold();
        }
        for at in &ats {
            at.hold();
        }

        let res_pool = (attr.resizable || attr.updatable).then(|| {
            IndexPool::new(
                "table-resource",
                res_space(&attr, attr.capacity),
                cfg.nb_queues,
            )
        });

        let mut flows = Vec::with_capacity(attr.capacity as usize);
        flows.resize_with(attr.capacity as usize, || KMutex::new(None));

        let table = Self {
            id,
            attr,
            hw_group,
            pts,
            ats,
            compiled: KRwLock::new(undo.compiled),
            inner: KRwLock::new(TableInner {
                state: TableState::Unbound,
                selector: 0,
                matchers: [Some(matcher), None],
                segments: segment.into_iter().collect(),
                capacity: attr.capacity,
                resizes: 0,
            }),
            flows: KRwLock::new(flows),
            rule_pool: IndexPool::new(
                "table-rule",
                attr.capacity,
                cfg.nb_queues,
            ),
            res_pool,
            refcnt: AtomicU32::new(0),
            resize_pending: AtomicBool::new(false),
        };
        table.inner.write().state = TableState::Bound;
        Ok(table)
    }

    #[allow(clippy::too_many_arguments)]
    fn build<E: SteeringEngine>(
        engine: &E,
        pools: &Pools,
        cfg: &PortConfig,
        attr: &TableAttr,
        hw_group: u32,
        pts: &[Arc<PatternTemplate>],
        ats: &[Arc<ActionTemplate>],
        undo: &mut Undo,
    ) -> Result<(MatcherInfo, Option<MpSegment>), FlowError> {
        let cap = attr.capacity;
        let matcher =
            Self::new_matcher(engine, attr, hw_group, pts, ats, cap, undo)?;

        for at in ats {
            undo.compiled.push(CompiledActions::compile(
                engine,
                &pools.cache,
                cfg,
                attr.dir,
                &at.layout,
            )?);
        }

        let segment = if undo.compiled.iter().any(|c| c.needs_segment()) {
            let len = res_space(attr, attr.capacity);
            let objs =
                Self::segment_objs(engine, attr.dir, &undo.compiled, len)?;
            Some(MpSegment { head: 0, len, objs })
        } else {
            None
        };

        Ok((matcher, segment))
    }

    fn new_matcher<E: SteeringEngine>(
        engine: &E,
        attr: &TableAttr,
        hw_group: u32,
        pts: &[Arc<PatternTemplate>],
        ats: &[Arc<ActionTemplate>],
        capacity: u32,
        undo: &mut Undo,
    ) -> Result<MatcherInfo, FlowError> {
        let mattr = MatcherAttr {
            group: hw_group,
            priority: attr.priority,
            dir: attr.dir,
            capacity,
            insertion: attr.insertion,
            hash: attr.hash,
            resizable: attr.resizable,
        };
        let mts: Vec<_> = pts.iter().map(|p| p.hw).collect();
        let hats: Vec<_> = ats.iter().map(|a| a.hw).collect();
        let matcher = engine.matcher_create(&mattr, &mts, &hats)?;
        undo.matchers.push(matcher);

        let jump = engine
            .action_create(&HwActionDesc::JumpToMatcher { matcher }, attr.dir)?;
        undo.objs.push(jump);

        Ok(MatcherInfo { matcher, jump, capacity, rules: AtomicU32::new(0) })
    }

    /// Create the bulk objects of one segment, unwinding on failure.
    fn segment_objs<E: SteeringEngine>(
        engine: &E,
        dir: FlowDir,
        compiled: &[CompiledActions],
        len: u32,
    ) -> Result<Vec<SegObjs>, FlowError> {
        let mut out = Vec::with_capacity(compiled.len());
        for ca in compiled {
            if !ca.needs_segment() {
                out.push(SegObjs::default());
                continue;
            }
            match ca.segment_objs(engine, dir, len) {
                Ok(objs) => out.push(objs),
                Err(e) => {
                    destroy_segment(engine, &out);
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    /// Release every hardware object and template reference. The
    /// caller has established that no rule remains.
    pub fn destroy<E: SteeringEngine>(
        &self,
        engine: &E,
        pools: &Pools,
        log: &dyn LogProvider,
    ) {
        {
            let mut inner = self.inner.write();
            for seg in inner.segments.drain(..).rev() {
                destroy_segment(engine, &seg.objs);
            }
            let matchers = inner.matchers.iter_mut().rev();
            for info in matchers.filter_map(Option::take) {
                if let Err(e) = engine.action_destroy(info.jump) {
                    let msg = format!("{}: jump: {e}", self.id);
                    log.log(LogLevel::Warn, &msg);
                }
                if let Err(e) = engine.matcher_destroy(info.matcher) {
                    let msg = format!("{}: matcher: {e}", self.id);
                    log.log(LogLevel::Warn, &msg);
                }
            }
            inner.state = TableState::Unbound;
        }

        for ca in self.compiled.write().iter_mut().rev() {
            ca.destroy(engine, &pools.cache);
        }
        for at in self.ats.iter().rev() {
            at.release();
        }
        for pt in self.pts.iter().rev() {
            pt.release();
        }
    }

    /// Can the table be destroyed?
    pub fn check_idle(&self) -> Result<(), FlowError> {
        let res_live = self.res_pool.as_ref().map_or(0, |p| p.live());
        if self.rule_pool.live() > 0 || res_live > 0 {
            return Err(FlowError::InUse(format!(
                "{} ({} rules)",
                self.id,
                self.rule_pool.live()
            )));
        }
        if self.refcnt() > 0 {
            return Err(FlowError::InUse(format!(
                "{} (target of {} jumps)",
                self.id,
                self.refcnt()
            )));
        }
        Ok(())
    }

    pub fn state(&self) -> TableState {
        self.inner.read().state
    }

    pub fn capacity(&self) -> u32 {
        self.inner.read().capacity
    }

    pub fn selector(&self) -> u8 {
        self.inner.read().selector
    }

    /// The selector, matcher, and jump object new rules use.
    pub fn active(&self) -> Result<(u8, MatcherId, ActionObjId), FlowError> {
        let inner = self.inner.read();
        let sel = inner.selector;
        inner.matchers[usize::from(sel)]
            .as_ref()
            .map(|m| (sel, m.matcher, m.jump))
            .ok_or_else(|| FlowError::BadState(format!("{}", inner.state)))
    }

    pub fn matcher(&self, selector: u8) -> Option<MatcherId> {
        let inner = self.inner.read();
        inner.matchers.get(usize::from(selector))?.as_ref().map(|m| m.matcher)
    }

    /// The number of rules held by the matcher in `selector`.
    pub fn matcher_rules(&self, selector: u8) -> u32 {
        let inner = self.inner.read();
        inner
            .matchers
            .get(usize::from(selector))
            .and_then(Option::as_ref)
            .map_or(0, MatcherInfo::rules)
    }

    pub fn rule_added(&self, selector: u8) {
        let inner = self.inner.read();
        if let Some(Some(m)) = inner.matchers.get(usize::from(selector)) {
            m.rules.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn rule_removed(&self, selector: u8) {
        let inner = self.inner.read();
        if let Some(Some(m)) = inner.matchers.get(usize::from(selector)) {
            let _ = m.rules.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |n| n.checked_sub(1),
            );
        }
    }

    pub fn hold_ref(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release_ref(&self) {
        let _ = self.refcnt.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| n.checked_sub(1),
        );
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    pub fn compiled(&self) -> KRwLockReadGuard<'_, Vec<CompiledActions>> {
        self.compiled.read()
    }

    /// Allocate a free rule index.
    pub fn rule_alloc(&self, queue: u16) -> Result<u32, FlowError> {
        self.rule_pool
            .alloc(queue)
            .map(|i| i - 1)
            .ok_or_else(|| FlowError::MaxCapacity(u64::from(self.capacity())))
    }

    /// Claim the rule index `idx` of an index-based table.
    pub fn rule_alloc_at(&self, idx: u32) -> Result<u32, FlowError> {
        let cap = self.capacity();
        if idx >= cap {
            return Err(FlowError::InvalidAttr(format!(
                "rule index {idx} beyond capacity {cap}"
            )));
        }
        if !self.rule_pool.alloc_at(idx + 1) {
            return Err(FlowError::InUse(format!("{} rule {idx}", self.id)));
        }
        Ok(idx)
    }

    pub fn rule_free(&self, queue: u16, idx: u32) {
        self.rule_pool.free(queue, idx + 1);
    }

    pub fn live_rules(&self) -> u32 {
        self.rule_pool.live()
    }

    /// Every rule index in use, ascending.
    pub fn rule_indexes(&self) -> Vec<u32> {
        self.rule_pool.allocated().into_iter().map(|i| i - 1).collect()
    }

    /// Allocate the resource index of a rule at `rule_idx`.
    pub fn res_alloc(
        &self,
        queue: u16,
        rule_idx: u32,
    ) -> Result<u32, FlowError> {
        match &self.res_pool {
            None => Ok(rule_idx),
            Some(pool) => pool
                .alloc(queue)
                .map(|i| i - 1)
                .ok_or_else(|| FlowError::PoolExhausted(pool.name().into())),
        }
    }

    pub fn res_free(&self, queue: u16, res_idx: u32) {
        if let Some(pool) = &self.res_pool {
            pool.free(queue, res_idx + 1);
        }
    }

    pub fn has_res_pool(&self) -> bool {
        self.res_pool.is_some()
    }

    /// The segment entry backing per-rule data at `res_idx` for the
    /// action template `at_idx`.
    pub fn segment(&self, res_idx: u32, at_idx: u8) -> Option<(u32, SegObjs)> {
        let inner = self.inner.read();
        let seg = inner
            .segments
            .iter()
            .find(|s| res_idx >= s.head && res_idx - s.head < s.len)?;
        let objs = seg.objs.get(usize::from(at_idx))?;
        Some((res_idx - seg.head, *objs))
    }

    /// Run `f` on the slot of rule `idx`.
    pub fn with_flow<R>(
        &self,
        idx: u32,
        f: impl FnOnce(&mut Option<Flow>) -> R,
    ) -> Option<R> {
        let flows = self.flows.read();
        let slot = flows.get(idx as usize)?;
        let mut flow = slot.lock();
        Some(f(&mut flow))
    }

    /// Grow the table to `new_cap` rules.
    ///
    /// The new matcher and segment are built without holding the
    /// table lock; inserts keep using the old matcher until the
    /// selector flips.
    pub fn resize<E: SteeringEngine>(
        &self,
        engine: &E,
        new_cap: u32,
    ) -> Result<(), FlowError> {
        if !self.attr.resizable {
            return Err(FlowError::NotResizable);
        }
        if self
            .resize_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FlowError::ResizeInProgress);
        }
        let res = self.resize_claimed(engine, new_cap);
        self.resize_pending.store(false, Ordering::Release);
        res
    }

    fn resize_claimed<E: SteeringEngine>(
        &self,
        engine: &E,
        new_cap: u32,
    ) -> Result<(), FlowError> {
        let (old_cap, old_matcher, new_sel) = {
            let inner = self.inner.read();
            if inner.state == TableState::Resizing {
                return Err(FlowError::ResizeInProgress);
            }
            let state = inner.state;
            check_state!(state, [TableState::Bound])?;

            if new_cap <= inner.capacity {
                return Err(FlowError::InvalidAttr(format!(
                    "new capacity {new_cap} does not exceed {}",
                    inner.capacity
                )));
            }
            if inner.resizes as usize >= MAX_TABLE_RESIZES {
                return Err(FlowError::MaxCapacity(MAX_TABLE_RESIZES as u64));
            }

            let old_sel = usize::from(inner.selector);
            let old_matcher = inner.matchers[old_sel]
                .as_ref()
                .map(|m| m.matcher)
                .ok_or_else(|| {
                    FlowError::BadState(format!("{}", inner.state))
                })?;
            (inner.capacity, old_matcher, 1 - old_sel)
        };

        let mut undo = Undo::default();
        let info = match Self::new_matcher(
            engine,
            &self.attr,
            self.hw_group,
            &self.pts,
            &self.ats,
            new_cap,
            &mut undo,
        ) {
            Ok(info) => info,
            Err(e) => {
                undo.unwind(engine);
                return Err(e);
            }
        };

        let seg = {
            let compiled = self.compiled.read();
            if compiled.iter().any(|c| c.needs_segment()) {
                let head = res_space(&self.attr, old_cap);
                let len = res_space(&self.attr, new_cap) - head;
                let dir = self.attr.dir;
                match Self::segment_objs(engine, dir, &compiled, len) {
                    Ok(objs) => Some(MpSegment { head, len, objs }),
                    Err(e) => {
                        undo.unwind(engine);
                        return Err(e);
                    }
                }
            } else {
                None
            }
        };

        // Last, so that a failure before it leaves the old matcher
        // untouched.
        let target =
            engine.matcher_resize_set_target(old_matcher, info.matcher);
        if let Err(e) = target {
            if let Some(seg) = &seg {
                destroy_segment(engine, &seg.objs);
            }
            undo.unwind(engine);
            return Err(e.into());
        }

        self.rule_pool.grow(new_cap);
        if let Some(pool) = &self.res_pool {
            pool.grow(res_space(&self.attr, new_cap));
        }
        {
            let mut flows = self.flows.write();
            flows.resize_with(new_cap as usize, || KMutex::new(None));
        }

        let mut inner = self.inner.write();
        inner.segments.extend(seg);
        inner.matchers[new_sel] = Some(info);
        inner.selector = new_sel as u8;
        inner.capacity = new_cap;
        inner.resizes += 1;
        inner.state = TableState::Resizing;
        Ok(())
    }

    /// Retire the matcher a resize moved rules out of.
    pub fn resize_complete<E: SteeringEngine>(
        &self,
        engine: &E,
    ) -> Result<(), FlowError> {
        let mut inner = self.inner.write();
        check_state!(inner.state, [TableState::Resizing])?;

        let old_sel = 1 - usize::from(inner.selector);
        let rules =
            inner.matchers[old_sel].as_ref().map_or(0, MatcherInfo::rules);
        if rules > 0 {
            return Err(FlowError::InUse(format!(
                "{}: {rules} rules not yet moved",
                self.id
            )));
        }

        if let Some(info) = inner.matchers[old_sel].take() {
            let jump = engine.action_destroy(info.jump);
            let matcher = engine.matcher_destroy(info.matcher);
            jump?;
            matcher?;
        }
        inner.state = TableState::Bound;
        Ok(())
    }

    pub fn dump(&self) -> TableDump {
        let inner = self.inner.read();
        TableDump {
            id: self.id,
            group: self.attr.group,
            hw_group: self.hw_group,
            dir: self.attr.dir,
            capacity: inner.capacity,
            state: format!("{}", inner.state),
            selector: inner.selector,
            rules: self.rule_pool.live(),
            resizes: inner.resizes,
            pattern_templates: self.pts.iter().map(|p| p.id).collect(),
            actions_templates: self.ats.iter().map(|a| a.id).collect(),
        }
    }
}

fn destroy_segment<E: SteeringEngine>(engine: &E, objs: &[SegObjs]) {
    for o in objs.iter().rev() {
        if let Some(obj) = o.reformat {
            let _ = engine.action_destroy(obj);
        }
        if let Some(obj) = o.mhdr {
            let _ = engine.action_destroy(obj);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Action;
    use crate::api::ActionSpec;
    use crate::api::ActionsTemplateId;
    use crate::api::EthItem;
    use crate::api::Item;
    use crate::api::PatternItem;
    use crate::api::PatternTemplateId;
    use crate::api::TemplateAttr;
    use crate::engine::actions::template;
    use crate::engine::flex::FlexParsers;
    use crate::engine::pattern;
    use crate::engine::soft::SoftEngine;
    use crate::engine::soft::SoftOp;
    use crate::provider::NullLog;

    fn pt(eng: &SoftEngine, dir: FlowDir) -> Arc<PatternTemplate> {
        let items = [PatternItem::any(Item::Eth(EthItem::default()))];
        let cfg = PortConfig::default();
        let layout = pattern::compile(
            TemplateAttr::new(dir),
            &items,
            &cfg,
            &FlexParsers::new(),
        )
        .unwrap();
        let hw = eng.match_template_create(&layout.items, false).unwrap();
        Arc::new(PatternTemplate::new(PatternTemplateId(1), layout, hw))
    }

    fn at(
        eng: &SoftEngine,
        dir: FlowDir,
        acts: &[ActionSpec],
    ) -> Arc<ActionTemplate> {
        let layout = template::compile(TemplateAttr::new(dir), acts).unwrap();
        let hw = eng.action_template_create(&layout.slots).unwrap();
        Arc::new(ActionTemplate::new(ActionsTemplateId(1), layout, hw))
    }

    fn drop_table(
        eng: &SoftEngine,
        pools: &Pools,
        attr: TableAttr,
    ) -> Result<Table, FlowError> {
        let dir = attr.dir;
        Table::create(
            eng,
            pools,
            &PortConfig::default(),
            TableId(1),
            attr,
            vec![pt(eng, dir)],
            vec![at(eng, dir, &[ActionSpec::fixed(Action::Drop)])],
        )
    }

    #[test]
    fn group_translation() {
        let cfg = PortConfig::default();
        assert_eq!(hw_group(&cfg, FlowDir::INGRESS, 0), 0);
        assert_eq!(hw_group(&cfg, FlowDir::EGRESS, 0), 1);
        assert_eq!(hw_group(&cfg, FlowDir::TRANSFER, 2), 3);

        let plain = PortConfig {
            default_rules: false,
            repr_matching: false,
            ..Default::default()
        };
        assert_eq!(hw_group(&plain, FlowDir::TRANSFER, 2), 2);
    }

    #[test]
    fn root_restrictions() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();

        let attr = TableAttr::new(0, FlowDir::INGRESS, 16).resizable();
        assert!(matches!(
            drop_table(&eng, &pools, attr),
            Err(FlowError::InvalidAttr(_))
        ));

        let age = at(
            &eng,
            FlowDir::INGRESS,
            &[
                ActionSpec::per_rule(Action::Age {
                    timeout: 10,
                    context: None,
                }),
                ActionSpec::fixed(Action::Drop),
            ],
        );
        let res = Table::create(
            &eng,
            &pools,
            &PortConfig::default(),
            TableId(2),
            TableAttr::new(0, FlowDir::INGRESS, 16),
            vec![pt(&eng, FlowDir::INGRESS)],
            vec![age],
        );
        assert!(matches!(res, Err(FlowError::Unsupported(_))));

        let multi = TableAttr::new(1, FlowDir::INGRESS | FlowDir::EGRESS, 8);
        assert!(drop_table(&eng, &pools, multi).is_err());
    }

    #[test]
    fn resize_state_machine() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();
        let attr = TableAttr::new(1, FlowDir::INGRESS, 16).resizable();
        let table = drop_table(&eng, &pools, attr).unwrap();
        assert_eq!(table.state(), TableState::Bound);
        assert_eq!(table.pts[0].refcnt(), 2);

        assert!(matches!(
            table.resize(&eng, 16),
            Err(FlowError::InvalidAttr(_))
        ));
        table.resize(&eng, 64).unwrap();
        assert_eq!(table.state(), TableState::Resizing);
        assert_eq!(table.selector(), 1);
        assert_eq!(table.capacity(), 64);

        let before = eng.matcher_count();
        assert_eq!(table.resize(&eng, 128), Err(FlowError::ResizeInProgress));
        assert_eq!(eng.matcher_count(), before);
        assert_eq!(table.capacity(), 64);

        table.rule_added(0);
        assert!(matches!(
            table.resize_complete(&eng),
            Err(FlowError::InUse(_))
        ));
        table.rule_removed(0);
        table.resize_complete(&eng).unwrap();
        assert_eq!(table.state(), TableState::Bound);
        assert!(table.matcher(0).is_none());
        assert!(matches!(
            table.resize_complete(&eng),
            Err(FlowError::BadState(_))
        ));

        table.destroy(&eng, &pools, &NullLog);
        assert_eq!(table.pts[0].refcnt(), 1);
        assert_eq!(eng.matcher_count(), 0);
    }

    #[test]
    fn failed_resize_leaves_table_unchanged() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();
        let attr = TableAttr::new(1, FlowDir::INGRESS, 16).resizable();
        let table = drop_table(&eng, &pools, attr).unwrap();
        let objs = eng.object_count();

        eng.fail_next(SoftOp::ResizeTarget, -libc::ENOMEM);
        assert!(table.resize(&eng, 32).is_err());
        assert_eq!(table.state(), TableState::Bound);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.selector(), 0);
        assert_eq!(eng.object_count(), objs);

        table.resize(&eng, 32).unwrap();
        assert_eq!(table.capacity(), 32);
    }

    #[test]
    fn failed_resize_segment_keeps_old_matcher() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();
        let dir = FlowDir::INGRESS;
        let vid = at(
            &eng,
            dir,
            &[
                ActionSpec::per_rule(Action::SetVlanVid { vid: 0 }),
                ActionSpec::fixed(Action::Drop),
            ],
        );
        let table = Table::create(
            &eng,
            &pools,
            &PortConfig::default(),
            TableId(3),
            TableAttr::new(1, dir, 16).resizable(),
            vec![pt(&eng, dir)],
            vec![vid],
        )
        .unwrap();
        let old = table.matcher(0).unwrap();
        let objs = eng.object_count();
        let matchers = eng.matcher_count();

        // The first create is the new matcher's jump, the second the
        // segment's modify-header bulk.
        eng.fail_nth(SoftOp::ActionCreate, 2, -libc::ENOMEM);
        assert!(table.resize(&eng, 32).is_err());
        assert_eq!(eng.resize_target(old), None);
        assert_eq!(eng.object_count(), objs);
        assert_eq!(eng.matcher_count(), matchers);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.state(), TableState::Bound);
        assert!(table.segment(16, 0).is_none());
        assert_eq!(table.active().map(|(sel, m, _)| (sel, m)), Ok((0, old)));

        table.resize(&eng, 32).unwrap();
        let new = table.matcher(1).unwrap();
        assert_eq!(eng.resize_target(old), Some(new));
        assert!(table.segment(16, 0).is_some());
    }

    #[test]
    fn not_resizable() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();
        let attr = TableAttr::new(1, FlowDir::INGRESS, 16);
        let table = drop_table(&eng, &pools, attr).unwrap();
        assert_eq!(table.resize(&eng, 32), Err(FlowError::NotResizable));
    }

    #[test]
    fn index_rules() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();
        let attr = TableAttr::new(1, FlowDir::INGRESS, 8)
            .insertion(crate::api::InsertionType::Index);
        let table = drop_table(&eng, &pools, attr).unwrap();

        assert_eq!(table.rule_alloc_at(3), Ok(3));
        assert!(matches!(table.rule_alloc_at(3), Err(FlowError::InUse(_))));
        assert!(matches!(
            table.rule_alloc_at(8),
            Err(FlowError::InvalidAttr(_))
        ));
        assert!(table.check_idle().is_err());
        table.rule_free(0, 3);
        assert!(table.check_idle().is_ok());
    }
}
