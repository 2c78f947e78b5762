// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The port: the owner of every template, table, pool, and queue.
//!
//! A port is configured once over a [`SteeringEngine`] and then driven
//! through `&self` from any number of threads, one per flow queue.
//! Each flow queue sits behind its own lock; the control queue, one
//! past the last flow queue, serves the synchronous calls and is
//! serialized by a lock of its own.
//!
//! Rule operations live in [`rule`], indirect actions in [`indirect`].

use super::actions::template;
use super::actions::template::ActionTemplate;
use super::flex::FlexParsers;
use super::flow::Flow;
use super::flow::FlowState;
use super::job::InternalOp;
use super::job::Job;
use super::job::JobEffect;
use super::job::JobQueue;
use super::job::JobTarget;
use super::job::parse_internal;
use super::job::same_generation;
use super::pattern;
use super::pattern::PatternTemplate;
use super::pool::Pools;
use super::pool::aso::AsoState;
use super::pool::counter::CounterPool;
use super::stat::PortStats;
use super::stat::PortStatsSnapshot;
use super::steering::HwCompletion;
use super::steering::SteeringEngine;
use super::table::Table;
use super::table::TableMap;
use crate::ExecCtx;
use crate::api::ActionSpec;
use crate::api::ActionsTemplateId;
use crate::api::FlexHandle;
use crate::api::FlexItemConf;
use crate::api::FlowError;
use crate::api::IndirectKind;
use crate::api::MeterProfile;
use crate::api::MeterProfileId;
use crate::api::OpResult;
use crate::api::OpStatus;
use crate::api::PatternItem;
use crate::api::PatternTemplateId;
use crate::api::PoolDump;
use crate::api::PortConfig;
use crate::api::QueueDump;
use crate::api::TableAttr;
use crate::api::TableDump;
use crate::api::TableId;
use crate::api::TemplateAttr;
use crate::api::TemplateDump;
use crate::provider::LogLevel;
use crate::sys::sync::KMutex;
use crate::sys::sync::KRwLock;
use crate::sys::time::Moment;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

pub mod indirect;
pub mod rule;

pub use rule::RuleSpec;

/// How many times a synchronous call polls the control queue before
/// giving up.
pub const SYNC_RETRY_BUDGET: u32 = 10_000;

/// Completions read from the engine per poll.
const POLL_BURST: usize = 64;

pub struct Port<E: SteeringEngine> {
    engine: E,
    cfg: PortConfig,
    ectx: ExecCtx,
    pools: Pools,
    parsers: FlexParsers,
    pts: KMutex<BTreeMap<PatternTemplateId, Arc<PatternTemplate>>>,
    ats: KMutex<BTreeMap<ActionsTemplateId, Arc<ActionTemplate>>>,
    tables: KRwLock<TableMap>,
    /// The flow queues followed by the control queue.
    queues: Vec<KMutex<JobQueue>>,
    /// Held by a synchronous call for as long as it owns the control
    /// queue.
    ctrl: KMutex<()>,
    next_id: AtomicU32,
    last_scan: KMutex<Moment>,
    stats: PortStats,
    closed: bool,
}

impl<E: SteeringEngine> Port<E> {
    /// Configure a port over `engine`.
    pub fn configure(
        engine: E,
        cfg: PortConfig,
        ectx: ExecCtx,
    ) -> Result<Self, FlowError> {
        if cfg.nb_queues == 0 || cfg.queue_size == 0 {
            return Err(FlowError::InvalidAttr(format!(
                "need at least one queue of at least one job, got {} of {}",
                cfg.nb_queues, cfg.queue_size
            )));
        }
        let total = cfg.nb_queues.checked_add(1).ok_or_else(|| {
            FlowError::InvalidAttr(format!("{} queues", cfg.nb_queues))
        })?;

        engine.configure(total, cfg.queue_size)?;
        let pools = Pools::new(&engine, &cfg)?;
        let queues = (0..total)
            .map(|q| KMutex::new(JobQueue::new(q, cfg.queue_size)))
            .collect();

        ectx.log.log(
            LogLevel::Note,
            &format!(
                "port {} configured: {} queues of {} jobs",
                cfg.port_id, cfg.nb_queues, cfg.queue_size
            ),
        );

        Ok(Self {
            engine,
            cfg,
            ectx,
            pools,
            parsers: FlexParsers::new(),
            pts: KMutex::new(BTreeMap::new()),
            ats: KMutex::new(BTreeMap::new()),
            tables: KRwLock::new(TableMap::new()),
            queues,
            ctrl: KMutex::new(()),
            next_id: AtomicU32::new(1),
            last_scan: KMutex::new(Moment::now()),
            stats: PortStats::default(),
            closed: false,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &PortConfig {
        &self.cfg
    }

    /// The index of the control queue.
    pub fn ctrl_queue(&self) -> u16 {
        self.cfg.nb_queues
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn log(&self, level: LogLevel, msg: &str) {
        self.ectx.log.log(level, msg);
    }

    /// Only flow queues are open to callers.
    fn check_queue(&self, queue: u16) -> Result<(), FlowError> {
        if queue >= self.cfg.nb_queues {
            return Err(FlowError::BadQueue(queue));
        }
        Ok(())
    }

    fn table(&self, id: TableId) -> Result<Arc<Table>, FlowError> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("{id}")))
    }

    // ================================================================
    // Templates
    // ================================================================

    pub fn pattern_template_create(
        &self,
        attr: TemplateAttr,
        items: &[PatternItem],
    ) -> Result<PatternTemplateId, FlowError> {
        let layout = pattern::compile(attr, items, &self.cfg, &self.parsers)?;
        let created =
            self.engine.match_template_create(&layout.items, attr.relaxed);
        let hw = match created {
            Ok(hw) => hw,
            Err(e) => {
                layout.release_parsers(&self.parsers);
                return Err(e.into());
            }
        };

        let id = PatternTemplateId(self.next_id());
        self.pts
            .lock()
            .insert(id, Arc::new(PatternTemplate::new(id, layout, hw)));
        Ok(id)
    }

    pub fn pattern_template_destroy(
        &self,
        id: PatternTemplateId,
    ) -> Result<(), FlowError> {
        let pt = {
            let mut pts = self.pts.lock();
            let pt = pts
                .get(&id)
                .ok_or_else(|| FlowError::NotFound(format!("{id}")))?;
            if pt.refcnt() > 1 {
                return Err(FlowError::InUse(format!(
                    "{id} ({} tables)",
                    pt.refcnt() - 1
                )));
            }
            pts.remove(&id)
        };

        if let Some(pt) = pt {
            self.destroy_pattern(&pt);
        }
        Ok(())
    }

    fn destroy_pattern(&self, pt: &PatternTemplate) {
        if let Err(e) = self.engine.match_template_destroy(pt.hw) {
            self.log(LogLevel::Warn, &format!("{}: {e}", pt.id));
        }
        pt.layout.release_parsers(&self.parsers);
    }

    pub fn actions_template_create(
        &self,
        attr: TemplateAttr,
        actions: &[ActionSpec],
    ) -> Result<ActionsTemplateId, FlowError> {
        let layout = template::compile(attr, actions)?;
        let hw = self.engine.action_template_create(&layout.slots)?;

        let id = ActionsTemplateId(self.next_id());
        self.ats
            .lock()
            .insert(id, Arc::new(ActionTemplate::new(id, layout, hw)));
        Ok(id)
    }

    pub fn actions_template_destroy(
        &self,
        id: ActionsTemplateId,
    ) -> Result<(), FlowError> {
        let at = {
            let mut ats = self.ats.lock();
            let at = ats
                .get(&id)
                .ok_or_else(|| FlowError::NotFound(format!("{id}")))?;
            if at.refcnt() > 1 {
                return Err(FlowError::InUse(format!(
                    "{id} ({} tables)",
                    at.refcnt() - 1
                )));
            }
            ats.remove(&id)
        };

        if let Some(at) = at
            && let Err(e) = self.engine.action_template_destroy(at.hw)
        {
            self.log(LogLevel::Warn, &format!("{id}: {e}"));
        }
        Ok(())
    }

    // ================================================================
    // Tables
    // ================================================================

    pub fn table_create(
        &self,
        attr: TableAttr,
        pts: &[PatternTemplateId],
        ats: &[ActionsTemplateId],
    ) -> Result<TableId, FlowError> {
        let pts = {
            let reg = self.pts.lock();
            pts.iter()
                .map(|id| {
                    reg.get(id)
                        .cloned()
                        .ok_or_else(|| FlowError::NotFound(format!("{id}")))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        let ats = {
            let reg = self.ats.lock();
            ats.iter()
                .map(|id| {
                    reg.get(id)
                        .cloned()
                        .ok_or_else(|| FlowError::NotFound(format!("{id}")))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let id = TableId(self.next_id());
        let table = Table::create(
            &self.engine,
            &self.pools,
            &self.cfg,
            id,
            attr,
            pts,
            ats,
        )?;
        self.log(
            LogLevel::Note,
            &format!(
                "{id} created: group {} ({}), {} rules",
                attr.group, attr.dir, attr.capacity
            ),
        );
        self.tables.write().insert(id, Arc::new(table));
        Ok(id)
    }

    /// Destroy a table. Every rule must be gone, and no rule of another
    /// table may jump into it.
    pub fn table_destroy(&self, id: TableId) -> Result<(), FlowError> {
        let table = {
            let mut tables = self.tables.write();
            let table = tables
                .get(&id)
                .ok_or_else(|| FlowError::NotFound(format!("{id}")))?;
            table.check_idle()?;
            tables.remove(&id)
        };

        if let Some(table) = table {
            table.destroy(&self.engine, &self.pools, &*self.ectx.log);
        }
        Ok(())
    }

    /// Grow a resizable table. Rules already inserted stay in the old
    /// matcher until moved with `async_update_resized`; once all are
    /// moved, `table_resize_complete` retires it.
    pub fn table_resize(
        &self,
        id: TableId,
        capacity: u32,
    ) -> Result<(), FlowError> {
        let table = self.table(id)?;
        table.resize(&self.engine, capacity)?;
        PortStats::incr(&self.stats.table_resize);
        self.log(LogLevel::Note, &format!("{id} resizing to {capacity}"));
        Ok(())
    }

    pub fn table_resize_complete(&self, id: TableId) -> Result<(), FlowError> {
        self.table(id)?.resize_complete(&self.engine)
    }

    // ================================================================
    // Meter profiles and flex parsers
    // ================================================================

    pub fn meter_profile_add(
        &self,
        id: MeterProfileId,
        profile: MeterProfile,
    ) -> Result<(), FlowError> {
        self.pools.meters()?;
        self.pools.profiles.add(id, profile)
    }

    pub fn meter_profile_delete(
        &self,
        id: MeterProfileId,
    ) -> Result<(), FlowError> {
        self.pools.profiles.delete(id)
    }

    pub fn flex_item_create(
        &self,
        conf: FlexItemConf,
    ) -> Result<FlexHandle, FlowError> {
        self.parsers.create(conf)
    }

    pub fn flex_item_release(
        &self,
        handle: FlexHandle,
    ) -> Result<(), FlowError> {
        self.parsers.release(handle)
    }

    // ================================================================
    // Aging
    // ================================================================

    /// Advance every aging record by `elapsed` seconds, returning how
    /// many aged out. A record whose counters saw traffic since the
    /// last scan restarts instead.
    pub fn age_scan(&self, elapsed: u32) -> Result<u32, FlowError> {
        let counters = self.pools.counters()?;
        let ages = self.pools.ages()?;

        let mut hits: BTreeMap<u32, u64> = BTreeMap::new();
        for (id, age) in counters.tagged() {
            let (pkts, _) = self
                .engine
                .counter_query(counters.bulk(), CounterPool::offset(id))?;
            let sum = hits.entry(age).or_default();
            *sum = sum.wrapping_add(pkts);
        }

        let aged = ages.scan(&hits, elapsed);
        PortStats::add(&self.stats.aged, u64::from(aged));
        *self.last_scan.lock() = Moment::now();
        Ok(aged)
    }

    /// Scan with the time elapsed since the previous scan.
    pub fn age_tick(&self) -> Result<u32, FlowError> {
        let elapsed = Moment::now().delta_as_secs(*self.last_scan.lock());
        if elapsed == 0 {
            return Ok(0);
        }
        self.age_scan(elapsed)
    }

    /// Report up to `max` aged flows by their aging context. In strict
    /// queue mode only the records created on `queue` are reported.
    pub fn get_aged_flows(
        &self,
        queue: u16,
        max: usize,
    ) -> Result<Vec<u64>, FlowError> {
        self.check_queue(queue)?;
        Ok(self.pools.ages()?.take_aged(queue, max))
    }

    // ================================================================
    // Completions
    // ================================================================

    /// Ring the doorbell of `queue`, making every postponed submission
    /// visible to the hardware.
    pub fn push(&self, queue: u16) -> Result<(), FlowError> {
        self.check_queue(queue)?;
        let mut jq = self.queues[usize::from(queue)].lock();
        self.engine.queue_drain(queue)?;
        jq.pushed();
        Ok(())
    }

    /// Retire up to `max` completed operations of `queue`, in
    /// submission order.
    pub fn pull(
        &self,
        queue: u16,
        max: usize,
    ) -> Result<Vec<OpResult>, FlowError> {
        self.check_queue(queue)?;
        let jobs = self.process(queue, max)?;
        Ok(jobs
            .into_iter()
            .map(|job| OpResult {
                status: if job.is_ok() {
                    OpStatus::Success
                } else {
                    OpStatus::Error
                },
                user_data: job.user_data,
                query: job.query,
            })
            .collect())
    }

    /// Collect the engine's completions for `queue`, then retire and
    /// apply up to `max` finished jobs.
    fn process(&self, queue: u16, max: usize) -> Result<Vec<Job>, FlowError> {
        let jobs = {
            let mut jq = self.queues[usize::from(queue)].lock();
            let mut done = Vec::new();
            loop {
                let n = self.engine.queue_poll(queue, &mut done, POLL_BURST)?;
                if n < POLL_BURST {
                    break;
                }
            }
            for c in done {
                self.completion(&mut jq, c);
            }
            jq.retire(max)
        };

        for job in &jobs {
            self.apply(queue, job);
        }
        PortStats::add(&self.stats.completions, jobs.len() as u64);
        Ok(jobs)
    }

    fn completion(&self, jq: &mut JobQueue, c: HwCompletion) {
        if let Some((op, idx, generation)) = parse_internal(c.token) {
            match op {
                InternalOp::MeterInit => {
                    self.meter_init_done(idx, generation, &c)
                }
            }
            return;
        }

        if !c.is_ok() {
            PortStats::incr(&self.stats.hw_error);
        }
        if !jq.complete(c.token, c.status, c.ct) {
            self.log(
                LogLevel::Warn,
                &format!(
                    "queue {}: completion for unknown token {:#x}",
                    jq.queue(),
                    c.token
                ),
            );
        }
    }

    fn meter_init_done(&self, idx: u32, generation: u32, c: &HwCompletion) {
        let Ok(meters) = self.pools.meters() else {
            return;
        };
        // The rule may already be gone, and its meter reused.
        let current = meters.generation(idx);
        if !current.is_some_and(|g| same_generation(generation, g)) {
            return;
        }
        if meters.state(idx) != AsoState::WaitInit {
            return;
        }
        if c.is_ok() {
            meters.set_state(idx, AsoState::Ready);
        } else {
            PortStats::incr(&self.stats.hw_error);
            meters.set_state(idx, AsoState::Error);
            self.log(
                LogLevel::Warn,
                &format!("meter {idx} init failed: status {}", c.status),
            );
        }
    }

    /// Carry out what a retired job means for port state.
    fn apply(&self, queue: u16, job: &Job) {
        let effect = job.kind.complete(job.is_ok());
        match job.target {
            JobTarget::Flow { table, rule_idx } => {
                match self.table(table) {
                    Ok(t) => self.apply_flow(queue, &t, rule_idx, effect),
                    Err(_) => self.log(
                        LogLevel::Warn,
                        &format!("{} completion for missing {table}", job.kind),
                    ),
                }
            }

            JobTarget::Indirect(h) => {
                let state = match effect {
                    JobEffect::AsoReady => AsoState::Ready,
                    JobEffect::AsoError => AsoState::Error,
                    _ => return,
                };
                match h.kind {
                    IndirectKind::MeterMark => {
                        if let Ok(meters) = self.pools.meters() {
                            meters.set_state(h.index, state);
                        }
                    }
                    IndirectKind::Conntrack => {
                        if let Ok(cts) = self.pools.cts() {
                            cts.set_state(h.index, state);
                        }
                    }
                    IndirectKind::Count | IndirectKind::Age => {}
                }
            }

            JobTarget::None => {}
        }
    }

    /// Hand a job to the control queue and poll until it retires.
    ///
    /// `submit` receives the job's token and queues the hardware
    /// operation; a job created already finished needs no submit.
    fn sync_job(
        &self,
        job: Job,
        submit: impl FnOnce(u16, u64) -> Result<(), FlowError>,
    ) -> Result<Job, FlowError> {
        let ctrl = self.ctrl_queue();
        let _guard = self.ctrl.lock();

        let token = {
            let mut jq = self.queues[usize::from(ctrl)].lock();
            let pending = job.status.is_none();
            let token = jq.alloc(job)?;
            if pending {
                let res = submit(ctrl, token)
                    .and_then(|()| Ok(self.engine.queue_drain(ctrl)?));
                if let Err(e) = res {
                    jq.cancel(token);
                    return Err(e);
                }
            }
            token
        };

        for _ in 0..SYNC_RETRY_BUDGET {
            let jobs = self.process(ctrl, usize::MAX)?;
            // Earlier jobs left behind by a timed-out call retire
            // first; ours is the last one submitted.
            if let Some(job) = jobs.into_iter().last()
                && self.queues[usize::from(ctrl)].lock().is_empty()
            {
                return Ok(job);
            }
            core::hint::spin_loop();
        }

        Err(FlowError::Timeout(format!("control job {token:#x}")))
    }

    // ================================================================
    // Dumps
    // ================================================================

    pub fn dump_tables(&self) -> Vec<TableDump> {
        self.tables.read().values().map(|t| t.dump()).collect()
    }

    pub fn dump_templates(&self) -> Vec<TemplateDump> {
        let mut out: Vec<_> =
            self.pts.lock().values().map(|p| p.dump()).collect();
        out.extend(self.ats.lock().values().map(|a| a.dump()));
        out
    }

    pub fn dump_pools(&self) -> Vec<PoolDump> {
        let mut out = self.pools.dump();
        out.push(PoolDump {
            name: "mirror".into(),
            capacity: 0,
            live: self.pools.mirrors.len() as u32,
        });
        out
    }

    pub fn dump_queues(&self) -> Vec<QueueDump> {
        self.queues.iter().map(|q| q.lock().dump()).collect()
    }

    pub fn stats(&self) -> PortStatsSnapshot {
        self.stats.snapshot()
    }

    /// Ring every queue's doorbell and retire what completes, so that
    /// in-flight rules settle before they are flushed.
    fn quiesce(&self) {
        for q in 0..=self.ctrl_queue() {
            let mut jq = self.queues[usize::from(q)].lock();
            if let Err(e) = self.engine.queue_drain(q) {
                self.log(LogLevel::Warn, &format!("queue {q}: {e}"));
                continue;
            }
            jq.pushed();
            drop(jq);

            for _ in 0..SYNC_RETRY_BUDGET {
                if let Err(e) = self.process(q, usize::MAX) {
                    self.log(LogLevel::Warn, &format!("queue {q}: {e}"));
                    break;
                }
                if self.queues[usize::from(q)].lock().is_empty() {
                    break;
                }
                core::hint::spin_loop();
            }
        }
    }

    /// Remove a rule from the hardware outside of any job, discarding
    /// the completion.
    fn abandon_rule(&self, ctrl: u16, flow: &Flow) {
        if let Err(e) = self.engine.rule_destroy(ctrl, flow.hw, 0, false) {
            self.log(LogLevel::Warn, &format!("rule {}: {e}", flow.hw.0));
            return;
        }
        let mut done = Vec::new();
        loop {
            match self.engine.queue_poll(ctrl, &mut done, POLL_BURST) {
                Ok(n) if n == POLL_BURST => done.clear(),
                Ok(_) => break,
                Err(e) => {
                    self.log(LogLevel::Warn, &format!("queue {ctrl}: {e}"));
                    break;
                }
            }
        }
    }

    /// Release everything the port holds. Outstanding jobs on every
    /// queue are pushed and retired first; a rule that still cannot be
    /// destroyed through a job is removed from the hardware directly.
    /// Dropping the port shuts it down too.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.quiesce();
        match self.flush() {
            Ok(0) => {}
            Ok(n) => self.log(LogLevel::Note, &format!("flushed {n} rules")),
            Err(e) => self.log(LogLevel::Warn, &format!("flush: {e}")),
        }

        let ctrl = self.ctrl_queue();
        let tables: Vec<_> =
            core::mem::take(&mut *self.tables.write()).into_values().collect();
        for table in &tables {
            for idx in table.rule_indexes() {
                let flow = table.with_flow(idx, Option::take).flatten();
                if let Some(mut flow) = flow {
                    let msg =
                        format!("{}/{idx} abandoned {}", table.id, flow.state);
                    self.log(LogLevel::Warn, &msg);
                    self.abandon_rule(ctrl, &flow);
                    flow.res.release(&self.engine, &self.pools, ctrl);
                    if let Some(mut upd) = flow.update.take() {
                        upd.res.release(&self.engine, &self.pools, ctrl);
                    }
                }
                table.rule_free(ctrl, idx);
            }
        }
        for table in tables.iter().rev() {
            table.destroy(&self.engine, &self.pools, &*self.ectx.log);
        }

        let ats = core::mem::take(&mut *self.ats.lock());
        for at in ats.into_values().rev() {
            if let Err(e) = self.engine.action_template_destroy(at.hw) {
                self.log(LogLevel::Warn, &format!("{}: {e}", at.id));
            }
        }
        let pts = core::mem::take(&mut *self.pts.lock());
        for pt in pts.into_values().rev() {
            self.destroy_pattern(&pt);
        }

        for h in self.pools.mirrors.handles() {
            if let Err(e) =
                self.pools.mirrors.destroy(&self.engine, &self.pools.cache, h)
            {
                self.log(LogLevel::Warn, &format!("{h}: {e}"));
            }
        }
        self.pools.destroy(&self.engine, &*self.ectx.log);
    }
}

impl<E: SteeringEngine> Drop for Port<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(any(feature = "test-help", test))]
impl<E: SteeringEngine> Port<E> {
    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn table_ref(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables.read().get(&id).cloned()
    }

    pub fn pattern_template(
        &self,
        id: PatternTemplateId,
    ) -> Option<Arc<PatternTemplate>> {
        self.pts.lock().get(&id).cloned()
    }

    pub fn actions_template(
        &self,
        id: ActionsTemplateId,
    ) -> Option<Arc<ActionTemplate>> {
        self.ats.lock().get(&id).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Action;
    use crate::api::EthItem;
    use crate::api::FlowDir;
    use crate::api::Item;
    use crate::engine::soft::SoftEngine;
    use crate::engine::soft::SoftOp;
    use crate::provider::CaptureLog;
    use crate::provider::NullLog;

    fn port(cfg: PortConfig) -> Port<SoftEngine> {
        Port::configure(SoftEngine::new(), cfg, ExecCtx::new(CaptureLog::new()))
            .unwrap()
    }

    fn eth() -> Vec<PatternItem> {
        vec![PatternItem::any(Item::Eth(EthItem::default()))]
    }

    #[test]
    fn configure_checks_queues() {
        let cfg = PortConfig { nb_queues: 0, ..Default::default() };
        let res =
            Port::configure(SoftEngine::new(), cfg, ExecCtx::new(NullLog));
        assert!(matches!(res, Err(FlowError::InvalidAttr(_))));

        let eng = SoftEngine::new();
        eng.fail_next(SoftOp::Configure, -libc::EIO);
        let cfg = PortConfig::default();
        let err = Port::configure(eng, cfg, ExecCtx::new(NullLog)).err();
        assert_eq!(err.map(|e| e.status()), Some(-libc::EIO));
    }

    #[test]
    fn templates_refcounted_by_tables() {
        let p = port(PortConfig::default());
        let attr = TemplateAttr::new(FlowDir::INGRESS);
        let pt = p.pattern_template_create(attr, &eth()).unwrap();
        let at = p
            .actions_template_create(attr, &[ActionSpec::fixed(Action::Drop)])
            .unwrap();
        let tbl = p
            .table_create(TableAttr::new(1, FlowDir::INGRESS, 8), &[pt], &[at])
            .unwrap();

        assert!(matches!(
            p.pattern_template_destroy(pt),
            Err(FlowError::InUse(_))
        ));
        assert!(matches!(
            p.actions_template_destroy(at),
            Err(FlowError::InUse(_))
        ));

        p.table_destroy(tbl).unwrap();
        p.pattern_template_destroy(pt).unwrap();
        p.actions_template_destroy(at).unwrap();
        assert!(p.dump_templates().is_empty());
        assert!(matches!(
            p.table_destroy(tbl),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn user_queues_only() {
        let p = port(PortConfig { nb_queues: 2, ..Default::default() });
        assert_eq!(p.ctrl_queue(), 2);
        assert_eq!(p.push(2), Err(FlowError::BadQueue(2)));
        assert_eq!(p.pull(7, 1), Err(FlowError::BadQueue(7)));
        assert!(p.pull(1, 8).unwrap().is_empty());
        assert_eq!(p.dump_queues().len(), 3);
    }

    #[test]
    fn shutdown_releases_everything() {
        let p = port(PortConfig::default());
        let attr = TemplateAttr::new(FlowDir::INGRESS);
        let pt = p.pattern_template_create(attr, &eth()).unwrap();
        let at = p
            .actions_template_create(attr, &[ActionSpec::fixed(Action::Drop)])
            .unwrap();
        let tbl = p
            .table_create(TableAttr::new(1, FlowDir::INGRESS, 8), &[pt], &[at])
            .unwrap();
        let spec = RuleSpec {
            pt_idx: 0,
            items: &[Item::Eth(EthItem::default())],
            at_idx: 0,
            actions: &[Action::Drop],
        };
        let mut p = p;
        p.async_create(0, crate::api::OpAttr::NOW, tbl, &spec, 1).unwrap();

        p.shutdown();
        assert_eq!(p.engine().object_count(), 0);
        assert_eq!(p.engine().rule_count(), 0);
        assert_eq!(p.engine().matcher_count(), 0);
        assert!(p.dump_tables().is_empty());
    }

    #[test]
    fn shutdown_settles_unpushed_rules() {
        let mut p = port(PortConfig::default());
        let attr = TemplateAttr::new(FlowDir::INGRESS);
        let pt = p.pattern_template_create(attr, &eth()).unwrap();
        let at = p
            .actions_template_create(attr, &[ActionSpec::fixed(Action::Drop)])
            .unwrap();
        let tbl = p
            .table_create(TableAttr::new(1, FlowDir::INGRESS, 8), &[pt], &[at])
            .unwrap();
        let spec = RuleSpec {
            pt_idx: 0,
            items: &[Item::Eth(EthItem::default())],
            at_idx: 0,
            actions: &[Action::Drop],
        };
        let postpone = crate::api::OpAttr::POSTPONE;
        p.async_create(0, postpone, tbl, &spec, 1).unwrap();
        p.async_create(1, postpone, tbl, &spec, 2).unwrap();
        assert_eq!(p.engine().held(0), 1);
        assert_eq!(p.engine().held(1), 1);

        p.shutdown();
        assert_eq!(p.engine().held(0), 0);
        assert_eq!(p.engine().held(1), 0);
        assert_eq!(p.engine().rule_count(), 0);
        assert_eq!(p.engine().matcher_count(), 0);
        assert_eq!(p.engine().object_count(), 0);
    }
}
