// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Flow rule operations.
//!
//! Every asynchronous rule operation claims the rule's slot by moving
//! it out of `Live` before anything is submitted, so a rule has at
//! most one operation in flight. A refused submission puts the slot
//! back as it was.

use super::Port;
use crate::api::Action;
use crate::api::FlowError;
use crate::api::FlowHandle;
use crate::api::InsertionType;
use crate::api::Item;
use crate::api::OpAttr;
use crate::api::QueryAction;
use crate::api::QueryData;
use crate::api::TableId;
use crate::engine::construct;
use crate::engine::construct::Constructor;
use crate::engine::flow::Flow;
use crate::engine::flow::FlowFlags;
use crate::engine::flow::FlowState;
use crate::engine::flow::PendingUpdate;
use crate::engine::flow::Resources;
use crate::engine::job::Job;
use crate::engine::job::JobEffect;
use crate::engine::job::JobKind;
use crate::engine::job::JobQueue;
use crate::engine::job::JobTarget;
use crate::engine::stat::PortStats;
use crate::engine::steering::RuleActions;
use crate::engine::steering::RuleHandle;
use crate::engine::steering::RuleRequest;
use crate::engine::steering::SteeringEngine;
use crate::engine::table::Table;
use crate::engine::table::TableMap;
use crate::provider::LogLevel;
use crate::sys::sync::KMutexGuard;
use alloc::vec::Vec;

/// The concrete values of one rule.
#[derive(Clone, Copy, Debug)]
pub struct RuleSpec<'a> {
    /// The pattern template, by its index in the table.
    pub pt_idx: u8,
    /// The rule's items, without the ones the port supplies itself.
    pub items: &'a [Item],
    /// The action template, by its index in the table.
    pub at_idx: u8,
    pub actions: &'a [Action],
}

/// The rule a create call inserts.
struct CreateReq<'a> {
    /// The index of an index-based insertion.
    by_index: Option<u32>,
    spec: &'a RuleSpec<'a>,
    /// The items to match, after the insertion type is applied.
    items: &'a [Item],
}

/// What a finished job leaves to be given back.
enum Leftover {
    /// The whole rule.
    Flow(Flow),
    /// One generation of its resources.
    Res(Resources, u32),
}

/// The age context of a rule whose AGE action names none.
fn age_context(table: TableId, rule_idx: u32) -> u64 {
    (u64::from(table.0) << 32) | u64::from(rule_idx)
}

fn no_pt() -> FlowError {
    FlowError::item(0, "no such pattern template")
}

fn no_at() -> FlowError {
    FlowError::action(0, "no such actions template")
}

impl<E: SteeringEngine> Port<E> {
    /// Lock `queue`, refusing if it has no free descriptor.
    pub(super) fn job_queue(
        &self,
        queue: u16,
    ) -> Result<KMutexGuard<'_, JobQueue>, FlowError> {
        let jq = self.queues[usize::from(queue)].lock();
        if jq.is_full() {
            PortStats::incr(&self.stats.queue_full);
            return Err(FlowError::QueueFull { queue });
        }
        Ok(jq)
    }

    fn constructor<'a>(
        &'a self,
        tables: &'a TableMap,
        table: &Table,
        queue: u16,
        rule_idx: u32,
        attr: OpAttr,
    ) -> Constructor<'a, E> {
        Constructor {
            engine: &self.engine,
            pools: &self.pools,
            cfg: &self.cfg,
            tables,
            queue,
            dir: table.attr.dir,
            age_context: age_context(table.id, rule_idx),
            postpone: attr.postpone,
        }
    }

    /// Build the actions of `at_idx` into resource index `res_idx`.
    fn build_actions(
        &self,
        ctor: &Constructor<'_, E>,
        table: &Table,
        res_idx: u32,
        at_idx: u8,
        actions: &[Action],
    ) -> Result<(RuleActions, Resources), FlowError> {
        let at = table.ats.get(usize::from(at_idx)).ok_or_else(no_at)?;
        let compiled = table.compiled();
        let ca = compiled.get(usize::from(at_idx)).ok_or_else(no_at)?;
        let seg = if ca.needs_segment() {
            table.segment(res_idx, at_idx)
        } else {
            None
        };
        ctor.build(&at.layout, ca, actions, seg)
    }

    /// Enqueue the creation of a rule in a pattern-inserted table.
    pub fn async_create(
        &self,
        queue: u16,
        attr: OpAttr,
        table: TableId,
        spec: &RuleSpec<'_>,
        user_data: u64,
    ) -> Result<FlowHandle, FlowError> {
        self.check_queue(queue)?;
        let tables = self.tables.read();
        let t = tables
            .get(&table)
            .ok_or_else(|| FlowError::NotFound(format!("{table}")))?;
        if t.attr.insertion.is_by_index() {
            return Err(FlowError::InvalidAttr(format!(
                "{table} inserts by index"
            )));
        }
        let req = CreateReq { by_index: None, spec, items: spec.items };
        self.create(queue, attr, &tables, t, req, user_data)
    }

    /// Enqueue the creation of a rule at `rule_idx` of an index-based
    /// table. A table inserting by index alone ignores `spec.items`
    /// and matches with its pattern template as given.
    pub fn async_create_by_index(
        &self,
        queue: u16,
        attr: OpAttr,
        table: TableId,
        rule_idx: u32,
        spec: &RuleSpec<'_>,
        user_data: u64,
    ) -> Result<FlowHandle, FlowError> {
        self.check_queue(queue)?;
        let tables = self.tables.read();
        let t = tables
            .get(&table)
            .ok_or_else(|| FlowError::NotFound(format!("{table}")))?;

        let fixed: Vec<Item>;
        let items = match t.attr.insertion {
            InsertionType::Pattern => {
                return Err(FlowError::InvalidAttr(format!(
                    "{table} inserts by pattern"
                )));
            }
            InsertionType::Index => {
                let pt =
                    t.pts.get(usize::from(spec.pt_idx)).ok_or_else(no_pt)?;
                fixed = pt.layout.items[pt.layout.implicit..]
                    .iter()
                    .map(|i| i.spec.clone())
                    .collect();
                &fixed[..]
            }
            InsertionType::IndexWithPattern => spec.items,
        };

        let req = CreateReq { by_index: Some(rule_idx), spec, items };
        self.create(queue, attr, &tables, t, req, user_data)
    }

    fn create(
        &self,
        queue: u16,
        attr: OpAttr,
        tables: &TableMap,
        table: &Table,
        req: CreateReq<'_>,
        user_data: u64,
    ) -> Result<FlowHandle, FlowError> {
        let spec = req.spec;
        let pt = table.pts.get(usize::from(spec.pt_idx)).ok_or_else(no_pt)?;
        let at = table.ats.get(usize::from(spec.at_idx)).ok_or_else(no_at)?;
        let hw_items = pt.layout.rule_items(&self.cfg, req.items)?;
        construct::validate(&at.layout, spec.actions)?;

        let mut jq = self.job_queue(queue)?;

        let rule_idx = match req.by_index {
            Some(idx) => table.rule_alloc_at(idx)?,
            None => table.rule_alloc(queue)?,
        };
        let res_idx = match table.res_alloc(queue, rule_idx) {
            Ok(idx) => idx,
            Err(e) => {
                table.rule_free(queue, rule_idx);
                return Err(e);
            }
        };
        let free_idx = || {
            table.res_free(queue, res_idx);
            table.rule_free(queue, rule_idx);
        };

        let (sel, matcher, _) = match table.active() {
            Ok(active) => active,
            Err(e) => {
                free_idx();
                return Err(e);
            }
        };

        let ctor = self.constructor(tables, table, queue, rule_idx, attr);
        let built = self.build_actions(
            &ctor,
            table,
            res_idx,
            spec.at_idx,
            spec.actions,
        );
        let (acts, mut res) = match built {
            Ok(built) => built,
            Err(e) => {
                free_idx();
                return Err(e);
            }
        };

        let target = JobTarget::Flow { table: table.id, rule_idx };
        let job = Job::new(JobKind::RuleCreate, target, user_data);
        let token = match jq.alloc(job) {
            Ok(token) => token,
            Err(e) => {
                res.release(&self.engine, &self.pools, queue);
                free_idx();
                return Err(e);
            }
        };

        // Counted from submission so that a resize cannot retire the
        // matcher under a rule still being created.
        table.rule_added(sel);

        let hw_req = RuleRequest {
            queue,
            matcher,
            mt_idx: spec.pt_idx,
            items: &hw_items,
            at_idx: spec.at_idx,
            actions: &acts,
            rule_idx: req.by_index,
            token,
            burst: attr.postpone,
        };
        let hw = match self.engine.rule_create(&hw_req) {
            Ok(hw) => hw,
            Err(e) => {
                PortStats::incr(&self.stats.hw_error);
                jq.cancel(token);
                table.rule_removed(sel);
                res.release(&self.engine, &self.pools, queue);
                free_idx();
                return Err(e.into());
            }
        };

        let flow = Flow {
            rule_idx,
            res_idx,
            pt_idx: spec.pt_idx,
            at_idx: spec.at_idx,
            hw,
            queue,
            selector: sel,
            state: FlowState::Creating,
            res,
            update: None,
            user_data,
        };
        table.with_flow(rule_idx, |slot| *slot = Some(flow));

        if attr.postpone {
            jq.postponed();
        }
        PortStats::incr(&self.stats.rule_create);
        Ok(FlowHandle { table: table.id, rule_idx })
    }

    /// Move a live rule into `state`, returning its hardware handle and
    /// matcher slot.
    fn claim(
        &self,
        table: &Table,
        rule_idx: u32,
        state: FlowState,
    ) -> Result<(RuleHandle, u8), FlowError> {
        let missing =
            || FlowError::NotFound(format!("{}/{rule_idx}", table.id));
        table
            .with_flow(rule_idx, |slot| {
                let flow = slot.as_mut().ok_or_else(missing)?;
                check_state!(flow.state, [FlowState::Live])?;
                flow.state = state;
                Ok((flow.hw, flow.selector))
            })
            .unwrap_or_else(|| Err(missing()))
    }

    fn unclaim(&self, table: &Table, rule_idx: u32) {
        table.with_flow(rule_idx, |slot| {
            if let Some(flow) = slot.as_mut() {
                flow.state = FlowState::Live;
            }
        });
    }

    /// Enqueue the replacement of a rule's actions with those of action
    /// template `at_idx`. The old resources are released once the
    /// update completes.
    pub fn async_update(
        &self,
        queue: u16,
        attr: OpAttr,
        flow: FlowHandle,
        at_idx: u8,
        actions: &[Action],
        user_data: u64,
    ) -> Result<(), FlowError> {
        self.check_queue(queue)?;
        let tables = self.tables.read();
        let table = tables
            .get(&flow.table)
            .ok_or_else(|| FlowError::NotFound(format!("{}", flow.table)))?;
        if !table.attr.updatable {
            return Err(FlowError::InvalidAttr(format!(
                "{} is not updatable",
                flow.table
            )));
        }
        let at = table.ats.get(usize::from(at_idx)).ok_or_else(no_at)?;
        construct::validate(&at.layout, actions)?;

        let mut jq = self.job_queue(queue)?;
        let (hw, _) = self.claim(table, flow.rule_idx, FlowState::Updating)?;

        let res_idx = match table.res_alloc(queue, flow.rule_idx) {
            Ok(idx) => idx,
            Err(e) => {
                self.unclaim(table, flow.rule_idx);
                return Err(e);
            }
        };
        let undo = |res: Option<&mut Resources>| {
            if let Some(res) = res {
                res.release(&self.engine, &self.pools, queue);
            }
            table.res_free(queue, res_idx);
            self.unclaim(table, flow.rule_idx);
        };

        let ctor =
            self.constructor(&tables, table, queue, flow.rule_idx, attr);
        let built = self.build_actions(&ctor, table, res_idx, at_idx, actions);
        let (acts, mut res) = match built {
            Ok(built) => built,
            Err(e) => {
                undo(None);
                return Err(e);
            }
        };

        let target =
            JobTarget::Flow { table: flow.table, rule_idx: flow.rule_idx };
        let job = Job::new(JobKind::RuleUpdate, target, user_data);
        let token = match jq.alloc(job) {
            Ok(token) => token,
            Err(e) => {
                undo(Some(&mut res));
                return Err(e);
            }
        };

        if let Err(e) = self.engine.rule_action_update(
            queue,
            hw,
            at_idx,
            &acts,
            token,
            attr.postpone,
        ) {
            PortStats::incr(&self.stats.hw_error);
            jq.cancel(token);
            undo(Some(&mut res));
            return Err(e.into());
        }

        table.with_flow(flow.rule_idx, |slot| {
            if let Some(f) = slot.as_mut() {
                f.update = Some(PendingUpdate { at_idx, res_idx, res });
            }
        });
        if attr.postpone {
            jq.postponed();
        }
        PortStats::incr(&self.stats.rule_update);
        Ok(())
    }

    /// Enqueue the move of a rule into the matcher its table resized
    /// to. A rule already there completes at once.
    pub fn async_update_resized(
        &self,
        queue: u16,
        attr: OpAttr,
        flow: FlowHandle,
        user_data: u64,
    ) -> Result<(), FlowError> {
        self.check_queue(queue)?;
        let table = self.table(flow.table)?;

        let mut jq = self.job_queue(queue)?;
        let (hw, sel) =
            self.claim(&table, flow.rule_idx, FlowState::Moving)?;

        if sel == table.selector() {
            self.unclaim(&table, flow.rule_idx);
            let job = Job::new(JobKind::RuleMove, JobTarget::None, user_data);
            jq.alloc(job.done(None))?;
            return Ok(());
        }

        let target =
            JobTarget::Flow { table: flow.table, rule_idx: flow.rule_idx };
        let job = Job::new(JobKind::RuleMove, target, user_data);
        let token = match jq.alloc(job) {
            Ok(token) => token,
            Err(e) => {
                self.unclaim(&table, flow.rule_idx);
                return Err(e);
            }
        };
        if let Err(e) = self.engine.rule_move(queue, hw, token, attr.postpone)
        {
            PortStats::incr(&self.stats.hw_error);
            jq.cancel(token);
            self.unclaim(&table, flow.rule_idx);
            return Err(e.into());
        }

        if attr.postpone {
            jq.postponed();
        }
        PortStats::incr(&self.stats.rule_move);
        Ok(())
    }

    /// Enqueue the destruction of a rule. Its resources return to
    /// their pools when the destruction completes.
    pub fn async_destroy(
        &self,
        queue: u16,
        attr: OpAttr,
        flow: FlowHandle,
        user_data: u64,
    ) -> Result<(), FlowError> {
        self.check_queue(queue)?;
        let table = self.table(flow.table)?;

        let mut jq = self.job_queue(queue)?;
        let (hw, _) =
            self.claim(&table, flow.rule_idx, FlowState::Destroying)?;

        let target =
            JobTarget::Flow { table: flow.table, rule_idx: flow.rule_idx };
        let job = Job::new(JobKind::RuleDestroy, target, user_data);
        let token = match jq.alloc(job) {
            Ok(token) => token,
            Err(e) => {
                self.unclaim(&table, flow.rule_idx);
                return Err(e);
            }
        };
        if let Err(e) =
            self.engine.rule_destroy(queue, hw, token, attr.postpone)
        {
            PortStats::incr(&self.stats.hw_error);
            jq.cancel(token);
            self.unclaim(&table, flow.rule_idx);
            return Err(e.into());
        }

        if attr.postpone {
            jq.postponed();
        }
        PortStats::incr(&self.stats.rule_destroy);
        Ok(())
    }

    /// Read a rule's counter or aging state.
    pub fn query(
        &self,
        flow: FlowHandle,
        action: QueryAction,
    ) -> Result<QueryData, FlowError> {
        let table = self.table(flow.table)?;
        let (counter, age) = table
            .with_flow(flow.rule_idx, |slot| {
                slot.as_ref().map(|f| (f.res.counter, f.res.age))
            })
            .flatten()
            .ok_or_else(|| FlowError::NotFound(format!("{flow}")))?;

        let missing = || FlowError::NotFound(format!("{flow} {action}"));
        match action {
            QueryAction::Count { reset } => {
                let id = counter.ok_or_else(missing)?;
                let (hits, bytes) =
                    self.pools.counters()?.query(&self.engine, id, reset)?;
                Ok(QueryData::Count { hits, bytes })
            }
            QueryAction::Age => {
                let idx = age.ok_or_else(missing)?;
                self.pools.ages()?.query(idx)
            }
        }
    }

    /// The hash the table's matcher computes for a rule with `items`.
    pub fn hash(
        &self,
        table: TableId,
        pt_idx: u8,
        items: &[Item],
    ) -> Result<u32, FlowError> {
        let t = self.table(table)?;
        let pt = t.pts.get(usize::from(pt_idx)).ok_or_else(no_pt)?;
        let hw_items = pt.layout.rule_items(&self.cfg, items)?;
        let (_, matcher, _) = t.active()?;
        Ok(self.engine.rule_hash(matcher, pt_idx, &hw_items)?)
    }

    /// Synchronously destroy every live rule, returning how many were
    /// destroyed. Rules with an operation in flight are left alone.
    pub fn flush(&self) -> Result<u32, FlowError> {
        let tables: Vec<_> = self.tables.read().values().cloned().collect();
        let mut n = 0;
        for table in &tables {
            for idx in table.rule_indexes() {
                let Ok((hw, _)) =
                    self.claim(table, idx, FlowState::Destroying)
                else {
                    continue;
                };

                let target =
                    JobTarget::Flow { table: table.id, rule_idx: idx };
                let job = Job::new(JobKind::RuleDestroy, target, 0);
                let res = self.sync_job(job, |ctrl, token| {
                    Ok(self.engine.rule_destroy(ctrl, hw, token, false)?)
                });
                match res {
                    Ok(job) if job.is_ok() => n += 1,
                    Ok(job) => self.log(
                        LogLevel::Warn,
                        &format!(
                            "flush {}/{idx}: status {}",
                            table.id,
                            job.status.unwrap_or_default()
                        ),
                    ),
                    // A timed-out destroy retires on a later call.
                    Err(e @ FlowError::Timeout(_)) => return Err(e),
                    Err(e) => {
                        self.unclaim(table, idx);
                        return Err(e);
                    }
                }
            }
        }
        Ok(n)
    }

    /// Apply the effect of a finished rule job.
    pub(super) fn apply_flow(
        &self,
        queue: u16,
        table: &Table,
        rule_idx: u32,
        effect: JobEffect,
    ) {
        let leftover = table.with_flow(rule_idx, |slot| {
            match effect {
                JobEffect::DiscardFlow | JobEffect::ReleaseFlow => {
                    if effect == JobEffect::DiscardFlow {
                        PortStats::incr(&self.stats.rule_create_fail);
                    }
                    return slot.take().map(Leftover::Flow);
                }
                JobEffect::CommitFlow => {
                    PortStats::incr(&self.stats.rule_create_ok);
                }
                _ => {}
            }

            let f = slot.as_mut()?;
            f.state = FlowState::Live;
            match effect {
                JobEffect::SwapResources => {
                    let upd = f.update.take()?;
                    let res = core::mem::replace(&mut f.res, upd.res);
                    let idx = core::mem::replace(&mut f.res_idx, upd.res_idx);
                    f.at_idx = upd.at_idx;
                    Some(Leftover::Res(res, idx))
                }
                JobEffect::DiscardUpdate => {
                    let upd = f.update.take()?;
                    Some(Leftover::Res(upd.res, upd.res_idx))
                }
                JobEffect::SwitchMatcher => {
                    let new = table.selector();
                    table.rule_added(new);
                    table.rule_removed(f.selector);
                    f.selector = new;
                    None
                }
                _ => None,
            }
        });

        match leftover.flatten() {
            Some(Leftover::Flow(mut flow)) => {
                flow.res.release(&self.engine, &self.pools, queue);
                if let Some(mut upd) = flow.update.take() {
                    upd.res.release(&self.engine, &self.pools, queue);
                    table.res_free(queue, upd.res_idx);
                }
                table.rule_removed(flow.selector);
                table.res_free(queue, flow.res_idx);
                table.rule_free(queue, rule_idx);
            }
            Some(Leftover::Res(mut res, res_idx)) => {
                res.release(&self.engine, &self.pools, queue);
                table.res_free(queue, res_idx);
            }
            None => {}
        }
    }

    /// The current state of a rule.
    pub fn flow_state(&self, flow: FlowHandle) -> Option<FlowState> {
        let table = self.table(flow.table).ok()?;
        table
            .with_flow(flow.rule_idx, |slot| slot.as_ref().map(|f| f.state))
            .flatten()
    }

    /// The pools a rule holds entries in.
    pub fn flow_flags(&self, flow: FlowHandle) -> Option<FlowFlags> {
        let table = self.table(flow.table).ok()?;
        table
            .with_flow(flow.rule_idx, |slot| {
                slot.as_ref().map(|f| f.res.flags())
            })
            .flatten()
    }

    /// The engine's handle of a rule.
    pub fn flow_rule(&self, flow: FlowHandle) -> Option<RuleHandle> {
        let table = self.table(flow.table).ok()?;
        table
            .with_flow(flow.rule_idx, |slot| slot.as_ref().map(|f| f.hw))
            .flatten()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ExecCtx;
    use crate::api::ActionSpec;
    use crate::api::EthItem;
    use crate::api::FlowDir;
    use crate::api::Ipv4Item;
    use crate::api::OpStatus;
    use crate::api::PatternItem;
    use crate::api::PortConfig;
    use crate::api::TableAttr;
    use crate::api::TemplateAttr;
    use crate::engine::soft::SoftEngine;
    use crate::engine::soft::SoftOp;
    use crate::provider::NullLog;

    struct Fixture {
        port: Port<SoftEngine>,
        table: TableId,
    }

    fn fixture(cfg: PortConfig, tattr: TableAttr) -> Fixture {
        let port =
            Port::configure(SoftEngine::new(), cfg, ExecCtx::new(NullLog))
                .unwrap();
        let attr = TemplateAttr::new(FlowDir::INGRESS);
        let pt = port
            .pattern_template_create(
                attr,
                &[
                    PatternItem::any(Item::Eth(EthItem::default())),
                    PatternItem::any(Item::Ipv4(Ipv4Item::default())),
                ],
            )
            .unwrap();
        let count = port
            .actions_template_create(
                attr,
                &[
                    ActionSpec::per_rule(Action::Count { id: 0 }),
                    ActionSpec::fixed(Action::Drop),
                ],
            )
            .unwrap();
        let mark = port
            .actions_template_create(
                attr,
                &[
                    ActionSpec::per_rule(Action::Mark { id: 0 }),
                    ActionSpec::fixed(Action::Drop),
                ],
            )
            .unwrap();
        let table = port.table_create(tattr, &[pt], &[count, mark]).unwrap();
        Fixture { port, table }
    }

    fn default_fixture() -> Fixture {
        fixture(PortConfig::default(), TableAttr::new(1, FlowDir::INGRESS, 8))
    }

    fn items(last: u8) -> Vec<Item> {
        vec![
            Item::Eth(EthItem::default()),
            Item::Ipv4(Ipv4Item {
                dst: [10, 0, 0, last],
                ..Default::default()
            }),
        ]
    }

    fn count_drop() -> Vec<Action> {
        vec![Action::Count { id: 0 }, Action::Drop]
    }

    fn try_create(
        fx: &Fixture,
        queue: u16,
        last: u8,
        user_data: u64,
    ) -> Result<FlowHandle, FlowError> {
        let items = items(last);
        let actions = count_drop();
        let spec =
            RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &actions };
        fx.port.async_create(queue, OpAttr::NOW, fx.table, &spec, user_data)
    }

    fn create(fx: &Fixture, last: u8, user_data: u64) -> FlowHandle {
        try_create(fx, 0, last, user_data).unwrap()
    }

    #[test]
    fn create_commits_on_completion() {
        let fx = default_fixture();
        let fh = create(&fx, 1, 7);
        assert_eq!(fx.port.flow_state(fh), Some(FlowState::Creating));
        assert!(fx.port.flow_flags(fh).unwrap().contains(FlowFlags::COUNTER));

        let res = fx.port.pull(0, 8).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].status, OpStatus::Success);
        assert_eq!(res[0].user_data, 7);
        assert_eq!(fx.port.flow_state(fh), Some(FlowState::Live));
        assert_eq!(fx.port.stats().rule_create_ok, 1);
    }

    #[test]
    fn failed_completion_frees_everything() {
        let fx = default_fixture();
        fx.port.engine().fail_next(SoftOp::Completion, -libc::ENOSPC);
        let fh = create(&fx, 1, 1);

        let res = fx.port.pull(0, 8).unwrap();
        assert_eq!(res[0].status, OpStatus::Error);
        assert_eq!(fx.port.flow_state(fh), None);
        assert_eq!(fx.port.pools().counters().unwrap().live(), 0);
        assert_eq!(fx.port.table_ref(fx.table).unwrap().live_rules(), 0);
        assert_eq!(fx.port.stats().rule_create_fail, 1);
    }

    #[test]
    fn refused_submission_unwinds() {
        let fx = default_fixture();
        fx.port.engine().fail_next(SoftOp::RuleCreate, -libc::EINVAL);
        let err = try_create(&fx, 0, 1, 1).err();
        assert_eq!(err.map(|e| e.status()), Some(-libc::EINVAL));
        assert_eq!(fx.port.dump_queues()[0].inflight, 0);
        assert_eq!(fx.port.pools().counters().unwrap().live(), 0);
        assert_eq!(fx.port.table_ref(fx.table).unwrap().live_rules(), 0);
    }

    #[test]
    fn full_queue_is_reported() {
        let cfg = PortConfig { queue_size: 2, ..Default::default() };
        let fx = fixture(cfg, TableAttr::new(1, FlowDir::INGRESS, 8));
        create(&fx, 1, 1);
        create(&fx, 2, 2);
        assert_eq!(
            try_create(&fx, 0, 3, 3),
            Err(FlowError::QueueFull { queue: 0 })
        );
        assert_eq!(fx.port.stats().queue_full, 1);

        // Another queue is unaffected.
        assert!(try_create(&fx, 1, 3, 3).is_ok());
    }

    #[test]
    fn destroy_returns_resources() {
        let fx = default_fixture();
        let fh = create(&fx, 1, 1);
        fx.port.pull(0, 8).unwrap();

        fx.port.async_destroy(0, OpAttr::NOW, fh, 2).unwrap();
        assert_eq!(fx.port.flow_state(fh), Some(FlowState::Destroying));
        assert!(matches!(
            fx.port.async_destroy(0, OpAttr::NOW, fh, 3),
            Err(FlowError::BadState(_))
        ));

        let res = fx.port.pull(0, 8).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(fx.port.flow_state(fh), None);
        assert_eq!(fx.port.pools().counters().unwrap().live(), 0);
        assert_eq!(fx.port.engine().rule_count(), 0);
    }

    #[test]
    fn failed_destroy_keeps_rule() {
        let fx = default_fixture();
        let fh = create(&fx, 1, 1);
        fx.port.pull(0, 8).unwrap();

        fx.port.engine().fail_next(SoftOp::Completion, -libc::EIO);
        fx.port.async_destroy(0, OpAttr::NOW, fh, 2).unwrap();
        let res = fx.port.pull(0, 8).unwrap();
        assert_eq!(res[0].status, OpStatus::Error);
        assert_eq!(fx.port.flow_state(fh), Some(FlowState::Live));
    }

    #[test]
    fn postponed_until_push() {
        let fx = default_fixture();
        let items = items(1);
        let actions = count_drop();
        let spec =
            RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &actions };
        fx.port
            .async_create(0, OpAttr::POSTPONE, fx.table, &spec, 1)
            .unwrap();
        assert_eq!(fx.port.dump_queues()[0].pending, 1);
        assert!(fx.port.pull(0, 8).unwrap().is_empty());

        fx.port.push(0).unwrap();
        assert_eq!(fx.port.dump_queues()[0].pending, 0);
        assert_eq!(fx.port.pull(0, 8).unwrap().len(), 1);
    }

    #[test]
    fn update_swaps_resources() {
        let tattr = TableAttr {
            updatable: true,
            ..TableAttr::new(1, FlowDir::INGRESS, 8)
        };
        let fx = fixture(PortConfig::default(), tattr);
        let fh = create(&fx, 1, 1);
        fx.port.pull(0, 8).unwrap();

        let mark = [Action::Mark { id: 9 }, Action::Drop];
        fx.port.async_update(0, OpAttr::NOW, fh, 1, &mark, 2).unwrap();
        assert_eq!(fx.port.flow_state(fh), Some(FlowState::Updating));
        // The old counter is held until the update completes.
        assert_eq!(fx.port.pools().counters().unwrap().live(), 1);

        fx.port.pull(0, 8).unwrap();
        assert_eq!(fx.port.flow_state(fh), Some(FlowState::Live));
        assert_eq!(fx.port.flow_flags(fh), Some(FlowFlags::empty()));
        assert_eq!(fx.port.pools().counters().unwrap().live(), 0);

        let rule = fx.port.flow_rule(fh).unwrap();
        assert_eq!(fx.port.engine().rule(rule).unwrap().at_idx, 1);
    }

    #[test]
    fn update_needs_updatable_table() {
        let fx = default_fixture();
        let fh = create(&fx, 1, 1);
        fx.port.pull(0, 8).unwrap();
        let mark = [Action::Mark { id: 9 }, Action::Drop];
        assert!(matches!(
            fx.port.async_update(0, OpAttr::NOW, fh, 1, &mark, 2),
            Err(FlowError::InvalidAttr(_))
        ));
    }

    #[test]
    fn query_counts_since_creation() {
        let fx = default_fixture();
        let fh = create(&fx, 1, 1);
        fx.port.pull(0, 8).unwrap();

        let rule = fx.port.flow_rule(fh).unwrap();
        assert!(fx.port.engine().hit_rule(rule, 3, 180));
        let q = QueryAction::Count { reset: true };
        assert_eq!(
            fx.port.query(fh, q),
            Ok(QueryData::Count { hits: 3, bytes: 180 })
        );
        assert_eq!(
            fx.port.query(fh, q),
            Ok(QueryData::Count { hits: 0, bytes: 0 })
        );
        assert!(matches!(
            fx.port.query(fh, QueryAction::Age),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn by_index_insertion() {
        let tattr = TableAttr {
            insertion: InsertionType::Index,
            ..TableAttr::new(1, FlowDir::INGRESS, 8)
        };
        let fx = fixture(PortConfig::default(), tattr);
        let actions = count_drop();
        let spec =
            RuleSpec { pt_idx: 0, items: &[], at_idx: 0, actions: &actions };
        let q = OpAttr::NOW;
        let fh = fx
            .port
            .async_create_by_index(0, q, fx.table, 5, &spec, 1)
            .unwrap();
        assert_eq!(fh.rule_idx, 5);
        assert!(matches!(
            fx.port.async_create_by_index(0, q, fx.table, 5, &spec, 2),
            Err(FlowError::InUse(_))
        ));
        assert!(matches!(
            fx.port.async_create(0, q, fx.table, &spec, 3),
            Err(FlowError::InvalidAttr(_))
        ));
        fx.port.pull(0, 8).unwrap();
        let rule = fx.port.flow_rule(fh).unwrap();
        assert_eq!(fx.port.engine().rule(rule).unwrap().rule_idx, Some(5));
    }

    #[test]
    fn flush_destroys_live_rules() {
        let fx = default_fixture();
        for i in 0..3 {
            create(&fx, i, u64::from(i));
        }
        fx.port.pull(0, 8).unwrap();
        // Still creating, so left alone.
        let pending = create(&fx, 9, 9);

        assert_eq!(fx.port.flush(), Ok(3));
        assert_eq!(fx.port.engine().rule_count(), 1);
        assert_eq!(fx.port.flow_state(pending), Some(FlowState::Creating));
    }

    #[test]
    fn hash_follows_items() {
        let fx = default_fixture();
        let a = fx.port.hash(fx.table, 0, &items(1)).unwrap();
        let b = fx.port.hash(fx.table, 0, &items(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(fx.port.hash(fx.table, 0, &items(1)), Ok(a));
    }
}
