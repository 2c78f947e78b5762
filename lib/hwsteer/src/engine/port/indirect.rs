// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Indirect actions and indirect action lists.
//!
//! An indirect action is a shared object rules reference by handle: a
//! counter, an aging record, a meter, or a connection-tracking
//! context. Meters and contexts live in ASO objects and are not ready
//! until their init job completes. The synchronous calls run on the
//! control queue and poll until that happens; the asynchronous ones
//! report it through `pull`.

use super::Port;
use crate::api::CtProfile;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::IndirectActionConf;
use crate::api::IndirectHandle;
use crate::api::IndirectKind;
use crate::api::IndirectListConf;
use crate::api::IndirectListHandle;
use crate::api::IndirectUpdate;
use crate::api::MeterMarkConf;
use crate::api::OpAttr;
use crate::api::QueryData;
use crate::engine::flow::Acquired;
use crate::engine::flow::release_one;
use crate::engine::job::Job;
use crate::engine::job::JobKind;
use crate::engine::job::JobQueue;
use crate::engine::job::JobTarget;
use crate::engine::pool::CtPool;
use crate::engine::pool::MeterPool;
use crate::engine::pool::aso::AsoState;
use crate::engine::stat::PortStats;
use crate::engine::steering::ActionObjId;
use crate::engine::steering::AsoOp;
use crate::engine::steering::SteeringEngine;
use crate::provider::LogLevel;

/// How an indirect job finishes.
enum Finish {
    /// In software, with an optional result.
    Now(Option<QueryData>),
    /// With the completion of an ASO operation on a bulk object.
    Aso(ActionObjId, AsoOp),
}

/// What an update replaced. A meter keeps its reference on the old
/// profile until the update is accepted.
enum Prior {
    Nothing,
    Meter(MeterMarkConf),
    Conntrack(CtProfile),
}

impl<E: SteeringEngine> Port<E> {
    /// Allocate the object behind a new indirect action.
    fn indirect_alloc(
        &self,
        queue: u16,
        conf: &IndirectActionConf,
    ) -> Result<(IndirectHandle, Finish), FlowError> {
        let kind = conf.kind();
        match conf {
            IndirectActionConf::Count => {
                let counters = self.pools.counters()?;
                let id = counters.alloc(&self.engine, queue, 0, true)?;
                Ok((IndirectHandle::new(kind, id), Finish::Now(None)))
            }

            IndirectActionConf::Age(age) => {
                let ages = self.pools.ages()?;
                let idx = ages.alloc(queue, *age, true)?;
                let h = IndirectHandle::new(kind, idx);
                if age.context == 0 {
                    ages.set_context(idx, u64::from(h.raw()));
                }
                Ok((h, Finish::Now(None)))
            }

            IndirectActionConf::MeterMark(mc) => {
                let meters = self.pools.meters()?;
                let profile = self.pools.profiles.get(mc.profile)?;
                let idx = match meters.alloc(queue, *mc, true) {
                    Ok(idx) => idx,
                    Err(e) => {
                        self.pools.profiles.put(mc.profile);
                        return Err(e);
                    }
                };
                let offset = MeterPool::offset(idx);
                let op = AsoOp::MeterInit { offset, profile, conf: *mc };
                let h = IndirectHandle::new(kind, idx);
                Ok((h, Finish::Aso(meters.bulk(), op)))
            }

            IndirectActionConf::Conntrack(profile) => {
                let cts = self.pools.cts()?;
                let idx = cts.alloc(queue, *profile, true)?;
                let offset = CtPool::offset(idx);
                let op = AsoOp::CtInit { offset, profile: *profile };
                let h = IndirectHandle::new(kind, idx);
                Ok((h, Finish::Aso(cts.bulk(), op)))
            }
        }
    }

    /// Give back the object behind `h`, which must hold its last
    /// reference.
    fn indirect_free(&self, queue: u16, h: IndirectHandle) {
        let acq = match h.kind {
            IndirectKind::Count => {
                Acquired::SharedCounter { id: h.index, age: 0 }
            }
            IndirectKind::Age => Acquired::SharedAge(h.index),
            IndirectKind::MeterMark => {
                let profile = self
                    .pools
                    .meters()
                    .and_then(|m| m.conf(h.index))
                    .map(|c| c.profile);
                match profile {
                    Ok(profile) => Acquired::Meter { idx: h.index, profile },
                    Err(_) => Acquired::SharedMeter(h.index),
                }
            }
            IndirectKind::Conntrack => Acquired::SharedCt(h.index),
        };
        release_one(&self.engine, &self.pools, queue, acq);
    }

    fn indirect_refcnt(&self, h: IndirectHandle) -> Result<u32, FlowError> {
        let refcnt = match h.kind {
            IndirectKind::Count => self.pools.counters()?.refcnt(h.index),
            IndirectKind::Age => self.pools.ages()?.refcnt(h.index),
            IndirectKind::MeterMark => self.pools.meters()?.refcnt(h.index),
            IndirectKind::Conntrack => self.pools.cts()?.refcnt(h.index),
        };
        if refcnt == 0 {
            return Err(FlowError::NotFound(format!("{h}")));
        }
        Ok(refcnt)
    }

    /// The readiness of an ASO-backed action; others are always ready.
    fn aso_state(&self, h: IndirectHandle) -> Result<AsoState, FlowError> {
        match h.kind {
            IndirectKind::MeterMark => Ok(self.pools.meters()?.state(h.index)),
            IndirectKind::Conntrack => Ok(self.pools.cts()?.state(h.index)),
            IndirectKind::Count | IndirectKind::Age => Ok(AsoState::Ready),
        }
    }

    /// Check that `h` may be destroyed and free its object.
    fn indirect_release(
        &self,
        queue: u16,
        h: IndirectHandle,
    ) -> Result<(), FlowError> {
        let refcnt = self.indirect_refcnt(h)?;
        if refcnt > 1 {
            return Err(FlowError::InUse(format!(
                "{h} ({} rules)",
                refcnt - 1
            )));
        }
        // An init still in flight would land on a recycled object.
        let state = self.aso_state(h)?;
        check_state!(state, [AsoState::Ready, AsoState::Error])?;
        self.indirect_free(queue, h);
        PortStats::incr(&self.stats.indirect_destroy);
        Ok(())
    }

    /// Apply an update in software, returning how it finishes and
    /// what it replaced.
    fn indirect_modify(
        &self,
        h: IndirectHandle,
        update: &IndirectUpdate,
    ) -> Result<(Finish, Prior), FlowError> {
        self.indirect_refcnt(h)?;
        match (h.kind, update) {
            (IndirectKind::Age, IndirectUpdate::Age { timeout }) => {
                self.pools.ages()?.update(h.index, *timeout)?;
                Ok((Finish::Now(None), Prior::Nothing))
            }

            (
                IndirectKind::MeterMark,
                IndirectUpdate::MeterMark { profile, init_color, enabled },
            ) => {
                let meters = self.pools.meters()?;
                check_state!(meters.state(h.index), [AsoState::Ready])?;
                let old = meters.conf(h.index)?;
                let mut conf = old;
                if let Some(id) = profile {
                    conf.profile = *id;
                }
                if let Some(color) = init_color {
                    conf.init_color = *color;
                }
                if let Some(enabled) = enabled {
                    conf.enabled = *enabled;
                }

                let prof = self.pools.profiles.get(conf.profile)?;
                if let Err(e) = meters.set_conf(h.index, conf) {
                    self.pools.profiles.put(conf.profile);
                    return Err(e);
                }

                let op = AsoOp::MeterUpdate {
                    offset: MeterPool::offset(h.index),
                    profile: prof,
                    conf,
                };
                Ok((Finish::Aso(meters.bulk(), op), Prior::Meter(old)))
            }

            (
                IndirectKind::Conntrack,
                IndirectUpdate::Conntrack { profile, is_original_dir },
            ) => {
                let cts = self.pools.cts()?;
                check_state!(cts.state(h.index), [AsoState::Ready])?;
                let old = cts.conf(h.index)?;
                let mut conf = profile.unwrap_or(old);
                if let Some(dir) = is_original_dir {
                    conf.is_original_dir = *dir;
                }
                cts.set_conf(h.index, conf)?;

                let op = AsoOp::CtUpdate {
                    offset: CtPool::offset(h.index),
                    profile: conf,
                };
                Ok((Finish::Aso(cts.bulk(), op), Prior::Conntrack(old)))
            }

            (IndirectKind::Count, _) => Err(FlowError::Unsupported(
                "counters cannot be updated".into(),
            )),

            (kind, _) => Err(FlowError::InvalidAttr(format!(
                "update does not apply to {kind}"
            ))),
        }
    }

    /// The update of `h` was accepted; let go of what it replaced.
    fn indirect_commit(&self, prior: Prior) {
        if let Prior::Meter(old) = prior {
            // The meter holds one reference to its profile.
            self.pools.profiles.put(old.profile);
        }
    }

    /// The update of `h` was refused; put back what it replaced.
    fn indirect_rollback(&self, h: IndirectHandle, prior: Prior) {
        let res = match prior {
            Prior::Nothing => Ok(()),
            Prior::Meter(old) => self.pools.meters().and_then(|meters| {
                let new = meters.conf(h.index)?;
                meters.set_conf(h.index, old)?;
                self.pools.profiles.put(new.profile);
                Ok(())
            }),
            Prior::Conntrack(old) => {
                self.pools.cts().and_then(|cts| cts.set_conf(h.index, old))
            }
        };
        if let Err(e) = res {
            self.log(LogLevel::Warn, &format!("{h} rollback: {e}"));
        }
    }

    /// Read an indirect action, returning how the query finishes.
    fn indirect_read(&self, h: IndirectHandle) -> Result<Finish, FlowError> {
        self.indirect_refcnt(h)?;
        let data = match h.kind {
            IndirectKind::Count => {
                let counters = self.pools.counters()?;
                let (hits, bytes) =
                    counters.query(&self.engine, h.index, false)?;
                QueryData::Count { hits, bytes }
            }
            IndirectKind::Age => self.pools.ages()?.query(h.index)?,
            IndirectKind::MeterMark => {
                let meters = self.pools.meters()?;
                QueryData::MeterMark {
                    ready: meters.state(h.index) == AsoState::Ready,
                    enabled: meters.conf(h.index)?.enabled,
                }
            }
            IndirectKind::Conntrack => {
                let cts = self.pools.cts()?;
                check_state!(cts.state(h.index), [AsoState::Ready])?;
                let op = AsoOp::CtQuery { offset: CtPool::offset(h.index) };
                return Ok(Finish::Aso(cts.bulk(), op));
            }
        };
        Ok(Finish::Now(Some(data)))
    }

    /// Queue `job` on a locked queue and submit its ASO operation.
    fn indirect_submit(
        &self,
        jq: &mut JobQueue,
        attr: OpAttr,
        job: Job,
        finish: Finish,
    ) -> Result<(), FlowError> {
        match finish {
            Finish::Now(query) => {
                jq.alloc(job.done(query))?;
            }
            Finish::Aso(obj, op) => {
                let token = jq.alloc(job)?;
                let queue = jq.queue();
                let res = self.engine.aso_submit(
                    queue,
                    obj,
                    &op,
                    token,
                    attr.postpone,
                );
                if let Err(e) = res {
                    PortStats::incr(&self.stats.hw_error);
                    jq.cancel(token);
                    return Err(e.into());
                }
                if attr.postpone {
                    jq.postponed();
                }
            }
        }
        Ok(())
    }

    /// Run an indirect job on the control queue to completion.
    fn indirect_sync(
        &self,
        job: Job,
        finish: Finish,
    ) -> Result<Job, FlowError> {
        match finish {
            Finish::Now(query) => self.sync_job(job.done(query), |_, _| Ok(())),
            Finish::Aso(obj, op) => self.sync_job(job, |ctrl, token| {
                Ok(self.engine.aso_submit(ctrl, obj, &op, token, false)?)
            }),
        }
    }

    fn job_status(&self, job: &Job, what: &str) -> Result<(), FlowError> {
        match job.status {
            Some(0) => Ok(()),
            status => Err(FlowError::hw(status.unwrap_or(-libc::EIO), what)),
        }
    }

    // ================================================================
    // Synchronous
    // ================================================================

    /// Create an indirect action, waiting until it is ready.
    pub fn indirect_action_create(
        &self,
        conf: &IndirectActionConf,
    ) -> Result<IndirectHandle, FlowError> {
        let ctrl = self.ctrl_queue();
        let (h, finish) = self.indirect_alloc(ctrl, conf)?;
        let job = Job::new(JobKind::IndirectCreate, JobTarget::Indirect(h), 0);
        let res = self
            .indirect_sync(job, finish)
            .and_then(|job| self.job_status(&job, &format!("{h} init")));
        match res {
            Ok(()) => {
                PortStats::incr(&self.stats.indirect_create);
                Ok(h)
            }
            // The init may still complete; the object stays allocated.
            Err(e @ FlowError::Timeout(_)) => Err(e),
            Err(e) => {
                self.indirect_free(ctrl, h);
                Err(e)
            }
        }
    }

    pub fn indirect_action_update(
        &self,
        h: IndirectHandle,
        update: &IndirectUpdate,
    ) -> Result<(), FlowError> {
        let (finish, prior) = self.indirect_modify(h, update)?;
        let job = Job::new(JobKind::IndirectUpdate, JobTarget::Indirect(h), 0);
        let res = self
            .indirect_sync(job, finish)
            .and_then(|job| self.job_status(&job, &format!("{h} update")));
        match res {
            Ok(()) => {
                self.indirect_commit(prior);
                Ok(())
            }
            // The update may still land; it stands.
            Err(e @ FlowError::Timeout(_)) => {
                self.indirect_commit(prior);
                Err(e)
            }
            Err(e) => {
                self.indirect_rollback(h, prior);
                Err(e)
            }
        }
    }

    /// Destroy an indirect action no rule references.
    pub fn indirect_action_destroy(
        &self,
        h: IndirectHandle,
    ) -> Result<(), FlowError> {
        self.indirect_release(self.ctrl_queue(), h)
    }

    pub fn indirect_action_query(
        &self,
        h: IndirectHandle,
    ) -> Result<QueryData, FlowError> {
        match self.indirect_read(h)? {
            Finish::Now(Some(data)) => Ok(data),
            finish => {
                let target = JobTarget::Indirect(h);
                let job = Job::new(JobKind::IndirectQuery, target, 0);
                let job = self.indirect_sync(job, finish)?;
                self.job_status(&job, &format!("{h} query"))?;
                job.query
                    .ok_or_else(|| FlowError::hw(-libc::EIO, "empty query"))
            }
        }
    }

    // ================================================================
    // Asynchronous
    // ================================================================

    /// Enqueue the creation of an indirect action. The handle may be
    /// referenced by rules once its completion is pulled.
    pub fn async_indirect_action_create(
        &self,
        queue: u16,
        attr: OpAttr,
        conf: &IndirectActionConf,
        user_data: u64,
    ) -> Result<IndirectHandle, FlowError> {
        self.check_queue(queue)?;
        let mut jq = self.job_queue(queue)?;
        let (h, finish) = self.indirect_alloc(queue, conf)?;
        let target = JobTarget::Indirect(h);
        let job = Job::new(JobKind::IndirectCreate, target, user_data);
        if let Err(e) = self.indirect_submit(&mut jq, attr, job, finish) {
            self.indirect_free(queue, h);
            return Err(e);
        }
        PortStats::incr(&self.stats.indirect_create);
        Ok(h)
    }

    pub fn async_indirect_action_update(
        &self,
        queue: u16,
        attr: OpAttr,
        h: IndirectHandle,
        update: &IndirectUpdate,
        user_data: u64,
    ) -> Result<(), FlowError> {
        self.check_queue(queue)?;
        let mut jq = self.job_queue(queue)?;
        let (finish, prior) = self.indirect_modify(h, update)?;
        let target = JobTarget::Indirect(h);
        let job = Job::new(JobKind::IndirectUpdate, target, user_data);
        match self.indirect_submit(&mut jq, attr, job, finish) {
            Ok(()) => {
                self.indirect_commit(prior);
                Ok(())
            }
            Err(e) => {
                self.indirect_rollback(h, prior);
                Err(e)
            }
        }
    }

    /// Enqueue the destruction of an indirect action. The object is
    /// freed at once; the completion only reports it.
    pub fn async_indirect_action_destroy(
        &self,
        queue: u16,
        h: IndirectHandle,
        user_data: u64,
    ) -> Result<(), FlowError> {
        self.check_queue(queue)?;
        let mut jq = self.job_queue(queue)?;
        self.indirect_release(queue, h)?;
        let target = JobTarget::Indirect(h);
        let job = Job::new(JobKind::IndirectDestroy, target, user_data);
        jq.alloc(job.done(None))?;
        Ok(())
    }

    /// Enqueue a query; the data arrives with the completion.
    pub fn async_indirect_action_query(
        &self,
        queue: u16,
        attr: OpAttr,
        h: IndirectHandle,
        user_data: u64,
    ) -> Result<(), FlowError> {
        self.check_queue(queue)?;
        let mut jq = self.job_queue(queue)?;
        let finish = self.indirect_read(h)?;
        let target = JobTarget::Indirect(h);
        let job = Job::new(JobKind::IndirectQuery, target, user_data);
        self.indirect_submit(&mut jq, attr, job, finish)
    }

    // ================================================================
    // Lists
    // ================================================================

    /// Create a mirror for rules of direction `dir`.
    pub fn indirect_list_create(
        &self,
        dir: FlowDir,
        conf: &IndirectListConf,
    ) -> Result<IndirectListHandle, FlowError> {
        let cache = &self.pools.cache;
        let h = self.pools.mirrors.create(&self.engine, cache, dir, conf)?;
        PortStats::incr(&self.stats.indirect_create);
        Ok(h)
    }

    pub fn indirect_list_destroy(
        &self,
        h: IndirectListHandle,
    ) -> Result<(), FlowError> {
        self.pools.mirrors.destroy(&self.engine, &self.pools.cache, h)?;
        PortStats::incr(&self.stats.indirect_destroy);
        Ok(())
    }
}
