// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Per-queue job descriptors.
//!
//! Every asynchronous operation takes a job descriptor from its queue
//! for as long as it is in flight. The descriptor's slot is encoded in
//! the token handed to the steering engine, so a completion finds its
//! job directly. Jobs retire strictly in submission order: a completed
//! job behind an incomplete one waits.
//!
//! Operations the port completes in software (counter and age queries,
//! age updates, and the like) still take a descriptor, already
//! completed, so that they retire in order with the rest of the queue.
//!
//! Direct meters of a rule are initialized with ASO operations that
//! carry an *internal* token. Those never hold a descriptor and never
//! surface from `pull`.

use crate::api::CtProfile;
use crate::api::FlowError;
use crate::api::IndirectHandle;
use crate::api::QueryData;
use crate::api::QueueDump;
use crate::api::TableId;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

/// Set in every internal token.
const INTERNAL_TOKEN: u64 = 1 << 63;

/// Internal tokens carry the low bits of the pool slot's generation
/// above the operation byte.
const GEN_SHIFT: u32 = 40;
const GEN_MASK: u32 = (1 << 23) - 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobKind {
    RuleCreate,
    RuleDestroy,
    RuleUpdate,
    RuleMove,
    IndirectCreate,
    IndirectUpdate,
    IndirectDestroy,
    IndirectQuery,
}

impl Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::RuleCreate => "rule-create",
            Self::RuleDestroy => "rule-destroy",
            Self::RuleUpdate => "rule-update",
            Self::RuleMove => "rule-move",
            Self::IndirectCreate => "indirect-create",
            Self::IndirectUpdate => "indirect-update",
            Self::IndirectDestroy => "indirect-destroy",
            Self::IndirectQuery => "indirect-query",
        };
        write!(f, "{s}")
    }
}

/// What a finished job does to port state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobEffect {
    /// The rule is in hardware; it becomes live.
    CommitFlow,
    /// The rule never made it; free its slot and resources.
    DiscardFlow,
    /// The rule is gone; free its slot and resources.
    ReleaseFlow,
    /// The operation failed; the rule stays live as it was.
    RestoreFlow,
    /// The new actions are in place; release the old resources.
    SwapResources,
    /// The new actions were refused; release the new resources.
    DiscardUpdate,
    /// The rule now lives in the table's other matcher.
    SwitchMatcher,
    /// The ASO object backing an indirect action is initialized.
    AsoReady,
    AsoError,
    /// Nothing to do beyond reporting the status.
    Report,
}

impl JobKind {
    /// The effect of a job of this kind finishing with `ok`.
    pub fn complete(self, ok: bool) -> JobEffect {
        match (self, ok) {
            (Self::RuleCreate, true) => JobEffect::CommitFlow,
            (Self::RuleCreate, false) => JobEffect::DiscardFlow,
            (Self::RuleDestroy, true) => JobEffect::ReleaseFlow,
            (Self::RuleDestroy, false) => JobEffect::RestoreFlow,
            (Self::RuleUpdate, true) => JobEffect::SwapResources,
            (Self::RuleUpdate, false) => JobEffect::DiscardUpdate,
            (Self::RuleMove, true) => JobEffect::SwitchMatcher,
            (Self::RuleMove, false) => JobEffect::RestoreFlow,
            (Self::IndirectCreate, true) => JobEffect::AsoReady,
            (Self::IndirectCreate, false) => JobEffect::AsoError,
            _ => JobEffect::Report,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobTarget {
    Flow { table: TableId, rule_idx: u32 },
    Indirect(IndirectHandle),
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub kind: JobKind,
    pub target: JobTarget,
    pub user_data: u64,
    /// The completion status, once known: zero or a negative errno.
    pub status: Option<i32>,
    pub query: Option<QueryData>,
}

impl Job {
    pub fn new(kind: JobKind, target: JobTarget, user_data: u64) -> Self {
        Self { kind, target, user_data, status: None, query: None }
    }

    /// A job finished by the port itself.
    pub fn done(mut self, query: Option<QueryData>) -> Self {
        self.status = Some(0);
        self.query = query;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Some(0)
    }
}

/// The operations carried by internal tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum InternalOp {
    MeterInit = 1,
}

/// An internal operation on pool index `idx` while it holds
/// `generation`.
pub fn internal_token(op: InternalOp, idx: u32, generation: u32) -> u64 {
    INTERNAL_TOKEN
        | (u64::from(generation & GEN_MASK) << GEN_SHIFT)
        | (u64::from(op as u8) << 32)
        | u64::from(idx)
}

/// Decode an internal token into its operation, pool index and
/// generation.
pub fn parse_internal(token: u64) -> Option<(InternalOp, u32, u32)> {
    if token & INTERNAL_TOKEN == 0 {
        return None;
    }
    let generation = (token >> GEN_SHIFT) as u32 & GEN_MASK;
    match (token >> 32) as u8 {
        1 => Some((InternalOp::MeterInit, token as u32, generation)),
        _ => None,
    }
}

/// Whether a generation read back from an internal token names the
/// same allocation as `current`.
pub fn same_generation(token_gen: u32, current: u32) -> bool {
    token_gen == current & GEN_MASK
}

fn job_token(queue: u16, slot: u32) -> u64 {
    (u64::from(queue) << 32) | u64::from(slot)
}

pub struct JobQueue {
    queue: u16,
    slots: Vec<Option<Job>>,
    free: Vec<u32>,
    /// Occupied slots, oldest first.
    order: VecDeque<u32>,
    /// Postponed submissions not yet pushed.
    pending: u32,
}

impl JobQueue {
    pub fn new(queue: u16, size: u32) -> Self {
        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, || None);
        Self {
            queue,
            slots,
            // Lowest slot first.
            free: (0..size).rev().collect(),
            order: VecDeque::with_capacity(size as usize),
            pending: 0,
        }
    }

    pub fn queue(&self) -> u16 {
        self.queue
    }

    /// Take a descriptor for `job`, returning its token.
    pub fn alloc(&mut self, job: Job) -> Result<u64, FlowError> {
        let slot = self
            .free
            .pop()
            .ok_or(FlowError::QueueFull { queue: self.queue })?;
        self.slots[slot as usize] = Some(job);
        self.order.push_back(slot);
        Ok(job_token(self.queue, slot))
    }

    fn slot_of(&self, token: u64) -> Option<u32> {
        if token & INTERNAL_TOKEN != 0 || (token >> 32) as u16 != self.queue {
            return None;
        }
        let slot = token as u32;
        (self.slots.get(slot as usize)?.is_some()).then_some(slot)
    }

    /// Give back the descriptor of a job the engine refused.
    pub fn cancel(&mut self, token: u64) -> Option<Job> {
        let slot = self.slot_of(token)?;
        self.order.retain(|s| *s != slot);
        self.free.push(slot);
        self.slots[slot as usize].take()
    }

    /// Record the hardware completion of a job.
    pub fn complete(
        &mut self,
        token: u64,
        status: i32,
        ct: Option<CtProfile>,
    ) -> bool {
        let Some(slot) = self.slot_of(token) else {
            return false;
        };
        let Some(job) = self.slots[slot as usize].as_mut() else {
            return false;
        };
        job.status = Some(status);
        if status == 0
            && let Some(ct) = ct
        {
            job.query = Some(QueryData::Conntrack(ct));
        }
        true
    }

    /// Retire up to `max` completed jobs from the head of the queue.
    pub fn retire(&mut self, max: usize) -> Vec<Job> {
        let mut out = Vec::new();
        while out.len() < max {
            let Some(&slot) = self.order.front() else {
                break;
            };
            let done = self.slots[slot as usize]
                .as_ref()
                .is_some_and(|j| j.status.is_some());
            if !done {
                break;
            }
            self.order.pop_front();
            self.free.push(slot);
            if let Some(job) = self.slots[slot as usize].take() {
                out.push(job);
            }
        }
        out
    }

    pub fn inflight(&self) -> u32 {
        self.order.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    pub fn postponed(&mut self) {
        self.pending += 1;
    }

    pub fn pushed(&mut self) {
        self.pending = 0;
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn dump(&self) -> QueueDump {
        QueueDump {
            queue: self.queue,
            size: self.slots.len() as u32,
            inflight: self.inflight(),
            pending: self.pending,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rule(idx: u32) -> Job {
        Job::new(
            JobKind::RuleCreate,
            JobTarget::Flow { table: TableId(1), rule_idx: idx },
            u64::from(idx),
        )
    }

    #[test]
    fn full_queue_refuses() {
        let mut q = JobQueue::new(2, 2);
        q.alloc(rule(0)).unwrap();
        q.alloc(rule(1)).unwrap();
        assert_eq!(q.alloc(rule(2)), Err(FlowError::QueueFull { queue: 2 }));
        assert_eq!(q.inflight(), 2);
    }

    #[test]
    fn retire_in_submission_order() {
        let mut q = JobQueue::new(0, 4);
        let t0 = q.alloc(rule(0)).unwrap();
        let t1 = q.alloc(rule(1)).unwrap();
        let _ = q.alloc(rule(2).done(None)).unwrap();

        // The second job finishes first but waits for the first.
        assert!(q.complete(t1, 0, None));
        assert!(q.retire(8).is_empty());

        assert!(q.complete(t0, -libc::EIO, None));
        let jobs = q.retire(8);
        let ids: Vec<u64> = jobs.iter().map(|j| j.user_data).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(!jobs[0].is_ok());
        assert!(q.is_empty());
    }

    #[test]
    fn retire_respects_max() {
        let mut q = JobQueue::new(0, 4);
        for i in 0..3 {
            q.alloc(rule(i).done(None)).unwrap();
        }
        assert_eq!(q.retire(2).len(), 2);
        assert_eq!(q.retire(2).len(), 1);
    }

    #[test]
    fn cancel_frees_descriptor() {
        let mut q = JobQueue::new(1, 1);
        let t = q.alloc(rule(0)).unwrap();
        assert!(q.cancel(t).is_some());
        assert!(q.is_empty());
        assert!(q.alloc(rule(1)).is_ok());
        assert!(!q.complete(t ^ (1 << 32), 0, None));
    }

    #[test]
    fn internal_tokens_bypass_descriptors() {
        let t = internal_token(InternalOp::MeterInit, 17, 5);
        assert_eq!(parse_internal(t), Some((InternalOp::MeterInit, 17, 5)));
        assert_eq!(parse_internal(job_token(3, 17)), None);

        let wrapped = internal_token(InternalOp::MeterInit, 17, GEN_MASK + 2);
        let (_, _, generation) = parse_internal(wrapped).unwrap();
        assert!(same_generation(generation, GEN_MASK + 2));
        assert!(!same_generation(generation, GEN_MASK + 3));

        let mut q = JobQueue::new(0, 1);
        assert!(!q.complete(t, 0, None));
    }

    #[test]
    fn effects() {
        assert_eq!(JobKind::RuleCreate.complete(true), JobEffect::CommitFlow);
        assert_eq!(
            JobKind::RuleDestroy.complete(false),
            JobEffect::RestoreFlow
        );
        assert_eq!(
            JobKind::RuleUpdate.complete(false),
            JobEffect::DiscardUpdate
        );
        assert_eq!(JobKind::RuleMove.complete(true), JobEffect::SwitchMatcher);
        assert_eq!(JobKind::IndirectQuery.complete(true), JobEffect::Report);
    }
}
