// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Aging records.
//!
//! An aging record tracks how long the counters tagged with it have
//! gone without a hit. Records move through these states:
//!
//! ```text
//!   FREE --alloc--> CANDIDATE --scan: timeout--> AGED --report--> REPORTED
//!                       ^                          |                 |
//!                       +------- update -----------+-----------------+
//! ```
//!
//! Aged records are queued for reporting. In strict-queue mode every
//! queue has its own aged list holding the records allocated on it;
//! otherwise a single port-wide list is used.

use crate::api::AgeConf;
use crate::api::FlowError;
use crate::api::PoolDump;
use crate::api::QueryData;
use crate::engine::ipool::IndexPool;
use crate::sys::sync::KMutex;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU8;
use core::sync::atomic::AtomicU16;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

const AGE_FREE: u8 = 0;
const AGE_CANDIDATE: u8 = 1;
const AGE_AGED: u8 = 2;
const AGE_REPORTED: u8 = 3;

#[derive(Default)]
struct AgeSlot {
    state: AtomicU8,
    shared: AtomicBool,
    refcnt: AtomicU32,
    timeout: AtomicU32,
    sec_since_last_hit: AtomicU32,
    /// Live counters tagged with this record.
    nb_cnts: AtomicU32,
    last_hits: AtomicU64,
    context: AtomicU64,
    queue: AtomicU16,
    /// Bumped on every allocation so that stale aged-list entries of a
    /// reused index are recognized.
    generation: AtomicU32,
}

pub struct AgePool {
    ipool: IndexPool,
    slots: Box<[AgeSlot]>,
    strict: bool,
    aged: Box<[KMutex<VecDeque<(u32, u32)>>]>,
}

impl AgePool {
    pub fn new(size: u32, nb_queues: u16, strict: bool) -> Self {
        let lists = if strict { usize::from(nb_queues.max(1)) } else { 1 };
        Self {
            ipool: IndexPool::new("age", size, nb_queues),
            slots: (0..size).map(|_| AgeSlot::default()).collect(),
            strict,
            aged: (0..lists).map(|_| KMutex::new(VecDeque::new())).collect(),
        }
    }

    fn slot(&self, idx: u32) -> Result<&AgeSlot, FlowError> {
        if !self.ipool.is_allocated(idx) {
            return Err(FlowError::NotFound(format!("age {idx}")));
        }
        Ok(&self.slots[(idx - 1) as usize])
    }

    pub fn alloc(
        &self,
        queue: u16,
        conf: AgeConf,
        shared: bool,
    ) -> Result<u32, FlowError> {
        let idx = self
            .ipool
            .alloc(queue)
            .ok_or_else(|| FlowError::PoolExhausted("age".into()))?;
        let slot = &self.slots[(idx - 1) as usize];
        slot.generation.fetch_add(1, Ordering::Relaxed);
        slot.shared.store(shared, Ordering::Relaxed);
        slot.timeout.store(conf.timeout, Ordering::Relaxed);
        slot.sec_since_last_hit.store(0, Ordering::Relaxed);
        slot.nb_cnts.store(0, Ordering::Relaxed);
        slot.last_hits.store(0, Ordering::Relaxed);
        slot.context.store(conf.context, Ordering::Relaxed);
        slot.queue.store(queue, Ordering::Relaxed);
        slot.refcnt.store(1, Ordering::Relaxed);
        slot.state.store(AGE_CANDIDATE, Ordering::Release);
        Ok(idx)
    }

    /// Take another reference to a shared record.
    pub fn get(&self, idx: u32) -> Result<(), FlowError> {
        let slot = self.slot(idx)?;
        if !slot.shared.load(Ordering::Relaxed) {
            return Err(FlowError::NotFound(format!("shared age {idx}")));
        }
        slot.refcnt.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop a reference, freeing the record with the last one.
    pub fn put(&self, queue: u16, idx: u32) -> bool {
        let Ok(slot) = self.slot(idx) else {
            return false;
        };
        if slot.refcnt.fetch_sub(1, Ordering::AcqRel) != 1 {
            return false;
        }
        slot.state.store(AGE_FREE, Ordering::Release);
        self.ipool.free(queue, idx)
    }

    pub fn refcnt(&self, idx: u32) -> u32 {
        self.slot(idx).map_or(0, |s| s.refcnt.load(Ordering::Acquire))
    }

    pub fn set_context(&self, idx: u32, context: u64) {
        if let Ok(slot) = self.slot(idx) {
            slot.context.store(context, Ordering::Relaxed);
        }
    }

    pub fn inc_cnts(&self, idx: u32) {
        if let Ok(slot) = self.slot(idx) {
            slot.nb_cnts.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn dec_cnts(&self, idx: u32) {
        if let Ok(slot) = self.slot(idx) {
            let _ = slot.nb_cnts.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |n| Some(n.saturating_sub(1)),
            );
        }
    }

    pub fn nb_cnts(&self, idx: u32) -> u32 {
        self.slot(idx).map_or(0, |s| s.nb_cnts.load(Ordering::Acquire))
    }

    /// Restart the timer, optionally with a new timeout. An aged record
    /// becomes a candidate again.
    pub fn update(
        &self,
        idx: u32,
        timeout: Option<u32>,
    ) -> Result<(), FlowError> {
        let slot = self.slot(idx)?;
        if let Some(t) = timeout {
            slot.timeout.store(t, Ordering::Relaxed);
        }
        slot.sec_since_last_hit.store(0, Ordering::Relaxed);
        slot.state.store(AGE_CANDIDATE, Ordering::Release);
        Ok(())
    }

    pub fn query(&self, idx: u32) -> Result<QueryData, FlowError> {
        let slot = self.slot(idx)?;
        let state = slot.state.load(Ordering::Acquire);
        Ok(QueryData::Age {
            aged: state == AGE_AGED || state == AGE_REPORTED,
            sec_since_last_hit: slot.sec_since_last_hit.load(Ordering::Relaxed),
            timeout: slot.timeout.load(Ordering::Relaxed),
        })
    }

    fn list_for(&self, queue: u16) -> &KMutex<VecDeque<(u32, u32)>> {
        if self.strict {
            &self.aged[usize::from(queue) % self.aged.len()]
        } else {
            &self.aged[0]
        }
    }

    /// Advance every candidate by `elapsed` seconds. `hits` holds the
    /// summed hit count of the counters tagged with each record; a
    /// record whose sum changed since the last scan restarts its
    /// timer. Returns how many records aged out.
    pub fn scan(&self, hits: &BTreeMap<u32, u64>, elapsed: u32) -> u32 {
        let mut aged = 0;
        for idx in self.ipool.allocated() {
            let slot = &self.slots[(idx - 1) as usize];
            if slot.state.load(Ordering::Acquire) != AGE_CANDIDATE {
                continue;
            }

            let total = hits.get(&idx).copied().unwrap_or(0);
            if slot.last_hits.swap(total, Ordering::AcqRel) != total {
                slot.sec_since_last_hit.store(0, Ordering::Relaxed);
                continue;
            }

            let sec = slot
                .sec_since_last_hit
                .fetch_add(elapsed, Ordering::AcqRel)
                .saturating_add(elapsed);
            let timeout = slot.timeout.load(Ordering::Relaxed);
            if timeout == 0 || sec < timeout {
                continue;
            }

            if slot
                .state
                .compare_exchange(
                    AGE_CANDIDATE,
                    AGE_AGED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                let generation = slot.generation.load(Ordering::Relaxed);
                self.list_for(slot.queue.load(Ordering::Relaxed))
                    .lock()
                    .push_back((idx, generation));
                aged += 1;
            }
        }
        aged
    }

    /// Report up to `max` aged records, returning their contexts. In
    /// strict mode only the records allocated on `queue` are reported.
    pub fn take_aged(&self, queue: u16, max: usize) -> Vec<u64> {
        let mut list = self.list_for(queue).lock();
        let mut out = Vec::new();
        while out.len() < max {
            let Some((idx, generation)) = list.pop_front() else {
                break;
            };
            let slot = &self.slots[(idx - 1) as usize];
            if slot.generation.load(Ordering::Relaxed) != generation {
                continue;
            }
            if slot
                .state
                .compare_exchange(
                    AGE_AGED,
                    AGE_REPORTED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                out.push(slot.context.load(Ordering::Relaxed));
            }
        }
        out
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn live(&self) -> u32 {
        self.ipool.live()
    }

    pub fn dump(&self) -> PoolDump {
        PoolDump {
            name: "age".into(),
            capacity: self.ipool.capacity(),
            live: self.ipool.live(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn conf(timeout: u32, context: u64) -> AgeConf {
        AgeConf { timeout, context }
    }

    #[test]
    fn idle_record_ages_once() {
        let pool = AgePool::new(8, 2, false);
        let idx = pool.alloc(0, conf(10, 0xAA), false).unwrap();
        let hits = BTreeMap::new();
        assert_eq!(pool.scan(&hits, 6), 0);
        assert_eq!(pool.scan(&hits, 6), 1);
        assert_eq!(pool.scan(&hits, 6), 0);
        match pool.query(idx).unwrap() {
            QueryData::Age { aged, sec_since_last_hit, timeout } => {
                assert!(aged);
                assert_eq!(sec_since_last_hit, 12);
                assert_eq!(timeout, 10);
            }
            q => panic!("unexpected {q:?}"),
        }
        // Non-strict: any queue reports it, exactly once.
        assert_eq!(pool.take_aged(1, 8), vec![0xAA]);
        assert!(pool.take_aged(0, 8).is_empty());
    }

    #[test]
    fn hits_restart_timer() {
        let pool = AgePool::new(8, 1, false);
        let idx = pool.alloc(0, conf(10, 1), false).unwrap();
        let mut hits = BTreeMap::new();
        pool.scan(&hits, 8);
        hits.insert(idx, 3);
        pool.scan(&hits, 8);
        assert_eq!(pool.scan(&hits, 8), 0);
        assert_eq!(pool.scan(&hits, 8), 1);
    }

    #[test]
    fn strict_lists_are_per_queue() {
        let pool = AgePool::new(8, 2, true);
        pool.alloc(1, conf(1, 7), false).unwrap();
        assert_eq!(pool.scan(&BTreeMap::new(), 1), 1);
        assert!(pool.take_aged(0, 8).is_empty());
        assert_eq!(pool.take_aged(1, 8), vec![7]);
    }

    #[test]
    fn update_rearms_and_reuse_skips_stale() {
        let pool = AgePool::new(8, 1, false);
        let idx = pool.alloc(0, conf(1, 5), true).unwrap();
        assert_eq!(pool.scan(&BTreeMap::new(), 1), 1);
        pool.update(idx, Some(100)).unwrap();
        assert!(pool.take_aged(0, 8).is_empty());

        assert_eq!(pool.scan(&BTreeMap::new(), 200), 1);
        assert!(pool.put(0, idx));
        // Reallocated before the report: the old entry is stale.
        let again = pool.alloc(0, conf(50, 6), false).unwrap();
        assert_eq!(again, idx);
        assert!(pool.take_aged(0, 8).is_empty());
    }

    #[test]
    fn shared_refs_and_counter_tally() {
        let pool = AgePool::new(8, 1, false);
        let idx = pool.alloc(0, conf(5, 0), true).unwrap();
        pool.get(idx).unwrap();
        pool.inc_cnts(idx);
        pool.inc_cnts(idx);
        pool.dec_cnts(idx);
        assert_eq!(pool.nb_cnts(idx), 1);
        assert!(!pool.put(0, idx));
        assert!(pool.put(0, idx));
        assert_eq!(pool.live(), 0);
    }
}
