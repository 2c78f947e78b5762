// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Flow counters.
//!
//! All counters live in one bulk hardware object; counter `id` is entry
//! `id - 1` of it. A direct counter belongs to a single rule. A shared
//! counter is created through the indirect-action API and referenced by
//! any number of rules.
//!
//! A counter may be tagged with the index of an aging record. The aging
//! scan reads every tagged counter and credits its hits to that record.
//! A shared counter only remembers the most recent AGE that referenced
//! it.
//!
//! Hardware counters are never cleared. Queries report the delta from
//! a baseline taken at allocation and moved forward by a reset.

use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::PoolDump;
use crate::engine::ipool::IndexPool;
use crate::engine::steering::ActionObjId;
use crate::engine::steering::HwActionDesc;
use crate::engine::steering::HwError;
use crate::engine::steering::SteeringEngine;
use crate::sys::sync::KMutex;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

#[derive(Default)]
struct CounterSlot {
    shared: AtomicBool,
    refcnt: AtomicU32,
    age_idx: AtomicU32,
    base: KMutex<(u64, u64)>,
}

pub struct CounterPool {
    ipool: IndexPool,
    slots: Box<[CounterSlot]>,
    bulk: ActionObjId,
}

impl CounterPool {
    pub fn new<E: SteeringEngine>(
        engine: &E,
        size: u32,
        nb_queues: u16,
    ) -> Result<Self, FlowError> {
        let bulk = engine.action_create(
            &HwActionDesc::CounterBulk { count: size },
            FlowDir::all(),
        )?;
        let slots = (0..size).map(|_| CounterSlot::default()).collect();
        Ok(Self {
            ipool: IndexPool::new("counter", size, nb_queues),
            slots,
            bulk,
        })
    }

    pub fn destroy<E: SteeringEngine>(
        &self,
        engine: &E,
    ) -> Result<(), HwError> {
        engine.action_destroy(self.bulk)
    }

    pub fn bulk(&self) -> ActionObjId {
        self.bulk
    }

    pub fn offset(id: u32) -> u32 {
        id - 1
    }

    fn slot(&self, id: u32) -> Result<&CounterSlot, FlowError> {
        if !self.ipool.is_allocated(id) {
            return Err(FlowError::NotFound(format!("counter {id}")));
        }
        Ok(&self.slots[(id - 1) as usize])
    }

    /// Allocate a counter with a single reference, tagged with
    /// `age_idx` (zero for none).
    pub fn alloc<E: SteeringEngine>(
        &self,
        engine: &E,
        queue: u16,
        age_idx: u32,
        shared: bool,
    ) -> Result<u32, FlowError> {
        let id = self
            .ipool
            .alloc(queue)
            .ok_or_else(|| FlowError::PoolExhausted("counter".into()))?;

        let base = match engine.counter_query(self.bulk, Self::offset(id)) {
            Ok(base) => base,
            Err(e) => {
                self.ipool.free(queue, id);
                return Err(e.into());
            }
        };

        let slot = &self.slots[(id - 1) as usize];
        *slot.base.lock() = base;
        slot.shared.store(shared, Ordering::Relaxed);
        slot.age_idx.store(age_idx, Ordering::Relaxed);
        slot.refcnt.store(1, Ordering::Release);
        Ok(id)
    }

    /// Take another reference to a shared counter.
    pub fn get(&self, id: u32) -> Result<(), FlowError> {
        let slot = self.slot(id)?;
        if !slot.shared.load(Ordering::Relaxed) {
            return Err(FlowError::NotFound(format!("shared counter {id}")));
        }
        slot.refcnt.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop a reference. When it was the last, the counter is freed and
    /// its age tag at that moment is returned.
    pub fn put(&self, queue: u16, id: u32) -> Option<u32> {
        let slot = self.slot(id).ok()?;
        if slot.refcnt.fetch_sub(1, Ordering::AcqRel) != 1 {
            return None;
        }
        let age = slot.age_idx.swap(0, Ordering::AcqRel);
        self.ipool.free(queue, id);
        Some(age)
    }

    pub fn is_shared(&self, id: u32) -> bool {
        self.slot(id).is_ok_and(|s| s.shared.load(Ordering::Relaxed))
    }

    pub fn refcnt(&self, id: u32) -> u32 {
        self.slot(id).map_or(0, |s| s.refcnt.load(Ordering::Acquire))
    }

    pub fn age_idx(&self, id: u32) -> u32 {
        self.slot(id).map_or(0, |s| s.age_idx.load(Ordering::Acquire))
    }

    /// Retag the counter, returning the previous tag.
    pub fn swap_age(&self, id: u32, age_idx: u32) -> u32 {
        self.slot(id).map_or(0, |s| s.age_idx.swap(age_idx, Ordering::AcqRel))
    }

    /// Clear the tag only if it still names `age_idx`.
    pub fn clear_age(&self, id: u32, age_idx: u32) -> bool {
        self.slot(id).is_ok_and(|s| {
            let (ok, fail) = (Ordering::AcqRel, Ordering::Acquire);
            s.age_idx.compare_exchange(age_idx, 0, ok, fail).is_ok()
        })
    }

    /// The (packets, bytes) counted since allocation or the last reset.
    pub fn query<E: SteeringEngine>(
        &self,
        engine: &E,
        id: u32,
        reset: bool,
    ) -> Result<(u64, u64), FlowError> {
        let slot = self.slot(id)?;
        let (pkts, bytes) = engine.counter_query(self.bulk, Self::offset(id))?;
        let mut base = slot.base.lock();
        let delta = (pkts.wrapping_sub(base.0), bytes.wrapping_sub(base.1));
        if reset {
            *base = (pkts, bytes);
        }
        Ok(delta)
    }

    /// Every allocated counter carrying an age tag, as (counter, age).
    pub fn tagged(&self) -> Vec<(u32, u32)> {
        self.ipool
            .allocated()
            .into_iter()
            .filter_map(|id| {
                let age = self.slots[(id - 1) as usize]
                    .age_idx
                    .load(Ordering::Acquire);
                (age != 0).then_some((id, age))
            })
            .collect()
    }

    pub fn live(&self) -> u32 {
        self.ipool.live()
    }

    pub fn dump(&self) -> PoolDump {
        PoolDump {
            name: "counter".into(),
            capacity: self.ipool.capacity(),
            live: self.ipool.live(),
        }
    }
}
