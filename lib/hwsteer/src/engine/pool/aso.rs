// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! ASO-backed objects: meters and connection-tracking contexts.
//!
//! Each object is an entry of a bulk ASO hardware object and must be
//! initialized by an ASO job before use:
//!
//! ```text
//!   FREE --alloc--> WAIT_INIT --completion ok--> READY
//!                       |
//!                       +----completion error--> ERROR
//! ```

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
use core::fmt;
use core::fmt::Display;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU8;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum AsoState {
    Free = 0,
    WaitInit = 1,
    Ready = 2,
    Error = 3,
}

impl AsoState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::WaitInit,
            2 => Self::Ready,
            3 => Self::Error,
            _ => Self::Free,
        }
    }
}

impl Display for AsoState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Free => "FREE",
            Self::WaitInit => "WAIT_INIT",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AsoKind {
    Meter,
    Conntrack,
}

impl AsoKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Meter => "meter",
            Self::Conntrack => "conntrack",
        }
    }
}

struct AsoSlot<C> {
    state: AtomicU8,
    generation: AtomicU32,
    shared: AtomicBool,
    refcnt: AtomicU32,
    conf: KMutex<C>,
}

pub struct AsoPool<C> {
    kind: AsoKind,
    ipool: IndexPool,
    slots: Box<[AsoSlot<C>]>,
    bulk: ActionObjId,
}

impl<C: Copy + Default> AsoPool<C> {
    pub fn new<E: SteeringEngine>(
        engine: &E,
        kind: AsoKind,
        size: u32,
        nb_queues: u16,
    ) -> Result<Self, FlowError> {
        let desc = match kind {
            AsoKind::Meter => HwActionDesc::AsoMeterBulk { count: size },
            AsoKind::Conntrack => HwActionDesc::AsoCtBulk { count: size },
        };
        let bulk = engine.action_create(&desc, FlowDir::all())?;
        let slots = (0..size)
            .map(|_| AsoSlot {
                state: AtomicU8::new(AsoState::Free as u8),
                generation: AtomicU32::new(0),
                shared: AtomicBool::new(false),
                refcnt: AtomicU32::new(0),
                conf: KMutex::new(C::default()),
            })
            .collect();

        Ok(Self {
            kind,
            ipool: IndexPool::new(kind.name(), size, nb_queues),
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

    pub fn kind(&self) -> AsoKind {
        self.kind
    }

    pub fn bulk(&self) -> ActionObjId {
        self.bulk
    }

    pub fn offset(idx: u32) -> u32 {
        idx - 1
    }

    fn slot(&self, idx: u32) -> Result<&AsoSlot<C>, FlowError> {
        if !self.ipool.is_allocated(idx) {
            return Err(FlowError::NotFound(format!(
                "{} {idx}",
                self.kind.name()
            )));
        }
        Ok(&self.slots[(idx - 1) as usize])
    }

    /// Allocate an object awaiting its init job.
    pub fn alloc(
        &self,
        queue: u16,
        conf: C,
        shared: bool,
    ) -> Result<u32, FlowError> {
        let idx = self
            .ipool
            .alloc(queue)
            .ok_or_else(|| FlowError::PoolExhausted(self.kind.name().into()))?;
        let slot = &self.slots[(idx - 1) as usize];
        slot.generation.fetch_add(1, Ordering::Relaxed);
        *slot.conf.lock() = conf;
        slot.shared.store(shared, Ordering::Relaxed);
        slot.refcnt.store(1, Ordering::Relaxed);
        slot.state.store(AsoState::WaitInit as u8, Ordering::Release);
        Ok(idx)
    }

    pub fn state(&self, idx: u32) -> AsoState {
        self.slot(idx).map_or(AsoState::Free, |s| {
            AsoState::from_u8(s.state.load(Ordering::Acquire))
        })
    }

    /// Bumped each time the index is handed out.
    pub fn generation(&self, idx: u32) -> Option<u32> {
        self.slot(idx).ok().map(|s| s.generation.load(Ordering::Relaxed))
    }

    /// Record the outcome of an init job.
    pub fn set_state(&self, idx: u32, state: AsoState) {
        if let Ok(slot) = self.slot(idx) {
            slot.state.store(state as u8, Ordering::Release);
        }
    }

    pub fn get(&self, idx: u32) -> Result<(), FlowError> {
        let slot = self.slot(idx)?;
        if !slot.shared.load(Ordering::Relaxed) {
            return Err(FlowError::NotFound(format!(
                "shared {} {idx}",
                self.kind.name()
            )));
        }
        slot.refcnt.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop a reference, freeing the object with the last one.
    pub fn put(&self, queue: u16, idx: u32) -> bool {
        let Ok(slot) = self.slot(idx) else {
            return false;
        };
        if slot.refcnt.fetch_sub(1, Ordering::AcqRel) != 1 {
            return false;
        }
        slot.state.store(AsoState::Free as u8, Ordering::Release);
        self.ipool.free(queue, idx)
    }

    pub fn refcnt(&self, idx: u32) -> u32 {
        self.slot(idx).map_or(0, |s| s.refcnt.load(Ordering::Acquire))
    }

    pub fn conf(&self, idx: u32) -> Result<C, FlowError> {
        Ok(*self.slot(idx)?.conf.lock())
    }

    pub fn set_conf(&self, idx: u32, conf: C) -> Result<(), FlowError> {
        *self.slot(idx)?.conf.lock() = conf;
        Ok(())
    }

    pub fn live(&self) -> u32 {
        self.ipool.live()
    }

    pub fn dump(&self) -> PoolDump {
        PoolDump {
            name: self.kind.name().into(),
            capacity: self.ipool.capacity(),
            live: self.ipool.live(),
        }
    }
}
