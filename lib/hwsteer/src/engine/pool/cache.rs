// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Refcounted cache of stateless hardware action objects.
//!
//! Objects which only depend on a small key (a jump group, an RSS
//! queue set, a vport, or a per-direction singleton such as drop) are
//! created on first use and destroyed when the last user lets go.

use crate::api::FlowDir;
use crate::api::FlowError;
use crate::engine::steering::ActionObjId;
use crate::engine::steering::HwActionDesc;
use crate::engine::steering::HwError;
use crate::engine::steering::SteeringEngine;
use crate::sys::sync::KMutex;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CacheKey {
    Drop(FlowDir),
    Tag(FlowDir),
    Queue(FlowDir),
    PushVlan(FlowDir),
    PopVlan(FlowDir),
    Jump(FlowDir, u32),
    Rss(FlowDir, Vec<u16>),
    Vport(FlowDir, u16),
}

impl CacheKey {
    fn dir(&self) -> FlowDir {
        match self {
            Self::Drop(d)
            | Self::Tag(d)
            | Self::Queue(d)
            | Self::PushVlan(d)
            | Self::PopVlan(d)
            | Self::Jump(d, _)
            | Self::Rss(d, _)
            | Self::Vport(d, _) => *d,
        }
    }

    fn desc(&self) -> HwActionDesc {
        match self {
            Self::Drop(_) => HwActionDesc::Drop,
            Self::Tag(_) => HwActionDesc::Tag,
            Self::Queue(_) => HwActionDesc::Queue,
            Self::PushVlan(_) => HwActionDesc::PushVlan,
            Self::PopVlan(_) => HwActionDesc::PopVlan,
            Self::Jump(_, group) => HwActionDesc::Jump { group: *group },
            Self::Rss(_, queues) => {
                HwActionDesc::Rss { queues: queues.clone() }
            }
            Self::Vport(_, port_id) => {
                HwActionDesc::Vport { port_id: *port_id }
            }
        }
    }
}

#[derive(Default)]
pub struct ActionCache {
    entries: KMutex<BTreeMap<CacheKey, (ActionObjId, u32)>>,
}

impl ActionCache {
    pub fn acquire<E: SteeringEngine>(
        &self,
        engine: &E,
        key: &CacheKey,
    ) -> Result<ActionObjId, FlowError> {
        let mut entries = self.entries.lock();
        if let Some((obj, refcnt)) = entries.get_mut(key) {
            *refcnt += 1;
            return Ok(*obj);
        }

        let obj = engine.action_create(&key.desc(), key.dir())?;
        entries.insert(key.clone(), (obj, 1));
        Ok(obj)
    }

    pub fn release<E: SteeringEngine>(
        &self,
        engine: &E,
        key: &CacheKey,
    ) -> Result<(), HwError> {
        let mut entries = self.entries.lock();
        let Some((obj, refcnt)) = entries.get_mut(key) else {
            return Ok(());
        };

        *refcnt -= 1;
        if *refcnt > 0 {
            return Ok(());
        }

        let obj = *obj;
        entries.remove(key);
        engine.action_destroy(obj)
    }

    pub fn refcnt(&self, key: &CacheKey) -> u32 {
        self.entries.lock().get(key).map_or(0, |(_, r)| *r)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
