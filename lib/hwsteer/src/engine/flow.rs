// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Flow rules and the resources they hold.

use super::pool::Pools;
use super::pool::cache::CacheKey;
use super::steering::RuleHandle;
use super::steering::SteeringEngine;
use super::table::Table;
use crate::api::IndirectListHandle;
use crate::api::MeterProfileId;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;

/// The most resources a single rule may hold.
pub const MAX_HELD: usize = 24;

bitflags! {
    /// The pools holding entries on behalf of a flow.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct FlowFlags: u16 {
        const COUNTER = 1;
        const SHARED_COUNTER = 1 << 1;
        const AGE = 1 << 2;
        const SHARED_AGE = 1 << 3;
        const METER = 1 << 4;
        const SHARED_METER = 1 << 5;
        const SHARED_CT = 1 << 6;
        const MIRROR = 1 << 7;
        const CACHED = 1 << 8;
        const TABLE_REF = 1 << 9;
    }
}

/// One resource acquired on behalf of a rule.
#[derive(Clone, Debug)]
pub enum Acquired {
    Counter(u32),
    /// A shared counter, retagged with `age` (zero for none) by this
    /// rule.
    SharedCounter { id: u32, age: u32 },
    Age(u32),
    SharedAge(u32),
    Meter { idx: u32, profile: MeterProfileId },
    SharedMeter(u32),
    SharedCt(u32),
    Mirror(IndirectListHandle),
    Cache(CacheKey),
    /// A by-index table targeted by a jump.
    TableRef(Arc<Table>),
}

impl Acquired {
    fn flag(&self) -> FlowFlags {
        match self {
            Self::Counter(_) => FlowFlags::COUNTER,
            Self::SharedCounter { .. } => FlowFlags::SHARED_COUNTER,
            Self::Age(_) => FlowFlags::AGE,
            Self::SharedAge(_) => FlowFlags::SHARED_AGE,
            Self::Meter { .. } => FlowFlags::METER,
            Self::SharedMeter(_) => FlowFlags::SHARED_METER,
            Self::SharedCt(_) => FlowFlags::SHARED_CT,
            Self::Mirror(_) => FlowFlags::MIRROR,
            Self::Cache(_) => FlowFlags::CACHED,
            Self::TableRef(_) => FlowFlags::TABLE_REF,
        }
    }
}

/// The resources held by a rule, released in reverse order of
/// acquisition.
#[derive(Clone, Debug, Default)]
pub struct Resources {
    held: heapless::Vec<Acquired, MAX_HELD>,
    /// The counter the rule's counter slot points at.
    pub counter: Option<u32>,
    /// The aging record tagging the rule's counter.
    pub age: Option<u32>,
}

impl Resources {
    /// Record an acquisition. A full set hands the resource back.
    pub fn push(&mut self, acq: Acquired) -> Result<(), Acquired> {
        self.held.push(acq)
    }

    pub fn flags(&self) -> FlowFlags {
        self.held.iter().fold(FlowFlags::empty(), |acc, a| acc | a.flag())
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Return everything to its pool, on behalf of `queue`.
    pub fn release<E: SteeringEngine>(
        &mut self,
        engine: &E,
        pools: &Pools,
        queue: u16,
    ) {
        while let Some(acq) = self.held.pop() {
            release_one(engine, pools, queue, acq);
        }
        self.counter = None;
        self.age = None;
    }
}

pub(crate) fn release_one<E: SteeringEngine>(
    engine: &E,
    pools: &Pools,
    queue: u16,
    acq: Acquired,
) {
    match acq {
        Acquired::Counter(id) | Acquired::SharedCounter { id, age: 0 } => {
            if let Ok(counters) = pools.counters() {
                put_counter(pools, counters.put(queue, id));
            }
        }

        Acquired::SharedCounter { id, age } => {
            if let Ok(counters) = pools.counters() {
                if counters.clear_age(id, age)
                    && let Ok(ages) = pools.ages()
                {
                    ages.dec_cnts(age);
                }
                put_counter(pools, counters.put(queue, id));
            }
        }

        Acquired::Age(idx) | Acquired::SharedAge(idx) => {
            if let Ok(ages) = pools.ages() {
                ages.put(queue, idx);
            }
        }

        Acquired::Meter { idx, profile } => {
            if let Ok(meters) = pools.meters()
                && meters.put(queue, idx)
            {
                pools.profiles.put(profile);
            }
        }

        Acquired::SharedMeter(idx) => {
            if let Ok(meters) = pools.meters() {
                meters.put(queue, idx);
            }
        }

        Acquired::SharedCt(idx) => {
            if let Ok(cts) = pools.cts() {
                cts.put(queue, idx);
            }
        }

        Acquired::Mirror(h) => pools.mirrors.put(h),

        Acquired::Cache(key) => {
            let _ = pools.cache.release(engine, &key);
        }

        Acquired::TableRef(table) => table.release_ref(),
    }
}

/// A counter freed with an age tag leaves that record's tally.
fn put_counter(pools: &Pools, freed: Option<u32>) {
    if let Some(age) = freed.filter(|a| *a != 0)
        && let Ok(ages) = pools.ages()
    {
        ages.dec_cnts(age);
    }
}

/// The lifecycle of a flow rule.
///
/// ```text
/// async_create --> Creating -- completion ok --> Live
///                  Creating -- completion err --> (freed)
///
/// Live -- async_destroy --> Destroying -- ok --> (freed)
///                           Destroying -- err --> Live
/// Live -- async_update --> Updating -- ok/err --> Live
/// Live -- async_update_resized --> Moving -- ok/err --> Live
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowState {
    Creating,
    Live,
    Updating,
    Destroying,
    Moving,
}

impl Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Live => "live",
            Self::Updating => "updating",
            Self::Destroying => "destroying",
            Self::Moving => "moving",
        };
        write!(f, "{s}")
    }
}

/// Replacement actions waiting for their update to complete.
#[derive(Debug)]
pub struct PendingUpdate {
    pub at_idx: u8,
    pub res_idx: u32,
    pub res: Resources,
}

#[derive(Debug)]
pub struct Flow {
    pub rule_idx: u32,
    /// The index of the rule's per-rule data in the table's segments.
    pub res_idx: u32,
    pub pt_idx: u8,
    pub at_idx: u8,
    pub hw: RuleHandle,
    /// The queue the rule was created on.
    pub queue: u16,
    /// The matcher slot holding the rule.
    pub selector: u8,
    pub state: FlowState,
    pub res: Resources,
    pub update: Option<PendingUpdate>,
    pub user_data: u64,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::AgeConf;
    use crate::api::FlowDir;
    use crate::api::PortConfig;
    use crate::engine::soft::SoftEngine;

    #[test]
    fn flags_mirror_holdings() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();
        let counters = pools.counters().unwrap();
        let ages = pools.ages().unwrap();

        let mut res = Resources::default();
        let conf = AgeConf { timeout: 5, context: 1 };
        let age = ages.alloc(0, conf, false).unwrap();
        res.push(Acquired::Age(age)).unwrap();
        let id = counters.alloc(&eng, 0, age, false).unwrap();
        ages.inc_cnts(age);
        res.push(Acquired::Counter(id)).unwrap();
        let key = CacheKey::Drop(FlowDir::INGRESS);
        pools.cache.acquire(&eng, &key).unwrap();
        res.push(Acquired::Cache(key)).unwrap();

        assert_eq!(
            res.flags(),
            FlowFlags::AGE | FlowFlags::COUNTER | FlowFlags::CACHED
        );
        assert_eq!(ages.nb_cnts(age), 1);

        res.release(&eng, &pools, 0);
        assert!(res.is_empty());
        assert_eq!(res.flags(), FlowFlags::empty());
        assert_eq!(counters.live(), 0);
        assert_eq!(ages.live(), 0);
        assert!(pools.cache.is_empty());
    }

    #[test]
    fn shared_counter_tag_cleared_on_release() {
        let eng = SoftEngine::new();
        let pools = Pools::new(&eng, &PortConfig::default()).unwrap();
        let counters = pools.counters().unwrap();
        let ages = pools.ages().unwrap();

        let shared = counters.alloc(&eng, 0, 0, true).unwrap();
        let conf = AgeConf { timeout: 5, context: 1 };
        let age = ages.alloc(0, conf, false).unwrap();
        counters.get(shared).unwrap();
        counters.swap_age(shared, age);
        ages.inc_cnts(age);

        let mut res = Resources::default();
        res.push(Acquired::SharedCounter { id: shared, age }).unwrap();
        res.release(&eng, &pools, 0);

        assert_eq!(counters.refcnt(shared), 1);
        assert_eq!(counters.age_idx(shared), 0);
        assert_eq!(ages.nb_cnts(age), 0);
    }
}
