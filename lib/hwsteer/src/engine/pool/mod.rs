// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Shared hardware-resource pools.
//!
//! A port owns one [`Pools`]. A pool sized zero in the port
//! configuration does not exist, and any template or indirect action
//! needing it is refused at creation time.

pub mod age;
pub mod aso;
pub mod cache;
pub mod counter;
pub mod mirror;
pub mod profile;

use self::age::AgePool;
use self::aso::AsoKind;
use self::aso::AsoPool;
use self::cache::ActionCache;
use self::counter::CounterPool;
use self::mirror::MirrorPool;
use self::profile::MeterProfiles;
use super::codec::ActionFlags;
use super::steering::SteeringEngine;
use crate::api::CtProfile;
use crate::api::FlowError;
use crate::api::MeterMarkConf;
use crate::api::PoolDump;
use crate::api::PortConfig;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use alloc::vec::Vec;

pub type MeterPool = AsoPool<MeterMarkConf>;
pub type CtPool = AsoPool<CtProfile>;

pub struct Pools {
    pub counters: Option<CounterPool>,
    pub ages: Option<AgePool>,
    pub meters: Option<MeterPool>,
    pub cts: Option<CtPool>,
    pub profiles: MeterProfiles,
    pub mirrors: MirrorPool,
    pub cache: ActionCache,
}

fn missing(name: &str) -> FlowError {
    FlowError::PoolNotConfigured(name.into())
}

impl Pools {
    /// Create the pools sized by `cfg`. On failure the pools created so
    /// far are destroyed again.
    pub fn new<E: SteeringEngine>(
        engine: &E,
        cfg: &PortConfig,
    ) -> Result<Self, FlowError> {
        let nbq = cfg.nb_queues;
        let mut pools = Self {
            counters: None,
            ages: None,
            meters: None,
            cts: None,
            profiles: MeterProfiles::new(cfg.nb_meter_profiles),
            mirrors: MirrorPool::default(),
            cache: ActionCache::default(),
        };

        let res: Result<(), FlowError> = (|| {
            if cfg.nb_counters > 0 {
                pools.counters =
                    Some(CounterPool::new(engine, cfg.nb_counters, nbq)?);
            }
            if cfg.nb_aging > 0 {
                pools.ages =
                    Some(AgePool::new(cfg.nb_aging, nbq, cfg.strict_queue));
            }
            if cfg.nb_meters > 0 {
                pools.meters = Some(AsoPool::new(
                    engine,
                    AsoKind::Meter,
                    cfg.nb_meters,
                    nbq,
                )?);
            }
            if cfg.nb_conn_tracks > 0 {
                pools.cts = Some(AsoPool::new(
                    engine,
                    AsoKind::Conntrack,
                    cfg.nb_conn_tracks,
                    nbq,
                )?);
            }
            Ok(())
        })();

        match res {
            Ok(()) => Ok(pools),
            Err(e) => {
                pools.destroy(engine, &crate::provider::NullLog);
                Err(e)
            }
        }
    }

    /// Release the hardware objects behind the pools.
    pub fn destroy<E: SteeringEngine>(
        &self,
        engine: &E,
        log: &dyn LogProvider,
    ) {
        let results = [
            self.counters.as_ref().map(|p| p.destroy(engine)),
            self.meters.as_ref().map(|p| p.destroy(engine)),
            self.cts.as_ref().map(|p| p.destroy(engine)),
        ];
        for res in results.into_iter().flatten() {
            if let Err(e) = res {
                log.log(LogLevel::Warn, &format!("pool teardown: {e}"));
            }
        }
    }

    pub fn counters(&self) -> Result<&CounterPool, FlowError> {
        self.counters.as_ref().ok_or_else(|| missing("counter"))
    }

    pub fn ages(&self) -> Result<&AgePool, FlowError> {
        self.ages.as_ref().ok_or_else(|| missing("age"))
    }

    pub fn meters(&self) -> Result<&MeterPool, FlowError> {
        self.meters.as_ref().ok_or_else(|| missing("meter"))
    }

    pub fn cts(&self) -> Result<&CtPool, FlowError> {
        self.cts.as_ref().ok_or_else(|| missing("conntrack"))
    }

    /// Check that every pool an action template needs exists.
    pub fn check_flags(&self, flags: ActionFlags) -> Result<(), FlowError> {
        if flags.intersects(ActionFlags::COUNT | ActionFlags::AGE) {
            self.counters()?;
        }
        if flags.contains(ActionFlags::AGE) {
            self.ages()?;
        }
        if flags.contains(ActionFlags::METER) {
            self.meters()?;
        }
        if flags.contains(ActionFlags::CT) {
            self.cts()?;
        }
        Ok(())
    }

    pub fn dump(&self) -> Vec<PoolDump> {
        let mut out = Vec::new();
        if let Some(p) = &self.counters {
            out.push(p.dump());
        }
        if let Some(p) = &self.ages {
            out.push(p.dump());
        }
        if let Some(p) = &self.meters {
            out.push(p.dump());
        }
        if let Some(p) = &self.cts {
            out.push(p.dump());
        }
        out
    }
}
