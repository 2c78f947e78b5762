// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Mirror action lists.
//!
//! A mirror composes one or two clone chains into a single destination
//! array object. A chain is an optional raw encap followed by exactly
//! one fate: a represented port, a queue, or a jump. Mirrors are always
//! refcounted: the creator holds one reference, and every rule using
//! the mirror holds another.

use super::cache::ActionCache;
use super::cache::CacheKey;
use crate::api::Action;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::IndirectListConf;
use crate::api::IndirectListHandle;
use crate::api::MAX_ENCAP_LEN;
use crate::engine::steering::ActionObjId;
use crate::engine::steering::HwActionDesc;
use crate::engine::steering::MirrorDest;
use crate::engine::steering::ReformatKind;
use crate::engine::steering::SteeringEngine;
use crate::sys::sync::KMutex;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// The most clone chains a single mirror may carry.
pub const MAX_MIRROR_CLONES: usize = 2;

struct MirrorEntry {
    dir: FlowDir,
    obj: ActionObjId,
    refcnt: u32,
    keys: Vec<CacheKey>,
    reformats: Vec<ActionObjId>,
}

#[derive(Default)]
struct Held {
    keys: Vec<CacheKey>,
    reformats: Vec<ActionObjId>,
}

impl Held {
    fn release<E: SteeringEngine>(self, engine: &E, cache: &ActionCache) {
        for obj in self.reformats.into_iter().rev() {
            let _ = engine.action_destroy(obj);
        }
        for key in self.keys.iter().rev() {
            let _ = cache.release(engine, key);
        }
    }
}

pub struct MirrorPool {
    inner: KMutex<(BTreeMap<IndirectListHandle, MirrorEntry>, u32)>,
}

impl Default for MirrorPool {
    fn default() -> Self {
        Self { inner: KMutex::new((BTreeMap::new(), 1)) }
    }
}

fn resolve_chain<E: SteeringEngine>(
    engine: &E,
    cache: &ActionCache,
    dir: FlowDir,
    chain: &[Action],
    held: &mut Held,
) -> Result<MirrorDest, FlowError> {
    let (encap, fate) = match chain {
        [fate] => (None, fate),
        [Action::RawEncap { data }, fate] => (Some(data), fate),
        _ => {
            return Err(FlowError::InvalidAttr(
                "mirror clone must be [raw_encap,] fate".into(),
            ));
        }
    };

    let key = match fate {
        Action::RepresentedPort { port_id } => CacheKey::Vport(dir, *port_id),
        Action::Queue { .. } if dir == FlowDir::INGRESS => CacheKey::Queue(dir),
        Action::Jump { group } => CacheKey::Jump(dir, *group),
        other => {
            return Err(FlowError::InvalidAttr(format!(
                "{} cannot end a {dir} mirror clone",
                other.kind()
            )));
        }
    };

    let reformat = match encap {
        Some(data) if data.is_empty() || data.len() > MAX_ENCAP_LEN => {
            return Err(FlowError::InvalidAttr(format!(
                "mirror encap length {} not in 1..={MAX_ENCAP_LEN}",
                data.len()
            )));
        }
        Some(data) => {
            let obj = engine.action_create(
                &HwActionDesc::Reformat {
                    kind: ReformatKind::L2ToTnlL2,
                    data: data.clone(),
                    bulk: 0,
                },
                dir,
            )?;
            held.reformats.push(obj);
            Some(obj)
        }
        None => None,
    };

    let fate = cache.acquire(engine, &key)?;
    held.keys.push(key);
    Ok(MirrorDest { fate, reformat })
}

impl MirrorPool {
    pub fn create<E: SteeringEngine>(
        &self,
        engine: &E,
        cache: &ActionCache,
        dir: FlowDir,
        conf: &IndirectListConf,
    ) -> Result<IndirectListHandle, FlowError> {
        let IndirectListConf::Mirror { clones } = conf;
        if !dir.is_single() {
            return Err(FlowError::InvalidAttr(format!(
                "mirror direction {dir} must be a single direction"
            )));
        }
        if clones.is_empty() || clones.len() > MAX_MIRROR_CLONES {
            return Err(FlowError::InvalidAttr(format!(
                "mirror needs 1..={MAX_MIRROR_CLONES} clones"
            )));
        }

        let mut held = Held::default();
        let mut dests = Vec::with_capacity(clones.len());
        for chain in clones {
            match resolve_chain(engine, cache, dir, chain, &mut held) {
                Ok(dest) => dests.push(dest),
                Err(e) => {
                    held.release(engine, cache);
                    return Err(e);
                }
            }
        }

        let obj = match engine
            .action_create(&HwActionDesc::DestArray { dests }, dir)
        {
            Ok(obj) => obj,
            Err(e) => {
                held.release(engine, cache);
                return Err(e.into());
            }
        };

        let mut inner = self.inner.lock();
        let handle = IndirectListHandle(inner.1);
        inner.1 += 1;
        inner.0.insert(
            handle,
            MirrorEntry {
                dir,
                obj,
                refcnt: 1,
                keys: held.keys,
                reformats: held.reformats,
            },
        );
        Ok(handle)
    }

    /// Take a rule's reference to a mirror of direction `dir`.
    pub fn get(
        &self,
        handle: IndirectListHandle,
        dir: FlowDir,
    ) -> Result<ActionObjId, FlowError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .0
            .get_mut(&handle)
            .ok_or_else(|| FlowError::NotFound(format!("{handle}")))?;
        if entry.dir != dir {
            return Err(FlowError::InvalidAttr(format!(
                "{handle} is a {} mirror, not {dir}",
                entry.dir
            )));
        }
        entry.refcnt += 1;
        Ok(entry.obj)
    }

    pub fn put(&self, handle: IndirectListHandle) {
        if let Some(entry) = self.inner.lock().0.get_mut(&handle) {
            entry.refcnt = entry.refcnt.saturating_sub(1).max(1);
        }
    }

    pub fn refcnt(&self, handle: IndirectListHandle) -> Option<u32> {
        self.inner.lock().0.get(&handle).map(|e| e.refcnt)
    }

    /// Destroy a mirror no rule references any longer.
    pub fn destroy<E: SteeringEngine>(
        &self,
        engine: &E,
        cache: &ActionCache,
        handle: IndirectListHandle,
    ) -> Result<(), FlowError> {
        let entry = {
            let mut inner = self.inner.lock();
            match inner.0.get(&handle) {
                None => return Err(FlowError::NotFound(format!("{handle}"))),
                Some(e) if e.refcnt > 1 => {
                    return Err(FlowError::InUse(format!("{handle}")));
                }
                Some(_) => {}
            }
            match inner.0.remove(&handle) {
                Some(e) => e,
                None => return Err(FlowError::NotFound(format!("{handle}"))),
            }
        };

        let res = engine.action_destroy(entry.obj);
        Held { keys: entry.keys, reformats: entry.reformats }
            .release(engine, cache);
        res.map_err(FlowError::from)
    }

    pub fn handles(&self) -> Vec<IndirectListHandle> {
        self.inner.lock().0.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::soft::SoftEngine;
    use crate::engine::soft::SoftOp;

    fn conf(clones: Vec<Vec<Action>>) -> IndirectListConf {
        IndirectListConf::Mirror { clones }
    }

    #[test]
    fn create_reference_destroy() {
        let eng = SoftEngine::new();
        let cache = ActionCache::default();
        let pool = MirrorPool::default();
        let dir = FlowDir::TRANSFER;

        let h = pool
            .create(
                &eng,
                &cache,
                dir,
                &conf(vec![
                    vec![Action::RepresentedPort { port_id: 2 }],
                    vec![
                        Action::RawEncap { data: vec![0; 50] },
                        Action::RepresentedPort { port_id: 3 },
                    ],
                ]),
            )
            .unwrap();
        assert_eq!(cache.len(), 2);

        pool.get(h, dir).unwrap();
        assert!(pool.get(h, FlowDir::INGRESS).is_err());
        assert!(matches!(
            pool.destroy(&eng, &cache, h),
            Err(FlowError::InUse(_))
        ));
        pool.put(h);
        pool.destroy(&eng, &cache, h).unwrap();
        assert!(cache.is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn invalid_chains_unwind() {
        let eng = SoftEngine::new();
        let cache = ActionCache::default();
        let pool = MirrorPool::default();
        let dir = FlowDir::TRANSFER;

        let bad = conf(vec![
            vec![Action::RepresentedPort { port_id: 2 }],
            vec![Action::Drop],
        ]);
        assert!(pool.create(&eng, &cache, dir, &bad).is_err());
        assert!(cache.is_empty());

        let too_many = conf(vec![vec![Action::Jump { group: 1 }]; 3]);
        assert!(pool.create(&eng, &cache, dir, &too_many).is_err());

        eng.fail_next(SoftOp::ActionCreate, -libc::ENOMEM);
        let one = conf(vec![vec![Action::Jump { group: 1 }]]);
        assert!(matches!(
            pool.create(&eng, &cache, dir, &one),
            Err(FlowError::Hardware { .. })
        ));
        assert!(cache.is_empty());
    }
}
