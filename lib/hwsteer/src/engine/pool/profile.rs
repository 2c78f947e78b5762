// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Meter profiles, referenced by meters.

use crate::api::FlowError;
use crate::api::MeterProfile;
use crate::api::MeterProfileId;
use crate::sys::sync::KMutex;
use alloc::collections::BTreeMap;

pub struct MeterProfiles {
    max: usize,
    profiles: KMutex<BTreeMap<MeterProfileId, (MeterProfile, u32)>>,
}

impl MeterProfiles {
    pub fn new(max: u32) -> Self {
        Self { max: max as usize, profiles: KMutex::new(BTreeMap::new()) }
    }

    pub fn add(
        &self,
        id: MeterProfileId,
        profile: MeterProfile,
    ) -> Result<(), FlowError> {
        if profile.cir == 0 || profile.cbs == 0 {
            return Err(FlowError::InvalidAttr(format!(
                "{id}: rate and burst must be non-zero"
            )));
        }

        let mut profiles = self.profiles.lock();
        if profiles.contains_key(&id) {
            return Err(FlowError::InvalidAttr(format!("{id} already exists")));
        }
        if profiles.len() >= self.max {
            return Err(FlowError::PoolExhausted("meter profile".into()));
        }
        profiles.insert(id, (profile, 0));
        Ok(())
    }

    pub fn delete(&self, id: MeterProfileId) -> Result<(), FlowError> {
        let mut profiles = self.profiles.lock();
        match profiles.get(&id) {
            None => Err(FlowError::NotFound(format!("{id}"))),
            Some((_, refcnt)) if *refcnt > 0 => {
                Err(FlowError::InUse(format!("{id}")))
            }
            Some(_) => {
                profiles.remove(&id);
                Ok(())
            }
        }
    }

    /// Take a meter's reference to a profile.
    pub fn get(&self, id: MeterProfileId) -> Result<MeterProfile, FlowError> {
        let mut profiles = self.profiles.lock();
        let (profile, refcnt) = profiles
            .get_mut(&id)
            .ok_or_else(|| FlowError::NotFound(format!("{id}")))?;
        *refcnt += 1;
        Ok(*profile)
    }

    pub fn put(&self, id: MeterProfileId) {
        if let Some((_, refcnt)) = self.profiles.lock().get_mut(&id) {
            *refcnt = refcnt.saturating_sub(1);
        }
    }

    pub fn refcnt(&self, id: MeterProfileId) -> Option<u32> {
        self.profiles.lock().get(&id).map(|(_, r)| *r)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn profile() -> MeterProfile {
        MeterProfile { cir: 1_000_000, cbs: 10_000, ebs: 0 }
    }

    #[test]
    fn referenced_profile_cannot_be_deleted() {
        let profiles = MeterProfiles::new(2);
        let id = MeterProfileId(1);
        profiles.add(id, profile()).unwrap();
        assert!(profiles.add(id, profile()).is_err());
        profiles.get(id).unwrap();
        assert!(matches!(profiles.delete(id), Err(FlowError::InUse(_))));
        profiles.put(id);
        profiles.delete(id).unwrap();
        assert!(matches!(profiles.delete(id), Err(FlowError::NotFound(_))));
    }

    #[test]
    fn capacity_and_validation() {
        let profiles = MeterProfiles::new(1);
        profiles.add(MeterProfileId(1), profile()).unwrap();
        assert!(matches!(
            profiles.add(MeterProfileId(2), profile()),
            Err(FlowError::PoolExhausted(_))
        ));
        let zero = MeterProfile { cir: 0, cbs: 1, ebs: 0 };
        assert!(profiles.add(MeterProfileId(3), zero).is_err());
    }
}
