// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Parser profiles shared by pattern templates.
//!
//! A flex parser is created explicitly and referenced by every pattern
//! template with a flex item for it. The IPv6 segment-routing header
//! parser is implicit: it exists while at least one pattern template
//! matches on an IPv6 routing extension.

use crate::api::FlexHandle;
use crate::api::FlexItemConf;
use crate::api::FlowError;
use crate::sys::sync::KMutex;
use alloc::collections::BTreeMap;

/// The most flex parsers a port may hold at once.
pub const MAX_FLEX_PARSERS: usize = 8;

/// The most 32-bit samples one flex parser extracts.
pub const MAX_FLEX_SAMPLES: usize = 8;

struct FlexEntry {
    conf: FlexItemConf,
    /// One for the creator plus one per referencing template.
    refcnt: u32,
}

struct Inner {
    parsers: BTreeMap<FlexHandle, FlexEntry>,
    next: u32,
    srh_refcnt: u32,
}

pub struct FlexParsers {
    inner: KMutex<Inner>,
}

impl Default for FlexParsers {
    fn default() -> Self {
        Self::new()
    }
}

impl FlexParsers {
    pub fn new() -> Self {
        Self {
            inner: KMutex::new(Inner {
                parsers: BTreeMap::new(),
                next: 1,
                srh_refcnt: 0,
            }),
        }
    }

    pub fn create(&self, conf: FlexItemConf) -> Result<FlexHandle, FlowError> {
        if conf.samples.is_empty() || conf.samples.len() > MAX_FLEX_SAMPLES {
            return Err(FlowError::InvalidAttr(format!(
                "flex parser needs 1..={MAX_FLEX_SAMPLES} samples"
            )));
        }

        if let Some(off) = conf
            .samples
            .iter()
            .find(|off| u32::from(**off) + 4 > u32::from(conf.header_len))
        {
            return Err(FlowError::InvalidAttr(format!(
                "flex sample at {off} exceeds header length {}",
                conf.header_len
            )));
        }

        let mut inner = self.inner.lock();
        if inner.parsers.len() >= MAX_FLEX_PARSERS {
            return Err(FlowError::PoolExhausted("flex parser".into()));
        }

        let handle = FlexHandle(inner.next);
        inner.next += 1;
        inner.parsers.insert(handle, FlexEntry { conf, refcnt: 1 });
        Ok(handle)
    }

    /// Release the creator's reference. Fails while templates still
    /// reference the parser.
    pub fn release(&self, handle: FlexHandle) -> Result<(), FlowError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .parsers
            .get(&handle)
            .ok_or_else(|| FlowError::NotFound(format!("{handle}")))?;
        if entry.refcnt > 1 {
            return Err(FlowError::InUse(format!("{handle}")));
        }
        inner.parsers.remove(&handle);
        Ok(())
    }

    /// Take a template reference, returning the parser's pattern length.
    pub fn get(&self, handle: FlexHandle) -> Result<usize, FlowError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .parsers
            .get_mut(&handle)
            .ok_or_else(|| FlowError::NotFound(format!("{handle}")))?;
        entry.refcnt += 1;
        Ok(entry.conf.pattern_len())
    }

    pub fn put(&self, handle: FlexHandle) {
        if let Some(entry) = self.inner.lock().parsers.get_mut(&handle) {
            entry.refcnt = entry.refcnt.saturating_sub(1).max(1);
        }
    }

    pub fn refcnt(&self, handle: FlexHandle) -> Option<u32> {
        self.inner.lock().parsers.get(&handle).map(|e| e.refcnt)
    }

    pub fn srh_get(&self) {
        self.inner.lock().srh_refcnt += 1;
    }

    pub fn srh_put(&self) {
        let mut inner = self.inner.lock();
        inner.srh_refcnt = inner.srh_refcnt.saturating_sub(1);
    }

    /// The number of templates holding the SRH parser; zero means the
    /// parser does not exist.
    pub fn srh_refcnt(&self) -> u32 {
        self.inner.lock().srh_refcnt
    }
}
