// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Indexed allocators.
//!
//! Every rule, rule resource, counter, aging record, meter, and
//! connection-track context is addressed by a 1-based index handed out
//! by an [`IndexPool`]. Freed indexes are reused last-in first-out, so
//! an index released on a queue is the next one that queue allocates.
//!
//! Pools large enough to make it worthwhile keep a small per-queue
//! cache in front of the shared free list. The shared free list has its
//! own lock, which is the only lock taken on the allocation path; the
//! data addressed by an index is never guarded by the pool.

use crate::sys::sync::KMutex;
use crate::sys::sync::KRwLock;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// Pools with fewer entries than this are not cached.
pub const IPOOL_CACHE_MIN: u32 = 64;

/// The number of indexes moved between a queue cache and the shared
/// free list at once.
const CACHE_BATCH: usize = 16;

struct PoolInner {
    /// Released indexes, most recent last.
    free: Vec<u32>,

    /// The lowest index never handed out.
    next: u32,

    max: u32,
}

pub struct IndexPool {
    name: &'static str,
    inner: KMutex<PoolInner>,
    caches: Box<[KMutex<Vec<u32>>]>,
    in_use: KRwLock<Vec<AtomicU64>>,
    live: AtomicU32,
}

fn bitmap_words(max: u32) -> usize {
    (max as usize).div_ceil(64)
}

impl IndexPool {
    /// Create a pool handing out indexes `1..=max`, with one cache per
    /// queue when `max` is at least [`IPOOL_CACHE_MIN`].
    pub fn new(name: &'static str, max: u32, nb_queues: u16) -> Self {
        let caches = if max >= IPOOL_CACHE_MIN && nb_queues > 0 {
            (0..nb_queues).map(|_| KMutex::new(Vec::new())).collect()
        } else {
            Box::default()
        };

        let mut bits = Vec::with_capacity(bitmap_words(max));
        bits.resize_with(bitmap_words(max), || AtomicU64::new(0));

        Self {
            name,
            inner: KMutex::new(PoolInner { free: Vec::new(), next: 1, max }),
            caches,
            in_use: KRwLock::new(bits),
            live: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_cached(&self) -> bool {
        !self.caches.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.inner.lock().max
    }

    /// The number of indexes currently allocated.
    pub fn live(&self) -> u32 {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_allocated(&self, idx: u32) -> bool {
        let Some((word, bit)) = Self::locate(idx) else {
            return false;
        };
        self.in_use
            .read()
            .get(word)
            .is_some_and(|w| w.load(Ordering::Acquire) & bit != 0)
    }

    fn locate(idx: u32) -> Option<(usize, u64)> {
        let zero_based = idx.checked_sub(1)?;
        Some(((zero_based / 64) as usize, 1u64 << (zero_based % 64)))
    }

    /// Mark `idx` allocated. Returns false if it already was.
    fn claim(&self, idx: u32) -> bool {
        let Some((word, bit)) = Self::locate(idx) else {
            return false;
        };
        let bits = self.in_use.read();
        match bits.get(word) {
            Some(w) => w.fetch_or(bit, Ordering::AcqRel) & bit == 0,
            None => false,
        }
    }

    /// Mark `idx` free. Returns false if it was not allocated.
    fn unclaim(&self, idx: u32) -> bool {
        let Some((word, bit)) = Self::locate(idx) else {
            return false;
        };
        let bits = self.in_use.read();
        match bits.get(word) {
            Some(w) => w.fetch_and(!bit, Ordering::AcqRel) & bit != 0,
            None => false,
        }
    }

    /// Pop a candidate from the shared free list, falling back to the
    /// never-used range.
    fn take_shared(inner: &mut PoolInner) -> Option<u32> {
        if let Some(idx) = inner.free.pop() {
            return Some(idx);
        }

        if inner.next <= inner.max {
            let idx = inner.next;
            inner.next += 1;
            return Some(idx);
        }

        None
    }

    fn cache_for(&self, queue: u16) -> Option<&KMutex<Vec<u32>>> {
        if self.caches.is_empty() {
            None
        } else {
            Some(&self.caches[usize::from(queue) % self.caches.len()])
        }
    }

    /// Pull candidates out of the shared list into `queue`'s cache, or
    /// return one directly for an uncached pool.
    fn next_candidate(&self, queue: u16) -> Option<u32> {
        let Some(cache) = self.cache_for(queue) else {
            return Self::take_shared(&mut self.inner.lock());
        };

        let mut cache = cache.lock();
        if let Some(idx) = cache.pop() {
            return Some(idx);
        }

        let mut inner = self.inner.lock();
        for _ in 0..CACHE_BATCH {
            match Self::take_shared(&mut inner) {
                // Keep the refill in LIFO order relative to the shared
                // list: the first taken is handed out first.
                Some(idx) => cache.insert(0, idx),
                None => break,
            }
        }
        drop(inner);
        cache.pop()
    }

    /// Return every cached index to the shared free list.
    pub fn reclaim_caches(&self) {
        for cache in self.caches.iter() {
            let mut cache = cache.lock();
            if cache.is_empty() {
                continue;
            }
            let mut inner = self.inner.lock();
            inner.free.extend(cache.drain(..));
        }
    }

    fn alloc_once(&self, queue: u16) -> Option<u32> {
        // Indexes claimed out of band by `alloc_at` may still sit on a
        // free list; skip them.
        while let Some(idx) = self.next_candidate(queue) {
            if self.claim(idx) {
                self.live.fetch_add(1, Ordering::Relaxed);
                return Some(idx);
            }
        }
        None
    }

    /// Allocate an index on behalf of `queue`.
    pub fn alloc(&self, queue: u16) -> Option<u32> {
        if let Some(idx) = self.alloc_once(queue) {
            return Some(idx);
        }

        if self.is_cached() {
            self.reclaim_caches();
            return self.alloc_once(queue);
        }

        None
    }

    /// Allocate a specific index. Returns false if the index is out of
    /// range or already allocated.
    pub fn alloc_at(&self, idx: u32) -> bool {
        if idx == 0 || idx > self.capacity() {
            return false;
        }

        if self.claim(idx) {
            self.live.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        false
    }

    /// Release `idx` from `queue`. Releasing an index which is not
    /// allocated is ignored and reported as false.
    pub fn free(&self, queue: u16, idx: u32) -> bool {
        if !self.unclaim(idx) {
            return false;
        }
        self.live.fetch_sub(1, Ordering::Relaxed);

        match self.cache_for(queue) {
            Some(cache) => {
                let mut cache = cache.lock();
                cache.push(idx);
                if cache.len() > 2 * CACHE_BATCH {
                    let spill = cache.len() - CACHE_BATCH;
                    let mut inner = self.inner.lock();
                    // The oldest cached entries go back to the shared
                    // list; the most recent stay local.
                    inner.free.extend(cache.drain(..spill));
                }
            }

            None => self.inner.lock().free.push(idx),
        }

        true
    }

    /// Raise the pool's maximum index. Shrinking is not supported.
    pub fn grow(&self, new_max: u32) -> bool {
        let mut inner = self.inner.lock();
        if new_max < inner.max {
            return false;
        }
        inner.max = new_max;
        let mut bits = self.in_use.write();
        let words = bitmap_words(new_max);
        if bits.len() < words {
            bits.resize_with(words, || AtomicU64::new(0));
        }
        true
    }

    /// Every allocated index, in ascending order.
    pub fn allocated(&self) -> Vec<u32> {
        let bits = self.in_use.read();
        let mut out = Vec::with_capacity(self.live() as usize);
        for (word_idx, word) in bits.iter().enumerate() {
            let mut w = word.load(Ordering::Acquire);
            while w != 0 {
                let bit = w.trailing_zeros();
                out.push((word_idx as u32) * 64 + bit + 1);
                w &= w - 1;
            }
        }
        out
    }
}
