// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Lock wrappers used throughout the engine.
//!
//! A poisoned lock yields its inner guard; `lock()`, `read()` and
//! `write()` never fail.
use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

/// A mutex with a guard-returning `lock()` that cannot fail.
///
/// Each flow queue, pool free list, and rule slot sits behind one of
/// these; queues are driven by one thread each so the queue locks are
/// uncontended in the common case.
pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KMutex<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard }
    }

    pub fn try_lock(&self) -> Result<KMutexGuard<'_, T>, LockTaken> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(KMutexGuard { guard }),
            Err(std::sync::TryLockError::Poisoned(e)) => {
                Ok(KMutexGuard { guard: e.into_inner() })
            }
            Err(std::sync::TryLockError::WouldBlock) => Err(LockTaken),
        }
    }
}

impl<T: Default> Default for KMutex<T> {
    fn default() -> Self {
        KMutex::new(T::default())
    }
}

#[derive(Debug)]
pub struct LockTaken;

/// A reader-writer lock.
///
/// A table's matcher selector lives in one of these: rule insertion
/// takes the read side, the resize flip the write side.
pub struct KRwLock<T> {
    inner: RwLock<T>,
}

pub struct KRwLockReadGuard<'a, T: 'a> {
    guard: RwLockReadGuard<'a, T>,
}

pub struct KRwLockWriteGuard<'a, T: 'a> {
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for KRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> Deref for KRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KRwLock<T> {
    pub const fn new(val: T) -> Self {
        KRwLock { inner: RwLock::new(val) }
    }

    pub fn read(&self) -> KRwLockReadGuard<'_, T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        KRwLockReadGuard { guard }
    }

    pub fn write(&self) -> KRwLockWriteGuard<'_, T> {
        let guard =
            self.inner.write().unwrap_or_else(PoisonError::into_inner);
        KRwLockWriteGuard { guard }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn try_lock_reports_contention() {
        let m = KMutex::new(5u32);
        let g = m.lock();
        assert!(m.try_lock().is_err());
        drop(g);
        *m.try_lock().unwrap() += 1;
        assert_eq!(m.into_inner(), 6);
    }

    #[test]
    fn rwlock_readers_share() {
        let l = KRwLock::new(0u8);
        {
            let a = l.read();
            let b = l.read();
            assert_eq!(*a + *b, 0);
        }
        *l.write() = 1;
        assert_eq!(*l.read(), 1);
    }
}
