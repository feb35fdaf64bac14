// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! `TBox<T>`: a single transactional scalar cell, ported from the original
//! `TBox.hh`. Reuses the exact same version word and `TObject` contract as
//! [`crate::array::TArray`]; it simply has one slot instead of `N`, so its
//! `uid` is constant.

use std::any::Any;
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crate::config::StoConfig;
use crate::error::StoError;
use crate::object::TObject;
use crate::transaction::Sto;
use crate::version::{Version, VersionWord};

/// A transactional scalar cell.
pub struct TBox<T> {
    version: VersionWord,
    value: UnsafeCell<T>,
    config: StoConfig,
}

// SAFETY: all access to `value` is mediated by `version`, identically to
// `TArray`'s single-slot case.
unsafe impl<T: Send> Sync for TBox<T> {}

impl<T> TBox<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T, config: StoConfig) -> Self {
        Self {
            version: VersionWord::new(),
            value: UnsafeCell::new(initial),
            config,
        }
    }

    /// Non-transactional read. No synchronization.
    pub fn read(&self) -> T {
        unsafe { (*self.value.get()).clone() }
    }

    /// Non-transactional write: `lock; store; unlock`.
    pub fn write(&self, v: T) {
        self.version.lock_with(self.config.spin_vs_mutex).expect("non-transactional write: lock acquisition failed");
        unsafe {
            *self.value.get() = v;
        }
        self.version.unlock();
    }

    pub fn version(&self) -> u64 {
        self.version.version().raw()
    }

    /// Transactional read against the calling thread's active transaction.
    pub fn trans_read(self: &Arc<Self>) -> T {
        let object: Arc<dyn TObject> = self.clone();
        let buffered = Sto::item(&object, 0, |item| {
            if item.has_write() {
                Some(item.write_value::<T>().clone())
            } else {
                None
            }
        });
        if let Some(value) = buffered {
            return value;
        }

        let (value, version) = self.version.seqlock_read(|| unsafe { (*self.value.get()).clone() });
        Sto::item(&object, 0, |item| item.add_read(version));
        value
    }

    /// Transactional write: buffers the new value, nothing touches shared
    /// memory until commit.
    pub fn trans_write(self: &Arc<Self>, v: T) {
        let object: Arc<dyn TObject> = self.clone();
        Sto::item(&object, 0, |item| item.add_write(Box::new(v)));
    }
}

impl<T> TObject for TBox<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn uid(&self, _key: u64) -> u64 {
        0
    }

    fn object_addr(&self) -> usize {
        self as *const Self as usize
    }

    fn is_locked(&self, _key: u64) -> bool {
        self.version.is_locked()
    }

    fn lock(&self, _key: u64) -> Result<(), StoError> {
        self.version.lock_with(self.config.spin_vs_mutex).map(|_| ())
    }

    fn check(&self, _key: u64, observed: Version, locked_by_caller: bool) -> bool {
        if locked_by_caller {
            self.version.check_masked(observed)
        } else {
            self.version.check(observed)
        }
    }

    fn install(&self, _key: u64, value: Box<dyn Any + Send>, _commit_tid: u64) -> bool {
        let new_value = *value
            .downcast::<T>()
            .expect("TBox::install received a write buffered for a different value type");

        let changed = unsafe {
            let cur = &mut *self.value.get();
            if *cur == new_value {
                false
            } else {
                *cur = new_value;
                true
            }
        };

        if changed {
            fence(Ordering::Release);
            self.version.publish().expect("version counter exhausted for this box");
        } else {
            self.version.unlock();
        }
        true
    }

    fn unlock(&self, _key: u64) {
        self.version.unlock();
    }
}
