// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! `TArray<T, N>`: a length-`N` dense array of transactional slots. The
//! canonical storage collaborator that anchors the [`TObject`] contract —
//! ported from the original C++ `Array.hh` in spirit (seqlock reads,
//! spin-CAS writes, value-then-version publish), generalized to the
//! heterogeneous `TObject` boundary.

use std::any::Any;
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use log::trace;

use crate::config::StoConfig;
use crate::error::StoError;
use crate::object::TObject;
use crate::transaction::Sto;
use crate::version::{Version, VersionWord};

struct Slot<T> {
    version: VersionWord,
    value: UnsafeCell<T>,
}

// SAFETY: all access to `value` is mediated by `version`'s lock bit
// (writers) or the seqlock retry loop (readers); see `install`, `write`,
// and `trans_read`.
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        Self {
            version: VersionWord::new(),
            value: UnsafeCell::new(T::default()),
        }
    }
}

/// A fixed-size array of `N` transactional slots holding values of type
/// `T`. Must be held behind an `Arc` to participate in transactions (the
/// `trans_*` methods take `self: &Arc<Self>` so they can hand out a
/// type-erased `Arc<dyn TObject>` for the item's lock-ordering key).
pub struct TArray<T, const N: usize> {
    slots: [Slot<T>; N],
    config: StoConfig,
}

impl<T, const N: usize> TArray<T, N>
where
    T: Clone + Default + PartialEq + Send + Sync + 'static,
{
    pub fn new(config: StoConfig) -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
            config,
        }
    }

    fn slot(&self, key: u64) -> &Slot<T> {
        &self.slots[key as usize]
    }

    /// Non-transactional read: no synchronization, caller accepts torn
    /// reads under concurrent writers.
    pub fn read(&self, i: usize) -> T {
        unsafe { (*self.slot(i as u64).value.get()).clone() }
    }

    /// Non-transactional write: `lock; store; unlock`. Does not bump the
    /// version — matches the original C++ `Array::write`, which treats a
    /// non-transactional write as invisible to the OCC version history.
    pub fn write(&self, i: usize, v: T) {
        let slot = self.slot(i as u64);
        slot.version.lock_with(self.config.spin_vs_mutex).expect("non-transactional write: lock acquisition failed");
        unsafe {
            *slot.value.get() = v;
        }
        slot.version.unlock();
    }

    /// The current unlocked version counter for slot `i`, for tests and
    /// diagnostics.
    pub fn version_of(&self, i: usize) -> u64 {
        self.slot(i as u64).version.version().raw()
    }

    /// Transactional read: seqlock pattern per the distilled spec's §4.6,
    /// against the calling thread's active transaction (see [`Sto`]).
    /// Returns the buffered write if this transaction already wrote `i`.
    pub fn trans_read(self: &Arc<Self>, i: usize) -> T {
        let object: Arc<dyn TObject> = self.clone();
        let buffered = Sto::item(&object, i as u64, |item| {
            if item.has_write() {
                Some(item.write_value::<T>().clone())
            } else {
                None
            }
        });
        if let Some(value) = buffered {
            return value;
        }

        let slot = self.slot(i as u64);
        let (value, version) = slot.version.seqlock_read(|| unsafe { (*slot.value.get()).clone() });
        Sto::item(&object, i as u64, |item| item.add_read(version));
        value
    }

    /// Transactional write: buffers `(i, v)` in the calling thread's active
    /// transaction's write set. Nothing is touched in shared memory until
    /// commit.
    pub fn trans_write(self: &Arc<Self>, i: usize, v: T) {
        let object: Arc<dyn TObject> = self.clone();
        Sto::item(&object, i as u64, |item| item.add_write(Box::new(v)));
    }
}

impl<T, const N: usize> TObject for TArray<T, N>
where
    T: Clone + Default + PartialEq + Send + Sync + 'static,
{
    fn uid(&self, key: u64) -> u64 {
        key
    }

    fn object_addr(&self) -> usize {
        self as *const Self as usize
    }

    fn is_locked(&self, key: u64) -> bool {
        self.slot(key).version.is_locked()
    }

    fn lock(&self, key: u64) -> Result<(), StoError> {
        self.slot(key).version.lock_with(self.config.spin_vs_mutex).map(|_| ())
    }

    fn check(&self, key: u64, observed: Version, locked_by_caller: bool) -> bool {
        let version = &self.slot(key).version;
        if locked_by_caller {
            version.check_masked(observed)
        } else {
            version.check(observed)
        }
    }

    fn install(&self, key: u64, value: Box<dyn Any + Send>, _commit_tid: u64) -> bool {
        let slot = self.slot(key);
        let new_value = *value
            .downcast::<T>()
            .expect("TArray::install received a write buffered for a different value type");

        let changed = unsafe {
            let cur = &mut *slot.value.get();
            if *cur == new_value {
                false
            } else {
                *cur = new_value;
                true
            }
        };

        if changed {
            fence(Ordering::Release);
            slot.version.publish().expect("version counter exhausted for this slot");
        } else {
            trace!("sto: array install short-circuited a no-op write at key {}", key);
            slot.version.unlock();
        }
        true
    }

    fn unlock(&self, key: u64) {
        self.slot(key).version.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blind_write_bumps_only_the_touched_slot() {
        let array = Arc::new(TArray::<i64, 4>::new(StoConfig::default()));
        let v0 = array.version_of(2);

        let a = array.clone();
        assert!(Sto::retry(4, move || {
            a.trans_write(2, 7);
        }));

        assert_eq!(array.read(0), 0);
        assert_eq!(array.read(2), 7);
        assert_eq!(array.version_of(2), v0 + 1);
        assert_eq!(array.version_of(0), 0);
    }

    #[test]
    fn self_lock_is_not_a_conflict() {
        let array = Arc::new(TArray::<i64, 4>::new(StoConfig::default()));

        let a = array.clone();
        let result = Sto::retry(4, move || {
            a.trans_write(3, 8);
            let seen = a.trans_read(3);
            assert_eq!(seen, 8, "a read after a write in the same txn must see the buffered value");
        });

        assert!(result);
        assert_eq!(array.read(3), 8);
    }
}
