// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The version word: a single atomic `u64` whose high bit is a spin-lock
//! flag and whose remaining 63 bits are a monotonic version counter. Every
//! shared storage slot in this crate is guarded by one of these.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backoff::Breaker;
use crate::config::LockStrategy;
use crate::error::StoError;

/// Bit 63 of the packed word marks the slot as write-locked.
pub const LOCK_BIT: u64 = 1 << 63;

/// The largest representable counter value before it would collide with
/// the lock bit on increment. Reaching it is an irrecoverable condition
/// per the protocol (the core does not attempt to handle counter
/// wraparound).
const MAX_COUNTER: u64 = LOCK_BIT - 1;

/// An unlocked, comparable snapshot of a [`VersionWord`].
///
/// This is what gets stored in a transaction's read set: the counter value
/// observed at read time, with the lock bit always cleared (a reader never
/// records a locked observation as "the" version — it retries instead, see
/// [`VersionWord::seqlock_read`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub(crate) fn from_raw_unlocked(raw: u64) -> Self {
        Version(raw & !LOCK_BIT)
    }

    /// The raw counter value, with the lock bit guaranteed clear.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A word-sized spin lock with an integrated version counter.
pub struct VersionWord {
    word: AtomicU64,
}

impl Default for VersionWord {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionWord {
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    #[inline]
    fn is_locked_raw(raw: u64) -> bool {
        raw & LOCK_BIT != 0
    }

    /// Acquire-ordered load of the full word, lock bit included.
    #[inline]
    fn load_raw(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }

    /// Snapshot of the lock bit. Advisory: may be stale the instant it
    /// returns.
    pub fn is_locked(&self) -> bool {
        Self::is_locked_raw(self.load_raw())
    }

    /// The current unlocked version, irrespective of whether the slot is
    /// presently locked.
    pub fn version(&self) -> Version {
        Version::from_raw_unlocked(self.load_raw())
    }

    /// Spin-CAS the lock bit from clear to set, backing off exponentially
    /// between attempts. Returns the version observed at the moment the
    /// lock was acquired (with the lock bit already set in the stored
    /// word, but cleared in the returned snapshot).
    pub fn lock(&self) -> Result<Version, StoError> {
        self.lock_with(LockStrategy::Spin)
    }

    /// Like [`Self::lock`], but lets the caller pick how to wait between
    /// failed CAS attempts. [`LockStrategy::Mutex`] yields the thread back
    /// to the scheduler instead of busy-spinning: holding a real
    /// `std::sync::Mutex` guard across the separate `lock`/`unlock` calls
    /// this trait requires isn't expressible safely, so the "mutex"
    /// strategy is realized as a cooperative (non-busy) wait on the same
    /// atomic word rather than a second, parallel locking primitive.
    pub fn lock_with(&self, strategy: LockStrategy) -> Result<Version, StoError> {
        let breaker = Breaker::default();
        loop {
            let cur = self.load_raw();
            if !Self::is_locked_raw(cur) {
                if self
                    .word
                    .compare_exchange_weak(cur, cur | LOCK_BIT, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(Version::from_raw_unlocked(cur));
                }
            }
            match strategy {
                LockStrategy::Spin => {
                    if !breaker.spin() {
                        return Err(StoError::LockTimeout);
                    }
                }
                LockStrategy::Mutex => std::thread::yield_now(),
            }
        }
    }

    /// Clears the lock bit without bumping the counter. Used when an
    /// installed write turned out to be a no-op (see [`Self::publish`]).
    pub fn unlock(&self) {
        let cur = self.word.load(Ordering::Relaxed);
        debug_assert!(Self::is_locked_raw(cur), "unlock called on a slot that wasn't locked");
        self.word.store(cur & !LOCK_BIT, Ordering::Release);
    }

    /// Publishes a new version and clears the lock bit. Preconditions: the
    /// caller holds the lock. The counter is bumped by exactly one; a
    /// counter at [`MAX_COUNTER`] is a contract violation rather than a
    /// silent wraparound into the lock bit.
    pub fn publish(&self) -> Result<(), StoError> {
        let cur = self.word.load(Ordering::Relaxed);
        debug_assert!(Self::is_locked_raw(cur), "publish called on a slot that wasn't locked");
        let counter = cur & !LOCK_BIT;
        if counter >= MAX_COUNTER {
            return Err(StoError::ContractViolation(
                "version counter reached its maximum representable value".into(),
            ));
        }
        self.word.store(counter + 1, Ordering::Release);
        Ok(())
    }

    /// `true` iff the slot is currently unlocked and its version equals
    /// `observed`. A locked slot is always a conflict here: use
    /// [`Self::check_masked`] instead when the caller itself holds this
    /// slot's lock.
    pub fn check(&self, observed: Version) -> bool {
        let cur = self.load_raw();
        !Self::is_locked_raw(cur) && Version::from_raw_unlocked(cur) == observed
    }

    /// Like [`Self::check`], but masks out the lock bit before comparing
    /// instead of treating a locked slot as an automatic conflict. For use
    /// when the caller itself holds the lock (a read-modify-write item):
    /// the lock bit being set is then expected, not a conflict, and only a
    /// counter change indicates a genuine intervening commit. Mirrors the
    /// original C++ `(version ^ observed) & ~lock_bit`.
    pub fn check_masked(&self, observed: Version) -> bool {
        let cur = self.load_raw();
        Version::from_raw_unlocked(cur) == observed
    }

    /// Seqlock-style read helper: invokes `read` to sample a value guarded
    /// by this version word, retrying until two version loads bracketing
    /// the read agree and the slot was unlocked throughout. Returns the
    /// value together with the version it was read under.
    pub fn seqlock_read<T, F>(&self, mut read: F) -> (T, Version)
    where
        F: FnMut() -> T,
    {
        loop {
            let v1 = self.load_raw();
            if Self::is_locked_raw(v1) {
                std::hint::spin_loop();
                continue;
            }
            std::sync::atomic::fence(Ordering::Acquire);
            let val = read();
            std::sync::atomic::fence(Ordering::Acquire);
            let v2 = self.load_raw();
            if v1 == v2 {
                return (val, Version::from_raw_unlocked(v1));
            }
        }
    }
}
