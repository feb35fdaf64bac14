// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transactional object contract. Every shared datum that wants to
//! participate in a [`crate::transaction::Transaction`] implements this
//! trait over whichever `key` encoding makes sense for it (an array index,
//! a constant `0` for a scalar box, a hashed key for an index, ...).
//!
//! The trait is intentionally non-generic over the stored value type so
//! that a single transaction can mix heterogeneous objects in its read and
//! write sets: values cross the boundary as `Box<dyn Any + Send>`, and each
//! object owns the encoding on its own side of that box.

use std::any::Any;

use crate::error::StoError;
use crate::version::Version;

/// Five-operation capability set every storage object must provide, plus a
/// stable identifier used for deterministic global lock ordering.
pub trait TObject: Send + Sync {
    /// A totally-ordered identifier for `key` within this object. Combined
    /// with [`Self::object_addr`] by the commit engine to produce a global
    /// sort key across heterogeneous objects.
    fn uid(&self, key: u64) -> u64;

    /// A stable address for this object instance, used as the high half of
    /// the global sort key. Implementations typically return the address
    /// of their own heap allocation (e.g. via `Arc::as_ptr`).
    fn object_addr(&self) -> usize;

    /// Advisory snapshot: is the slot at `key` currently write-locked by
    /// anyone?
    fn is_locked(&self, key: u64) -> bool;

    /// Acquire the write lock on the slot at `key`. May spin; returns
    /// [`StoError::LockTimeout`] if the spin budget is exceeded.
    fn lock(&self, key: u64) -> Result<(), StoError>;

    /// `true` iff the slot's version equals `observed`. When
    /// `locked_by_caller` is `false`, a slot found locked by anyone is
    /// always a conflict. When `true` (this item is also in the caller's
    /// own write set, so the caller holds the lock), the lock bit is
    /// ignored and only the underlying counter is compared — the caller's
    /// own lock is expected, not a conflict, but a counter change still
    /// means someone else committed in between.
    fn check(&self, key: u64, observed: Version, locked_by_caller: bool) -> bool;

    /// Publish `value` to the slot at `key` and stamp it with
    /// `commit_tid`. Precondition: the slot is locked by the caller.
    /// Implementations may short-circuit (skip the version bump) if the
    /// buffered value is observationally equal to the current value.
    ///
    /// Returns `true` if the object already released the write lock as
    /// part of installing (the usual case), `false` if the commit engine
    /// still needs to call [`Self::unlock`] itself.
    fn install(&self, key: u64, value: Box<dyn Any + Send>, commit_tid: u64) -> bool;

    /// Release the write lock on the slot at `key`. Precondition: locked.
    fn unlock(&self, key: u64);
}
