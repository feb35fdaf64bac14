// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration shared by storage objects and the epoch
//! reclamation collaborator.

/// Which synchronization primitive a [`crate::array::TArray`] or
/// [`crate::tbox::TBox`] uses to guard its slots. The distilled spec
/// describes this as a compile-time switch (`#ifdef SPIN_LOCK` in the
/// original C++); since our objects already take a [`StoConfig`] at
/// construction, it is exposed as a runtime choice instead, for
/// architectures where a useful spin primitive isn't available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// Spin-CAS on the version word's lock bit (the default).
    Spin,
    /// Yield to the scheduler between failed CAS attempts instead of
    /// busy-spinning. Slower under light contention but avoids burning CPU
    /// while waiting.
    Mutex,
}

impl Default for LockStrategy {
    fn default() -> Self {
        LockStrategy::Spin
    }
}

/// Configuration for a `Sto` embedding.
#[derive(Debug, Clone, Copy)]
pub struct StoConfig {
    /// Locking strategy used by sample storage objects.
    pub spin_vs_mutex: LockStrategy,
    /// How often the epoch advancer thread runs, in milliseconds.
    pub epoch_cycle_ms: u64,
    /// Whether to start the epoch advancer thread at all.
    pub enable_gc: bool,
}

impl Default for StoConfig {
    fn default() -> Self {
        Self {
            spin_vs_mutex: LockStrategy::default(),
            epoch_cycle_ms: 50,
            enable_gc: false,
        }
    }
}
