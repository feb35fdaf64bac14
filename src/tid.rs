// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The process-wide commit TID source: a single monotonic 64-bit counter.
//! Values issued to successful commits are strictly increasing; values
//! "wasted" by aborted commits (which never call [`CommitTid::next`]) are
//! harmless — aborts simply never observe a TID.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CommitTid {
    counter: AtomicU64,
}

impl CommitTid {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Atomically advances the counter and returns the post-increment
    /// value. TIDs start at `1`.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The most recently issued TID, or `0` if none has been issued yet.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }
}

lazy_static::lazy_static! {
    /// The single process-wide commit TID allocator shared by every
    /// transaction, regardless of which objects it touches.
    pub static ref GLOBAL_COMMIT_TID: CommitTid = CommitTid::new();
}
