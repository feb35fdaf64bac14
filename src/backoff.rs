// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A small exponential busy-breaker used between spin-CAS retries.
//!
//! Grounded on the teacher's `BusyBreaker`: keeps the CPU busy for a
//! hardware-hinted pause that doubles every failed attempt, up to a cap,
//! rather than yielding to the scheduler outright.

use std::sync::atomic::{AtomicUsize, Ordering};

const MAX_WAIT_UNITS: usize = 10;

/// Exponential spin/pause backoff with a bounded attempt counter.
#[derive(Default)]
pub struct Breaker {
    unit: AtomicUsize,
}

impl Breaker {
    /// Spins for `2^unit` pause hints and advances `unit`. Returns `false`
    /// once the unit cap has been reached without resetting it; callers
    /// use this as the signal to give up and surface a timeout.
    pub fn spin(&self) -> bool {
        let unit = self.unit.load(Ordering::Acquire);
        if unit > MAX_WAIT_UNITS {
            return false;
        }
        for _ in 0..(1usize << unit) {
            std::hint::spin_loop();
        }
        self.unit.store(unit + 1, Ordering::Release);
        true
    }

    /// Resets the backoff, for reuse across transaction retries.
    pub fn reset(&self) {
        self.unit.store(0, Ordering::Release);
    }
}
