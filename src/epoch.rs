// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Thread bootstrap and the epoch reclamation collaborator contract.
//!
//! The transactional object protocol never frees memory itself (distilled
//! spec §5): it only requires that no thread dereference an object whose
//! destruction epoch has passed. This module gives an external collaborator
//! (an object author implementing a richer, GC'd structure) a place to
//! register quiescent state and observe a global epoch counter advance; it
//! does not implement any reclamation policy on top of that counter.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace};

thread_local! {
    static THREAD_ID: Cell<Option<usize>> = Cell::new(None);
}

/// Registers the calling thread with id `id`. Must be called exactly once
/// per worker thread before it begins opening transactions.
pub fn set_thread_id(id: usize) {
    THREAD_ID.with(|cell| cell.set(Some(id)));
    REGISTRY.register(id);
    debug!("sto: thread {} registered", id);
}

/// The id registered for the calling thread via [`set_thread_id`], or
/// `None` if it was never called on this thread.
pub fn current_thread_id() -> Option<usize> {
    THREAD_ID.with(|cell| cell.get())
}

/// Marks the calling thread quiescent for the purposes of epoch
/// advancement. Object authors call this between transactions (or the
/// embedding harness calls it on their behalf); the transactional object
/// protocol itself does not require it.
pub fn thread_init() {
    if let Some(id) = current_thread_id() {
        REGISTRY.mark_quiescent(id);
    }
}

struct Registry {
    quiescent: Mutex<std::collections::HashMap<usize, bool>>,
    epoch: AtomicU64,
}

impl Registry {
    fn new() -> Self {
        Self {
            quiescent: Mutex::new(std::collections::HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    fn register(&self, id: usize) {
        self.quiescent.lock().unwrap().insert(id, false);
    }

    fn mark_quiescent(&self, id: usize) {
        if let Some(flag) = self.quiescent.lock().unwrap().get_mut(&id) {
            *flag = true;
        }
    }

    fn try_advance(&self) -> bool {
        let mut map = self.quiescent.lock().unwrap();
        if map.is_empty() || map.values().all(|quiescent| *quiescent) {
            for flag in map.values_mut() {
                *flag = false;
            }
            self.epoch.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

lazy_static::lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

/// Current global epoch, as last advanced by an [`EpochAdvancer`].
pub fn current_epoch() -> u64 {
    REGISTRY.epoch()
}

/// Background thread that periodically advances the global epoch once
/// every registered thread has reported quiescence since the last advance.
/// Started only when [`crate::config::StoConfig::enable_gc`] is set.
pub struct EpochAdvancer {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicUsize>,
}

impl EpochAdvancer {
    pub fn start(cycle_ms: u64) -> Self {
        let stop = Arc::new(AtomicUsize::new(0));
        let stop_clone = stop.clone();
        let handle = std::thread::spawn(move || {
            while stop_clone.load(Ordering::Acquire) == 0 {
                std::thread::sleep(Duration::from_millis(cycle_ms));
                if REGISTRY.try_advance() {
                    trace!("sto: epoch advanced to {}", REGISTRY.epoch());
                }
            }
        });
        Self {
            handle: Some(handle),
            stop,
        }
    }
}

impl Drop for EpochAdvancer {
    fn drop(&mut self) {
        self.stop.store(1, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_once_every_registered_thread_is_quiescent() {
        let registry = Registry::new();
        registry.register(1);
        registry.register(2);

        assert!(!registry.try_advance());

        registry.mark_quiescent(1);
        assert!(!registry.try_advance());

        registry.mark_quiescent(2);
        assert!(registry.try_advance());
        assert_eq!(registry.epoch(), 1);
    }
}
