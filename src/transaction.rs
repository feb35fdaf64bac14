// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transaction context: thread-local state machine owning the read and
//! write sets of the currently running transaction, and driving the commit
//! protocol described in the distilled specification's §4.4.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::epoch;
use crate::item::TransItem;
use crate::object::TObject;
use crate::tid::GLOBAL_COMMIT_TID;
use crate::version::Version;

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
    Committing,
    Committed,
    Aborted,
}

/// Owns the read set and write set for one in-flight transaction on the
/// calling thread, and drives `try_commit`/`abort`.
pub struct Transaction {
    state: State,
    items: Vec<TransItem>,
    /// `(object_addr, uid) -> index into items`, for O(1) dedup on repeat
    /// access to the same `(object, key)` pair.
    index: HashMap<(usize, u64), usize>,
    commit_tid: Option<u64>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            state: State::Idle,
            items: Vec::new(),
            index: HashMap::new(),
            commit_tid: None,
        }
    }
}

impl Transaction {
    /// Precondition: `Idle`. Clears the read/write sets and transitions to
    /// `Active`.
    pub fn begin(&mut self) {
        assert_eq!(self.state, State::Idle, "begin() called on a transaction already in flight");
        self.items.clear();
        self.index.clear();
        self.commit_tid = None;
        self.state = State::Active;
        trace!(
            "sto: txn begin on thread {:?}",
            epoch::current_thread_id()
        );
    }

    fn require_active(&self) {
        assert_eq!(
            self.state,
            State::Active,
            "transaction item access outside of an Active transaction"
        );
    }

    /// Returns the item for `(object, key)`, creating it if this is the
    /// first access to that pair in this transaction.
    pub fn item(&mut self, object: &Arc<dyn TObject>, key: u64) -> &mut TransItem {
        self.require_active();
        let sort_key = (object.object_addr(), object.uid(key));
        if let Some(&idx) = self.index.get(&sort_key) {
            return &mut self.items[idx];
        }
        let idx = self.items.len();
        self.items.push(TransItem::new(object.clone(), key));
        self.index.insert(sort_key, idx);
        &mut self.items[idx]
    }

    /// Whether this transaction has accumulated any item at all (used by
    /// callers that want to skip committing a transaction that never
    /// touched shared state).
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The commit protocol: sort the write set, acquire locks in that
    /// order, validate the read set, allocate a commit TID, install, then
    /// unlock. Returns `true` on success, `false` on conflict. Never
    /// returns an error: a genuine object misbehavior is a programmer bug
    /// and panics instead (see the crate's error handling design).
    pub fn try_commit(&mut self) -> bool {
        self.require_active();
        self.state = State::Committing;

        // Step 2: sort the write set by (object_addr, uid) ascending. We
        // sort indices rather than the items themselves so the read-set
        // validation loop below can still iterate in original item order.
        let mut write_order: Vec<usize> = (0..self.items.len())
            .filter(|&i| self.items[i].has_write())
            .collect();
        write_order.sort_by_key(|&i| self.items[i].sort_key());

        // Step 3: acquire write locks in sorted order.
        let mut acquired: Vec<usize> = Vec::with_capacity(write_order.len());
        for &i in &write_order {
            let item = &mut self.items[i];
            match item.object.lock(item.key) {
                Ok(()) => {
                    item.lock_acquired = true;
                    item.needs_unlock = true;
                    acquired.push(i);
                }
                Err(_) => {
                    self.release(&acquired);
                    self.state = State::Aborted;
                    self.state = State::Idle;
                    debug!("sto: commit failed acquiring write locks");
                    return false;
                }
            }
        }

        // Step 5: validate the read set. An item that is also a write item
        // (same object+key) is still validated — the transaction itself
        // holds that slot's lock, so the lock bit is not the conflict
        // signal, but a counter that moved since the read still is (a
        // read-modify-write raced against a concurrent committed write).
        for item in &self.items {
            if !item.has_read() {
                continue;
            }
            let observed = item
                .read_version
                .expect("has_read() implies read_version is set");
            if !item.object.check(item.key, observed, item.has_write()) {
                self.release(&acquired);
                self.state = State::Aborted;
                self.state = State::Idle;
                debug!("sto: commit failed validating read set");
                return false;
            }
        }

        // Step 6: allocate the commit TID.
        let commit_tid = GLOBAL_COMMIT_TID.next();
        self.commit_tid = Some(commit_tid);

        // Step 7: install every write, in the same sorted order locks were
        // acquired in (order doesn't affect correctness here, but matches
        // the distilled spec's presentation).
        for &i in &write_order {
            let item = &mut self.items[i];
            let value = item.take_write_value();
            if item.object.install(item.key, value, commit_tid) {
                item.needs_unlock = false;
            }
        }

        // Step 8: unlock whatever wasn't already unlocked by install().
        for &i in &write_order {
            let item = &self.items[i];
            if item.needs_unlock {
                item.object.unlock(item.key);
            }
        }

        self.state = State::Committed;
        self.state = State::Idle;
        debug!("sto: txn committed at tid {}", commit_tid);
        true
    }

    /// Releases every lock this transaction actually acquired, in reverse
    /// acquisition order, and discards both sets.
    fn release(&mut self, acquired: &[usize]) {
        for &i in acquired.iter().rev() {
            let item = &self.items[i];
            item.object.unlock(item.key);
        }
    }

    /// Discards the read/write sets and transitions back to `Idle` without
    /// touching any shared state. No-op on an already-idle transaction.
    pub fn abort(&mut self) {
        if self.state == State::Idle {
            return;
        }
        self.items.clear();
        self.index.clear();
        self.state = State::Idle;
        warn!("sto: txn aborted by caller");
    }

    /// The TID allocated to this transaction's most recent successful
    /// commit, if any.
    pub fn commit_tid(&self) -> Option<u64> {
        self.commit_tid
    }
}

thread_local! {
    static CURRENT: RefCell<Transaction> = RefCell::new(Transaction::default());
}

/// Thread-local facade mirroring the embedding API: `Sto::start()`,
/// `Sto::item(object, key)`, `Sto::try_commit()`, `Sto::abort()`, each
/// operating on the calling thread's single in-flight transaction.
pub struct Sto;

impl Sto {
    /// Begins a new transaction on the calling thread.
    pub fn start() {
        CURRENT.with(|tx| tx.borrow_mut().begin());
    }

    /// Acquires or creates the item for `(object, key)` in the calling
    /// thread's active transaction, and runs `with` against it.
    pub fn item<R>(object: &Arc<dyn TObject>, key: u64, with: impl FnOnce(&mut TransItem) -> R) -> R {
        CURRENT.with(|tx| with(tx.borrow_mut().item(object, key)))
    }

    /// Attempts to commit the calling thread's active transaction.
    pub fn try_commit() -> bool {
        CURRENT.with(|tx| tx.borrow_mut().try_commit())
    }

    /// Aborts the calling thread's active transaction.
    pub fn abort() {
        CURRENT.with(|tx| tx.borrow_mut().abort());
    }

    /// The commit TID of the calling thread's most recent successful
    /// commit.
    pub fn commit_tid() -> Option<u64> {
        CURRENT.with(|tx| tx.borrow().commit_tid())
    }

    /// Runs `body` inside a transaction, retrying on conflict until it
    /// commits or `max_attempts` is exhausted. This is a convenience on
    /// top of the core protocol, not part of it: the core only promises
    /// that `try_commit` returns `false` on conflict and leaves retry
    /// policy to the caller.
    pub fn retry<F>(max_attempts: usize, mut body: F) -> bool
    where
        F: FnMut(),
    {
        let breaker = crate::backoff::Breaker::default();
        for attempt in 0..max_attempts {
            Sto::start();
            body();
            if Sto::try_commit() {
                return true;
            }
            Sto::abort();
            if attempt + 1 < max_attempts {
                breaker.spin();
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::TArray;
    use crate::config::StoConfig;

    #[test]
    fn item_access_is_deduplicated_within_a_transaction() {
        let array: Arc<dyn TObject> = Arc::new(TArray::<u64, 4>::new(StoConfig::default()));
        let mut tx = Transaction::default();
        tx.begin();
        tx.item(&array, 0).add_write(Box::new(5u64));
        tx.item(&array, 0).add_write(Box::new(9u64));
        assert_eq!(tx.items.len(), 1, "same (object, key) must not create two items");
        assert_eq!(*tx.items[0].write_value::<u64>(), 9);
    }

    #[test]
    fn empty_write_set_commit_never_bumps_a_version() {
        let array = Arc::new(TArray::<u64, 4>::new(StoConfig::default()));
        let obj: Arc<dyn TObject> = array.clone();
        let v0 = array.version_of(0);

        let mut tx = Transaction::default();
        tx.begin();
        let observed = Version::from_raw_unlocked(array.version_of(0));
        tx.item(&obj, 0).add_read(observed);
        assert!(tx.try_commit());

        assert_eq!(array.version_of(0), v0);
    }
}
