// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction, per-object bookkeeping entries.

use std::any::Any;
use std::sync::Arc;

use crate::object::TObject;
use crate::version::Version;

/// A single `(object, key)` entry in a transaction's item list. Created on
/// first access and merged in place on subsequent accesses to the same
/// `(object, key)` pair: a read after a write returns the buffered write,
/// and a write overwrites any previously buffered value for that key.
pub struct TransItem {
    pub(crate) object: Arc<dyn TObject>,
    pub(crate) key: u64,
    pub(crate) read_version: Option<Version>,
    pub(crate) write_value: Option<Box<dyn Any + Send>>,
    pub(crate) needs_unlock: bool,
    pub(crate) lock_acquired: bool,
}

impl TransItem {
    pub(crate) fn new(object: Arc<dyn TObject>, key: u64) -> Self {
        Self {
            object,
            key,
            read_version: None,
            write_value: None,
            needs_unlock: false,
            lock_acquired: false,
        }
    }

    /// Sort/dedup key: `(object address, object-local uid)`, totally
    /// ordered across every object kind participating in a transaction.
    pub(crate) fn sort_key(&self) -> (usize, u64) {
        (self.object.object_addr(), self.object.uid(self.key))
    }

    /// Records a read observation. Idempotent for repeated observations of
    /// the same version; a second call with a different version replaces
    /// the stored one (the most recent observation governs validation).
    pub fn add_read(&mut self, observed: Version) {
        self.read_version = Some(observed);
    }

    /// Buffers a write, replacing any value previously buffered in this
    /// transaction for this key.
    pub fn add_write(&mut self, value: Box<dyn Any + Send>) {
        self.write_value = Some(value);
    }

    pub fn has_read(&self) -> bool {
        self.read_version.is_some()
    }

    pub fn has_write(&self) -> bool {
        self.write_value.is_some()
    }

    pub fn read_version(&self) -> Option<Version> {
        self.read_version
    }

    /// Typed accessor into the buffered write value. Panics (a
    /// `ContractViolation`-class bug) if no write was buffered, or if `V`
    /// does not match the type that was buffered — both indicate a caller
    /// bug rather than a recoverable condition.
    pub fn write_value<V: 'static>(&self) -> &V {
        self.write_value
            .as_ref()
            .expect("write_value() called on an item with no buffered write")
            .downcast_ref::<V>()
            .expect("write_value() called with the wrong type for this item")
    }

    pub(crate) fn take_write_value(&mut self) -> Box<dyn Any + Send> {
        self.write_value
            .take()
            .expect("take_write_value() called on an item with no buffered write")
    }
}
