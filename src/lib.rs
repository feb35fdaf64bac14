// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # sto — transactional objects
//!
//! An optimistic concurrency control (OCC) runtime for in-memory storage
//! objects. Transactions track a thread-local read set and write set,
//! validate against a packed version word (lock bit + monotonic counter)
//! per slot, and commit across any number of heterogeneous objects through
//! a uniform five-operation contract: `lock`, `is_locked`, `check`,
//! `install`, `unlock`.
//!
//! ```
//! use std::sync::Arc;
//! use sto::{array::TArray, config::StoConfig, transaction::Sto};
//!
//! let accounts = Arc::new(TArray::<i64, 4>::new(StoConfig::default()));
//!
//! let a = accounts.clone();
//! let committed = Sto::retry(8, move || {
//!     let balance = a.trans_read(0);
//!     a.trans_write(0, balance + 10);
//! });
//! assert!(committed);
//! assert_eq!(accounts.read(0), 10);
//! ```
#![allow(clippy::type_complexity)]

pub mod array;
pub mod backoff;
pub mod config;
pub mod epoch;
pub mod error;
pub mod item;
pub mod object;
pub mod tbox;
pub mod tid;
pub mod transaction;
pub mod version;

pub use error::StoError;
pub use item::TransItem;
pub use object::TObject;
pub use transaction::{Sto, Transaction};
pub use version::Version;
