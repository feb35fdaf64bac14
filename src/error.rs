// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error as DeriveError;

/// Error taxonomy for the transactional object protocol.
///
/// `Conflict` is the only variant a caller should expect to see returned
/// from the public API in the steady state: it is always local and always
/// recovered by retrying (or by the caller giving up). Every other variant
/// indicates a programmer error in an object implementation and is treated
/// as fatal by the commit engine.
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum StoError {
    /// Read-set validation failed, or a write lock could not be acquired
    /// within its spin budget.
    #[error("transaction conflict")]
    Conflict,

    /// A write lock could not be acquired before the spin budget elapsed.
    /// Folded into `Conflict` by the time it reaches `Transaction::try_commit`,
    /// kept distinct here so object implementations can log the cause.
    #[error("lock acquisition timed out")]
    LockTimeout,

    /// An object returned state inconsistent with the protocol (e.g.
    /// `install` called without holding the lock). Programmer bug.
    #[error("object violated the transactional contract: {0}")]
    ContractViolation(String),

    /// The read or write set exceeded a configured maximum size.
    #[error("transaction exceeded its item capacity ({0})")]
    CapacityExceeded(usize),

    /// Object-specific: e.g. an array index out of range.
    #[error("invalid key for this object: {0}")]
    InvalidKey(u64),
}
