// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence contract of the gatekeeper permissions engine.
//!
//! The engine never talks to a database directly. Everything it persists or re-reads goes
//! through the [`Storage`] trait, concrete backends (files, SQL, document stores) implement it
//! outside of this crate. An in-memory implementation is provided for tests and single-process
//! deployments.
#[cfg(feature = "memory")]
pub mod memory;
mod models;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod traits;

#[cfg(feature = "memory")]
pub use memory::MemoryStorage;
pub use models::{GroupData, HeldPermission, LogEntry, LogTarget, TrackData, UserData};
pub use traits::{Storage, StorageError};
