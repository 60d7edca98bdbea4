// SPDX-License-Identifier: MIT OR Apache-2.0

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, MutexGuard};

use crate::cache::CachedData;

/// In-memory slot of a loaded user or group.
///
/// The node set sits behind a synchronous read-write lock which the resolver reads through, so
/// permission checks never wait on storage. Persistence round-trips additionally hold the
/// asynchronous io-lock for their whole duration, which serializes loads and saves of the same
/// holder without blocking readers.
///
/// The io-lock is not reentrant. Code holding it must not call into operations acquiring it
/// again.
#[derive(Debug)]
pub struct HolderCell<T> {
    state: RwLock<T>,
    io_lock: Mutex<()>,
    cache: CachedData,
}

impl<T> HolderCell<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: RwLock::new(state),
            io_lock: Mutex::new(()),
            cache: CachedData::new(),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.state.write()
    }

    /// Waits for exclusive access to persistence of this holder.
    pub async fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock().await
    }

    pub fn cache(&self) -> &CachedData {
        &self.cache
    }
}
