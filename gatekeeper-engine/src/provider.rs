// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide access to one running engine.
//!
//! Collaborators should receive an [`Engine`] handle explicitly. Hosts which can not pass it
//! around (plugin entry points, callbacks registered with foreign code) register the engine here
//! once and look it up later.
use std::any::Any;

use gatekeeper_messenger::Transport;
use gatekeeper_store::Storage;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::engine::Engine;

static PROVIDER: RwLock<Option<Box<dyn Any + Send + Sync>>> = parking_lot::const_rwlock(None);

/// Makes the engine available process-wide, replacing any engine registered before.
pub fn register<S, T>(engine: Engine<S, T>)
where
    S: Storage,
    T: Transport,
{
    debug!(?engine, "register engine");
    *PROVIDER.write() = Some(Box::new(engine));
}

/// Removes the registered engine. Returns `true` if there was one.
pub fn unregister() -> bool {
    PROVIDER.write().take().is_some()
}

/// Returns the registered engine.
pub fn get<S, T>() -> Result<Engine<S, T>, ProviderError>
where
    S: Storage,
    T: Transport,
{
    let provider = PROVIDER.read();
    let engine = provider.as_ref().ok_or(ProviderError::NotRegistered)?;
    engine
        .downcast_ref::<Engine<S, T>>()
        .cloned()
        .ok_or(ProviderError::TypeMismatch)
}

/// Returns the registered engine or `None` if there is none of this type.
pub fn get_safe<S, T>() -> Option<Engine<S, T>>
where
    S: Storage,
    T: Transport,
{
    get().ok()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no engine is registered, it is either not running or was shut down")]
    NotRegistered,

    #[error("the registered engine uses a different storage or transport")]
    TypeMismatch,
}
