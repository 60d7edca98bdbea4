// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-process invalidation broadcast for the gatekeeper permissions engine.
//!
//! Several engine instances sharing one storage backend use the [`Messenger`] to tell each other
//! about mutations, so peers can drop stale caches and re-read the affected state. The wire format
//! is a single line of text, see [`Message`]. How messages travel is up to the [`Transport`]
//! implementation, an in-process [`MemoryHub`] is included.
mod config;
mod dedup;
mod message;
mod messenger;
mod transport;

pub use config::{DEFAULT_CHANNEL_CAPACITY, MessengerConfig};
pub use dedup::{DEFAULT_DEDUP_WINDOW, DedupWindow};
pub use message::{ID_LENGTH, MESSAGE_PREFIX, Message, MessageError, MessageId, MessageKind, PingId};
pub use messenger::{Builder, Messenger, MessengerError};
#[cfg(feature = "memory")]
pub use transport::{MemoryHub, MemoryTransport};
pub use transport::{Transport, TransportError};
