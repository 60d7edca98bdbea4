// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;
use tokio::sync::broadcast;

/// Channel carrying encoded messages between engine instances.
///
/// Transports need to deliver every sent message at least once to every other instance. They
/// hand received text to [`Messenger::consume_incoming`](crate::Messenger::consume_incoming),
/// either by calling it directly from a host callback or by exposing a receiver through
/// [`Transport::incoming`] which the messenger then drains itself.
pub trait Transport: Send + Sync + 'static {
    /// Publishes an encoded message to all other instances.
    fn send_outgoing(&self, encoded: String)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Flushes pending messages and releases channel registrations.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receiver of raw incoming messages, if this transport delivers through a channel.
    fn incoming(&self) -> Option<broadcast::Receiver<String>> {
        None
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport failed sending message: {0}")]
    Send(String),
}

#[cfg(feature = "memory")]
pub use memory::{MemoryHub, MemoryTransport};

#[cfg(feature = "memory")]
mod memory {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::broadcast;
    use tracing::trace;

    use super::{Transport, TransportError};

    /// In-process broadcast bus connecting several engines, for example in tests or when running
    /// multiple instances inside one host process.
    ///
    /// Every transport of the hub receives every message, including its own. Senders recognise
    /// their own messages by id and drop them.
    #[derive(Clone, Debug)]
    pub struct MemoryHub {
        tx: broadcast::Sender<String>,
    }

    impl MemoryHub {
        pub fn new(capacity: usize) -> Self {
            let (tx, _) = broadcast::channel(capacity.max(1));
            Self { tx }
        }

        /// Creates a transport attached to this hub.
        pub fn transport(&self) -> MemoryTransport {
            MemoryTransport {
                hub: self.tx.clone(),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Default for MemoryHub {
        fn default() -> Self {
            Self::new(256)
        }
    }

    #[derive(Clone, Debug)]
    pub struct MemoryTransport {
        hub: broadcast::Sender<String>,
        closed: Arc<AtomicBool>,
    }

    impl Transport for MemoryTransport {
        async fn send_outgoing(&self, encoded: String) -> Result<(), TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            trace!(message = %encoded, "send outgoing");
            // Nobody listening is fine, there are no peers to notify.
            let _ = self.hub.send(encoded);
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn incoming(&self) -> Option<broadcast::Receiver<String>> {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            Some(self.hub.subscribe())
        }
    }
}
