// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::MessengerConfig;
use crate::dedup::DedupWindow;
use crate::message::{Message, MessageError, MessageId, MessageKind, PingId};
use crate::transport::{Transport, TransportError};

/// Broadcasts invalidation notices to other engine instances and receives theirs.
///
/// Outgoing messages get a fresh random id which is remembered before sending, so when the
/// transport echoes a message back to its sender it is dropped like any other duplicate.
/// Accepted incoming messages are delivered to every receiver obtained through
/// [`Messenger::subscribe`].
///
/// Messages are hints only. Recipients re-read authoritative state from storage and no ordering
/// between messages is guaranteed.
pub struct Messenger<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    ping_id: PingId,
    transport: T,
    dedup: Mutex<DedupWindow>,
    tx: broadcast::Sender<Message>,
    cancel: CancellationToken,
}

impl<T> Clone for Messenger<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Messenger<T>
where
    T: Transport,
{
    pub fn builder(transport: T) -> Builder<T> {
        Builder::new(transport)
    }

    /// Identifier of this instance, sent along with every message.
    pub fn ping_id(&self) -> &PingId {
        &self.inner.ping_id
    }

    /// Sends a message of the given kind to all other instances.
    pub async fn send(&self, kind: MessageKind) -> Result<MessageId, MessengerError> {
        if self.is_closed() {
            return Err(MessengerError::Closed);
        }

        let message = Message::new(self.inner.ping_id.clone(), kind);
        let encoded = message.encode()?;

        self.inner.dedup.lock().check_and_insert(&message.id);
        self.inner.transport.send_outgoing(encoded).await?;

        debug!(id = %message.id, kind = ?message.kind, "sent message");
        Ok(message.id)
    }

    /// Handles raw text received by the transport.
    ///
    /// Returns the decoded message if it was accepted or `None` if it was a duplicate.
    pub fn consume_incoming(&self, raw: &str) -> Result<Option<Message>, MessageError> {
        let message = Message::decode(raw)?;

        if self.inner.dedup.lock().check_and_insert(&message.id) {
            trace!(id = %message.id, "drop duplicate message");
            return Ok(None);
        }

        debug!(
            id = %message.id,
            ping_id = %message.ping_id,
            kind = ?message.kind,
            "received message"
        );

        // Without subscribers the message has no effect.
        let _ = self.inner.tx.send(message.clone());
        Ok(Some(message))
    }

    /// Subscribes to accepted incoming messages.
    ///
    /// Only messages accepted _after_ calling this method are received.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inner.tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stops receiving and releases the transport.
    pub async fn close(&self) -> Result<(), MessengerError> {
        if self.is_closed() {
            return Ok(());
        }
        self.inner.cancel.cancel();
        self.inner.transport.close().await?;
        debug!(ping_id = %self.inner.ping_id, "closed messenger");
        Ok(())
    }

    /// Drains a transport-provided receiver until the messenger is closed.
    fn spawn_receiver(&self, mut rx: broadcast::Receiver<String>) {
        let messenger = self.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            loop {
                let raw = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = rx.recv() => result,
                };

                match raw {
                    Ok(raw) => {
                        if let Err(err) = messenger.consume_incoming(&raw) {
                            warn!(%err, "ignore malformed incoming message");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "messenger lagged behind transport");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            trace!("stop messenger receiver");
        });
    }
}

pub struct Builder<T> {
    transport: T,
    config: Option<MessengerConfig>,
    ping_id: Option<PingId>,
}

impl<T> Builder<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: None,
            ping_id: None,
        }
    }

    pub fn config(mut self, config: MessengerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the instance identifier, a random one is generated otherwise.
    pub fn ping_id(mut self, ping_id: PingId) -> Self {
        self.ping_id = Some(ping_id);
        self
    }

    /// Creates the messenger.
    ///
    /// Needs to be called from within a tokio runtime if the transport delivers incoming messages
    /// through a channel.
    pub fn spawn(self) -> Messenger<T> {
        let config = self.config.unwrap_or_default();
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));
        let incoming = self.transport.incoming();

        let messenger = Messenger {
            inner: Arc::new(Inner {
                ping_id: self.ping_id.unwrap_or_else(PingId::random),
                transport: self.transport,
                dedup: Mutex::new(DedupWindow::new(config.dedup_window)),
                tx,
                cancel: CancellationToken::new(),
            }),
        };

        if let Some(rx) = incoming {
            messenger.spawn_receiver(rx);
        }

        messenger
    }
}

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("messenger is closed")]
    Closed,

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
