// SPDX-License-Identifier: MIT OR Apache-2.0

//! Textual envelope exchanged between engine instances.
//!
//! Every message is a single UTF-8 line `LPX|<msg-id>|<ping-id>|<kind>[|payload]`. The message
//! id is random and used by recipients to drop duplicates, the ping id identifies the sending
//! instance.
use std::fmt::Display;
use std::str::FromStr;

use gatekeeper_store::LogEntry;
use thiserror::Error;
use uuid::Uuid;

/// First field of every envelope.
pub const MESSAGE_PREFIX: &str = "LPX";

/// Length of generated message and ping ids.
pub const ID_LENGTH: usize = 16;

const SEPARATOR: char = '|';

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

const KIND_UPDATE: &str = "UPDATE";
const KIND_USER_UPDATE: &str = "USER_UPDATE";
const KIND_LOG: &str = "LOG";

/// Random identifier drawn from the base32 alphabet.
fn random_id() -> String {
    let bytes: [u8; ID_LENGTH] = rand::random();
    bytes
        .iter()
        .map(|byte| BASE32_ALPHABET[(byte % 32) as usize] as char)
        .collect()
}

fn validate_id(value: &str) -> Result<(), MessageError> {
    if value.is_empty() || value.contains(SEPARATOR) {
        return Err(MessageError::InvalidId(value.to_string()));
    }
    Ok(())
}

/// Identifier of a single message, used for deduplication.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn random() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MessageId {
    type Err = MessageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_id(value)?;
        Ok(Self(value.to_string()))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a sending engine instance.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PingId(String);

impl PingId {
    pub fn random() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PingId {
    type Err = MessageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_id(value)?;
        Ok(Self(value.to_string()))
    }
}

impl Display for PingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a message asks recipients to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Global data changed, recipients flush caches and re-read groups and tracks.
    Update,

    /// One user changed, recipients reload that user if they have it loaded.
    UserUpdate(Uuid),

    /// An administrative action was logged.
    Log(LogEntry),
}

impl MessageKind {
    fn tag(&self) -> &'static str {
        match self {
            MessageKind::Update => KIND_UPDATE,
            MessageKind::UserUpdate(_) => KIND_USER_UPDATE,
            MessageKind::Log(_) => KIND_LOG,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub ping_id: PingId,
    pub kind: MessageKind,
}

impl Message {
    /// Creates a message with a fresh random id.
    pub fn new(ping_id: PingId, kind: MessageKind) -> Self {
        Self {
            id: MessageId::random(),
            ping_id,
            kind,
        }
    }

    /// Encodes the message into its wire representation.
    pub fn encode(&self) -> Result<String, MessageError> {
        let mut encoded = format!(
            "{MESSAGE_PREFIX}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.id,
            self.ping_id,
            self.kind.tag()
        );

        match &self.kind {
            MessageKind::Update => (),
            MessageKind::UserUpdate(uuid) => {
                encoded.push(SEPARATOR);
                encoded.push_str(&uuid.hyphenated().to_string());
            }
            MessageKind::Log(entry) => {
                let mut bytes = Vec::new();
                ciborium::ser::into_writer(entry, &mut bytes)
                    .map_err(|err| MessageError::EncodePayload(err.to_string()))?;
                encoded.push(SEPARATOR);
                encoded.push_str(&hex::encode(bytes));
            }
        }

        Ok(encoded)
    }

    /// Parses a message from its wire representation.
    pub fn decode(raw: &str) -> Result<Self, MessageError> {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let mut parts = raw.splitn(5, SEPARATOR);

        if parts.next() != Some(MESSAGE_PREFIX) {
            return Err(MessageError::MissingPrefix);
        }

        let id = parts
            .next()
            .ok_or(MessageError::MissingField("msg-id"))?
            .parse::<MessageId>()?;
        let ping_id = parts
            .next()
            .ok_or(MessageError::MissingField("ping-id"))?
            .parse::<PingId>()?;
        let tag = parts.next().ok_or(MessageError::MissingField("kind"))?;
        let payload = parts.next();

        let kind = match (tag, payload) {
            (KIND_UPDATE, None) => MessageKind::Update,
            (KIND_USER_UPDATE, Some(payload)) => {
                let uuid = Uuid::parse_str(payload)
                    .map_err(|_| MessageError::InvalidPayload(payload.to_string()))?;
                MessageKind::UserUpdate(uuid)
            }
            (KIND_LOG, Some(payload)) => {
                let bytes = hex::decode(payload)
                    .map_err(|_| MessageError::InvalidPayload(payload.to_string()))?;
                let entry = ciborium::from_reader::<LogEntry, _>(&bytes[..])
                    .map_err(|err| MessageError::DecodePayload(err.to_string()))?;
                MessageKind::Log(entry)
            }
            (KIND_UPDATE, Some(_)) => return Err(MessageError::UnexpectedPayload(tag.to_string())),
            (KIND_USER_UPDATE | KIND_LOG, None) => {
                return Err(MessageError::MissingField("payload"));
            }
            (other, _) => return Err(MessageError::UnknownKind(other.to_string())),
        };

        Ok(Self { id, ping_id, kind })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message does not start with 'LPX'")]
    MissingPrefix,

    #[error("message is missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid message id '{0}'")]
    InvalidId(String),

    #[error("unknown message kind '{0}'")]
    UnknownKind(String),

    #[error("message kind '{0}' does not carry a payload")]
    UnexpectedPayload(String),

    #[error("invalid message payload '{0}'")]
    InvalidPayload(String),

    #[error("failed encoding message payload: {0}")]
    EncodePayload(String),

    #[error("failed decoding message payload: {0}")]
    DecodePayload(String),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use gatekeeper_store::{LogEntry, LogTarget};
    use uuid::Uuid;

    use super::{ID_LENGTH, Message, MessageError, MessageId, MessageKind, PingId};

    #[test]
    fn random_ids_use_base32_alphabet() {
        let id = MessageId::random();
        assert_eq!(id.as_str().len(), ID_LENGTH);
        assert!(
            id.as_str()
                .chars()
                .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
        );
        assert_ne!(MessageId::random(), MessageId::random());
    }

    #[test]
    fn decode_bare_update() {
        let message = Message::decode("LPX|abc123|peer1|UPDATE").unwrap();
        assert_eq!(message.id.as_str(), "abc123");
        assert_eq!(message.ping_id.as_str(), "peer1");
        assert_eq!(message.kind, MessageKind::Update);
        assert_eq!(message.encode().unwrap(), "LPX|abc123|peer1|UPDATE");
    }

    #[test]
    fn user_update_payload() {
        let uuid = Uuid::new_v4();
        let message = Message::new(PingId::random(), MessageKind::UserUpdate(uuid));
        let encoded = message.encode().unwrap();
        assert!(encoded.ends_with(&format!("|USER_UPDATE|{}", uuid.hyphenated())));
        assert_eq!(Message::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn log_payload_is_hex_cbor() {
        let entry = LogEntry::new(
            Uuid::nil(),
            "console",
            LogTarget::Track {
                name: "staff".into(),
            },
            "append admin",
        );
        let message = Message::new(PingId::random(), MessageKind::Log(entry));
        let encoded = message.encode().unwrap();

        let payload = encoded.rsplit('|').next().unwrap();
        assert!(payload.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(Message::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn malformed_messages() {
        assert_matches!(Message::decode("XYZ|a|b|UPDATE"), Err(MessageError::MissingPrefix));
        assert_matches!(Message::decode("LPX|a|b"), Err(MessageError::MissingField("kind")));
        assert_matches!(Message::decode("LPX||b|UPDATE"), Err(MessageError::InvalidId(_)));
        assert_matches!(Message::decode("LPX|a|b|PING"), Err(MessageError::UnknownKind(_)));
        assert_matches!(
            Message::decode("LPX|a|b|USER_UPDATE"),
            Err(MessageError::MissingField("payload"))
        );
        assert_matches!(
            Message::decode("LPX|a|b|USER_UPDATE|not-a-uuid"),
            Err(MessageError::InvalidPayload(_))
        );
        assert_matches!(
            Message::decode("LPX|a|b|UPDATE|extra"),
            Err(MessageError::UnexpectedPayload(_))
        );
    }
}
