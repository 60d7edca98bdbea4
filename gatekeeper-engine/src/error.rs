// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use gatekeeper_core::{ContextError, HolderError, HolderId, NodeError};
use gatekeeper_messenger::MessengerError;
use gatekeeper_store::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of engine errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed node, context or identifier.
    InvalidInput,

    /// A holder was requested which is not known.
    NotFound,

    /// The storage backend failed, retrying might help.
    StorageIo,

    /// The request contradicts existing state.
    Conflict,

    /// A track references a group which does not exist.
    DanglingReference,

    /// The operation was aborted.
    Cancelled,

    /// Broken invariant inside the engine.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::NotFound => "not-found",
            ErrorKind::StorageIo => "storage-io",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DanglingReference => "dangling-reference",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };

        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Holder(#[from] HolderError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error("user {0} is not loaded")]
    UserNotLoaded(Uuid),

    #[error("group '{0}' does not exist")]
    GroupNotFound(String),

    #[error("track '{0}' does not exist")]
    TrackNotFound(String),

    #[error("group '{0}' already exists")]
    GroupExists(String),

    #[error("track '{0}' already exists")]
    TrackExists(String),

    #[error("the default group can not be deleted")]
    DeleteDefaultGroup,

    #[error("{0} does not hold permission nodes")]
    NotAPermissionHolder(HolderId),

    #[error("track '{track}' references unknown group '{group}'")]
    DanglingReference { track: String, group: String },

    #[error("user {user} is on several groups of track '{track}' in this context")]
    AmbiguousTrackPosition { user: Uuid, track: String },

    #[error("user {user} can not be promoted beyond the end of track '{track}'")]
    EndOfTrack { user: Uuid, track: String },

    #[error("user {user} is not on track '{track}'")]
    NotOnTrack { user: Uuid, track: String },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Storage(StorageError::GroupNotFound(_))
            | EngineError::Storage(StorageError::TrackNotFound(_)) => ErrorKind::NotFound,
            EngineError::Storage(StorageError::Backend { .. }) => ErrorKind::StorageIo,
            EngineError::Holder(err) => match err {
                HolderError::Conflict(_) | HolderError::AlreadyOnTrack(_) => ErrorKind::Conflict,
                HolderError::NotOnTrack(_) => ErrorKind::NotFound,
                HolderError::InvalidName(_)
                | HolderError::NotInherited(_)
                | HolderError::OutOfBounds(_)
                | HolderError::Node(_) => ErrorKind::InvalidInput,
            },
            EngineError::Node(_) | EngineError::Context(_) => ErrorKind::InvalidInput,
            EngineError::Messenger(_) => ErrorKind::Internal,
            EngineError::UserNotLoaded(_)
            | EngineError::GroupNotFound(_)
            | EngineError::TrackNotFound(_)
            | EngineError::NotOnTrack { .. } => ErrorKind::NotFound,
            EngineError::GroupExists(_)
            | EngineError::TrackExists(_)
            | EngineError::AmbiguousTrackPosition { .. }
            | EngineError::EndOfTrack { .. } => ErrorKind::Conflict,
            EngineError::DeleteDefaultGroup | EngineError::NotAPermissionHolder(_) => {
                ErrorKind::InvalidInput
            }
            EngineError::DanglingReference { .. } => ErrorKind::DanglingReference,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            EngineError::Cancelled
        } else {
            EngineError::Internal(err.to_string())
        }
    }
}
