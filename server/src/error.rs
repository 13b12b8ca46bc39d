//! Error types for the BidRoom server.
//!
//! # Error Types
//!
//! - [`ServerError`] - Top-level errors for startup and serving
//! - [`RejectReason`] - Why the relay refused a join or a mutation
//!
//! Configuration parsing errors live in [`crate::config::ConfigError`] and
//! wire decoding errors in [`crate::protocol::ProtocolError`].

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::types::Role;

/// Top-level error type for the BidRoom server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error during server initialization.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Binding or serving failed at the socket level.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why the relay refused a join or a state mutation.
///
/// Serialized into the `reason` field of `operation-rejected` events.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    /// The sender has not joined any room.
    #[error("session has not joined a room")]
    NotJoined,

    /// The sender's connection was dropped for falling behind.
    #[error("connection has been closed")]
    Disconnected,

    /// The sender's role may not perform this operation.
    #[error("operation requires the {required} role")]
    Forbidden { required: Role },

    /// A team tried to act on behalf of another team.
    #[error("team name does not match the session's team")]
    TeamMismatch,

    /// The payload names a room other than the sender's.
    #[error("room id does not match the session's room")]
    RoomMismatch,

    /// The requested room id is empty.
    #[error("room id cannot be empty")]
    InvalidRoomId,

    /// A team join did not name its team.
    #[error("team sessions must provide a team name")]
    MissingTeamName,

    /// Another live session already plays as this team.
    #[error("team '{team}' is already taken in this room")]
    TeamTaken { team: String },

    /// Every team slot in the room is occupied.
    #[error("room already has the maximum of {max_teams} teams")]
    RoomFull { max_teams: usize },

    /// The payload failed validation.
    #[error("malformed payload: {message}")]
    Malformed { message: String },

    /// The event name is not part of the protocol.
    #[error("unknown event '{event}'")]
    UnknownEvent { event: String },
}

impl RejectReason {
    /// Creates a new malformed-payload rejection.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
