//! # Error Types
//!
//! Error handling for the chat protocol.
//!
//! This module defines every error variant that can occur while decoding frames,
//! routing messages, or coordinating games, from low-level I/O errors to
//! protocol-level refusals that are reported back to the offending peer.
//!
//! ## Error Categories
//! - **Recoverable**: name conflicts, unknown destinations and game rule violations.
//!   These are serialized into an `E` frame and the peer's session continues.
//! - **Fatal for the session**: malformed frames, oversized declarations and
//!   transport failures. Only the affected session is torn down.
//! - **Local**: configuration and timeout errors raised to the caller.
//!
//! ## Example Usage
//! ```rust
//! use chat_protocol::error::{ProtocolError, Result};
//!
//! fn check_position(position: u32) -> Result<usize> {
//!     if position > 8 {
//!         return Err(ProtocolError::InvalidPosition(position));
//!     }
//!     Ok(position as usize)
//! }
//!
//! let err = check_position(12).unwrap_err();
//! assert!(err.is_recoverable());
//! assert_eq!(err.wire_text(), "Invalid position");
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants.
/// The protocol-level ones double as the text of the `E` frame sent to a peer.
pub mod constants {
    /// Registry errors
    pub const ERR_NAME_TAKEN: &str = "Nickname already taken";
    pub const ERR_USER_NOT_FOUND: &str = "User not found";
    pub const ERR_NOT_REGISTERED: &str = "Register first";
    pub const ERR_ALREADY_REGISTERED: &str = "Already registered";
    pub const ERR_EMPTY_IDENTITY: &str = "Nickname cannot be empty";

    /// Game errors
    pub const ERR_NO_ACTIVE_GAME: &str = "No active game found";
    pub const ERR_NOT_YOUR_TURN: &str = "Not your turn";
    pub const ERR_INVALID_POSITION: &str = "Invalid position";
    pub const ERR_POSITION_OCCUPIED: &str = "Position already occupied";
    pub const ERR_GAME_IN_PROGRESS: &str = "Game already in progress";
    pub const ERR_NO_PENDING_INVITE: &str = "No pending invite from";

    /// Frame errors
    pub const ERR_UNEXPECTED_MESSAGE: &str = "Unexpected message";
    pub const ERR_TRUNCATED_FIELD: &str = "Truncated field";
    pub const ERR_INVALID_UTF8: &str = "Field is not valid UTF-8";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after message";
    pub const ERR_ORPHAN_FRAGMENT: &str = "Continuation fragment without a leading fragment";
    pub const ERR_FRAGMENT_SEQUENCE: &str = "Fragment sequence has gaps or duplicates";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Identity already registered: {0}")]
    NameConflict(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Peer is not registered")]
    NotRegistered,

    #[error("Peer is already registered")]
    AlreadyRegistered,

    #[error("Identity cannot be empty")]
    EmptyIdentity,

    #[error("No active game")]
    NoActiveGame,

    #[error("Not your turn")]
    NotYourTurn,

    #[error("Invalid position: {0}")]
    InvalidPosition(u32),

    #[error("Position already occupied: {0}")]
    PositionOccupied(u32),

    #[error("Game already in progress")]
    GameInProgress,

    #[error("No pending invite from {0}")]
    NoPendingInvite(String),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Outbound queue full")]
    Backpressure,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error is answered with an `E` frame while the session continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::NameConflict(_)
                | ProtocolError::UserNotFound(_)
                | ProtocolError::NotRegistered
                | ProtocolError::AlreadyRegistered
                | ProtocolError::EmptyIdentity
                | ProtocolError::NoActiveGame
                | ProtocolError::NotYourTurn
                | ProtocolError::InvalidPosition(_)
                | ProtocolError::PositionOccupied(_)
                | ProtocolError::GameInProgress
                | ProtocolError::NoPendingInvite(_)
                | ProtocolError::UnexpectedMessage
        )
    }

    /// Text carried in the `E` frame reporting this error to a peer.
    pub fn wire_text(&self) -> String {
        use constants::*;
        match self {
            ProtocolError::NameConflict(_) => ERR_NAME_TAKEN.to_string(),
            ProtocolError::UserNotFound(name) => format!("{ERR_USER_NOT_FOUND}: {name}"),
            ProtocolError::NotRegistered => ERR_NOT_REGISTERED.to_string(),
            ProtocolError::AlreadyRegistered => ERR_ALREADY_REGISTERED.to_string(),
            ProtocolError::EmptyIdentity => ERR_EMPTY_IDENTITY.to_string(),
            ProtocolError::NoActiveGame => ERR_NO_ACTIVE_GAME.to_string(),
            ProtocolError::NotYourTurn => ERR_NOT_YOUR_TURN.to_string(),
            ProtocolError::InvalidPosition(_) => ERR_INVALID_POSITION.to_string(),
            ProtocolError::PositionOccupied(_) => ERR_POSITION_OCCUPIED.to_string(),
            ProtocolError::GameInProgress => ERR_GAME_IN_PROGRESS.to_string(),
            ProtocolError::NoPendingInvite(name) => format!("{ERR_NO_PENDING_INVITE} {name}"),
            ProtocolError::UnexpectedMessage => ERR_UNEXPECTED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ProtocolError::MalformedFrame(reason.into())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
