//! Error taxonomy — kinds, not types.
//!
//! Each variant names a recoverable-or-fatal condition from the wire protocol
//! and the crypto/auth layers. Connection-level plumbing still propagates
//! `Box<dyn Error + Send + Sync>`; this enum is used where the caller needs to
//! branch on *which* thing went wrong (reply with ERROR and continue, or tear
//! the connection down).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport truncation — zero bytes where a frame was expected.
    #[error("short read")]
    ShortRead,

    /// Peer closed the socket.
    #[error("peer closed connection")]
    PeerClosed,

    /// A frame did not parse as the `{code, msg}` envelope.
    #[error("malformed envelope: {0}")]
    DecodeError(String),

    /// The command parser rejected the input.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Three failed attempts at registration or login.
    #[error("authentication failed")]
    AuthFailed,

    /// Registration against an existing username.
    #[error("username already registered")]
    Duplicate,

    /// OAEP/PSS/key-wrap failure, or an envelope that doesn't decrypt.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// Idle read timeout.
    #[error("idle timeout")]
    Timeout,

    /// Post-auth: user already has a live session elsewhere.
    #[error("already logged in")]
    RegistryConflict,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// True if the connection should continue after this error is handled
    /// locally (reply + keep reading); false if it must unwind to the
    /// connection supervisor for cleanup.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::DecodeError(_)
                | ChatError::InvalidCommand(_)
                | ChatError::CryptoFailure(_)
                | ChatError::Timeout
        )
    }
}
