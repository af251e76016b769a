//! Error types for the session layer.

use roomsync_protocol::SessionId;

/// Errors from authentication and the session state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No session with this id, either never created or already terminated.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The reconnect token does not match the one issued to the session.
    #[error("invalid reconnection token")]
    InvalidToken,

    /// The grace period ran out before the client came back.
    #[error("session {0} expired")]
    Expired(SessionId),

    /// Resume attempted for a session that is still connected.
    #[error("session {0} is already connected")]
    AlreadyConnected(SessionId),

    /// Disconnect reported for a session that is not active.
    #[error("session {0} is not active")]
    NotActive(SessionId),
}
