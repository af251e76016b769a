//! Error types for the room layer.

use roomsync_session::SessionError;

/// Errors from room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room actor has stopped (shutdown, or every handle dropped).
    #[error("room is unavailable")]
    Unavailable,

    /// Authentication or a session state transition failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The room state disagrees with the session registry, e.g. a session
    /// without its entity. Always a bug; logged at `error!` where raised.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
