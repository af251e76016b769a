//! Unified error type for the roomsync server.

use roomsync_protocol::ProtocolError;
use roomsync_room::RoomError;
use roomsync_session::SessionError;
use roomsync_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RoomsyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// Reading a config file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A config file could not be parsed.
    #[error("invalid config: {0}")]
    Config(#[source] serde_json::Error),

    /// The client broke the handshake rules (wrong first message, wrong
    /// version, timeout). The client was told why before the close.
    #[error("handshake failed: {0}")]
    Handshake(String),
}
