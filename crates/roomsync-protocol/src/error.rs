//! Error types for the protocol layer.
//!
//! Covers both halves of what this crate does: turning messages into bytes
//! and back, and folding state updates into a client view.

use crate::EntityId;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing field, or an
    /// unknown message `type`.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A patch was built on a different version than the one held locally.
    /// The client missed an update and needs a fresh snapshot.
    #[error("state version gap: have {expected}, patch is based on {found}")]
    VersionGap { expected: u64, found: u64 },

    /// A patch updates or removes an entity the receiver does not know.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// A field change that the entity's kind does not carry.
    #[error("entity {id} has no field `{field}`")]
    FieldMismatch { id: EntityId, field: &'static str },
}
