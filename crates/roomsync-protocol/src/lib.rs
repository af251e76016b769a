//! Wire protocol for roomsync.
//!
//! This crate defines what clients and the room exchange:
//!
//! - **Identity and messages** ([`SessionId`], [`EntityId`],
//!   [`ClientMessage`], [`ServerMessage`], [`Envelope`]).
//! - **Shared state** ([`Entity`], [`EntityKind`]) and the updates that
//!   carry it ([`StateSnapshot`], [`StatePatch`], [`PatchOp`]).
//! - **Codec** ([`Codec`], [`JsonCodec`]) for bytes on the wire.
//!
//! It knows nothing about connections, sessions, or timing.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Room (sessions, entities)
//! ```

mod codec;
mod entity;
mod error;
mod patch;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use entity::{Entity, EntityKind, EntityMap};
pub use error::ProtocolError;
pub use patch::{ClientView, FieldChange, PatchOp, StatePatch, StateSnapshot, StateUpdate};
pub use types::{
    AppPayload, ClientMessage, EntityId, Envelope, PROTOCOL_VERSION, Recipient, ServerMessage,
    SessionId, UserId,
};
