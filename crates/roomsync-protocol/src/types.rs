//! Identity types and the message schema that travels between a room and its
//! clients.
//!
//! Everything in this module is serialized with serde. The JSON shapes are
//! part of the public contract: a browser client decodes these messages
//! directly, so every `#[serde(...)]` attribute here matters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::StateUpdate;

/// Version of the message schema. Sent by the client in `Hello`/`Resume`
/// and stamped on every server envelope, so either side can detect an
/// incompatible peer before decoding anything else.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies one client session inside a room.
///
/// Assigned by the server when a client first joins and kept for the whole
/// life of the session, including across reconnections. It doubles as the
/// id of the Player entity the session owns.
///
/// `#[serde(transparent)]` makes `SessionId("abc")` serialize as `"abc"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Borrows the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of an entity in the shared room state.
///
/// Stored in a `BTreeMap`, so it needs `Ord`; the ordering is also what
/// makes snapshot iteration order identical on every run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Borrows the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A session owns the Player entity with the same id.
impl From<&SessionId> for EntityId {
    fn from(session_id: &SessionId) -> Self {
        EntityId(session_id.0.clone())
    }
}

/// A verified user identity, as returned by an authenticator.
///
/// Distinct from [`SessionId`]: one user may come back later with a brand
/// new session, but a session always belongs to exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who should receive an outbound application message.
///
/// Message handlers return `(Recipient, AppPayload)` pairs; the room decides
/// which client channels each pair is written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every client currently connected to the room.
    All,
    /// Exactly one session (a directed reply).
    Session(SessionId),
}

// ---------------------------------------------------------------------------
// Application payloads
// ---------------------------------------------------------------------------

/// Application-level payloads carried by directed replies and broadcasts.
///
/// Closed on purpose: adding a variant is a schema change and bumps
/// [`PROTOCOL_VERSION`]. Internally tagged, so a notice looks like
/// `{ "kind": "Notice", "num": 42, "str": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AppPayload {
    /// A numeric field plus a string field.
    Notice {
        num: u32,
        #[serde(rename = "str")]
        text: String,
    },

    /// The fixed greeting broadcast after every client message.
    Greeting { hello: String },
}

impl AppPayload {
    /// The greeting the room broadcasts whenever any client sends a message.
    pub fn hello_world() -> Self {
        Self::Greeting {
            hello: "hello world".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Everything a client may send.
///
/// The first message on a connection must be [`ClientMessage::Hello`] (new
/// session) or [`ClientMessage::Resume`] (reconnect to an existing one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join the room as a new session. `token` is handed to the
    /// authenticator untouched.
    Hello {
        version: u32,
        token: Option<String>,
    },

    /// Resume a session that is waiting for reconnection.
    Resume {
        version: u32,
        session_id: SessionId,
        reconnect_token: String,
    },

    /// An application message for the room's message router. The content
    /// is free-form; unknown content is ignored by the room.
    Message { data: String },

    /// Consented leave: the session ends now, no grace period.
    Leave,

    /// Keep-alive; echoed back in [`ServerMessage::HeartbeatAck`].
    Heartbeat { client_time: u64 },
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Everything the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The join (or resume) succeeded. The client keeps `reconnect_token`
    /// secret and presents it in `Resume` after a network drop.
    Welcome {
        session_id: SessionId,
        reconnect_token: String,
        server_time: u64,
    },

    /// A full snapshot or an incremental patch of the room state.
    State { update: StateUpdate },

    /// A message addressed to this client only.
    Reply { payload: AppPayload },

    /// A message sent to every client in the room.
    Broadcast { payload: AppPayload },

    /// Answer to a client heartbeat.
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Something went wrong. `code` follows HTTP conventions
    /// (400 bad request, 401 unauthorized, 404 unknown session, ...).
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level wire wrapper. Every frame, in both directions, is an
/// `Envelope` around a [`ClientMessage`] or a [`ServerMessage`].
///
/// `v` comes first so a client can read it before trusting the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Schema version of the sender.
    pub v: u32,

    /// Per-connection sequence number, counted separately on each side.
    pub seq: u64,

    /// Milliseconds since the sender started.
    pub timestamp: u64,

    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload with the current [`PROTOCOL_VERSION`].
    pub fn new(seq: u64, timestamp: u64, payload: T) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            seq,
            timestamp,
            payload,
        }
    }

    /// `true` if the sender speaks the same schema version as we do.
    pub fn is_compatible(&self) -> bool {
        self.v == PROTOCOL_VERSION
    }
}
