//! # roomsync
//!
//! Authoritative real-time room server.
//!
//! One room owns a set of entities (players and enemies). Clients connect
//! over WebSocket, send free-form messages, and receive the room state as a
//! snapshot followed by incremental patches. A client whose network drops
//! keeps its seat for a grace period and can resume with its reconnect
//! token.
//!
//! The layers live in their own crates and are re-exported here:
//!
//! - [`transport`] — byte connections (WebSocket, in-memory)
//! - [`protocol`] — wire schema, entity model, patches, codec
//! - [`session`] — authentication hook and the session state machine
//! - [`room`] — the room actor: state, synchronizer, simulation, router
//! - [`tick`] — fixed-interval tickers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomsync::prelude::*;
//!
//! struct AnyToken;
//!
//! impl Authenticator for AnyToken {
//!     async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
//!         Ok(UserId(token.to_owned()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RoomsyncError> {
//!     roomsync::init_tracing();
//!     RoomsyncServerBuilder::new()
//!         .bind("0.0.0.0:2567")
//!         .build(AnyToken)
//!         .listen()
//!         .await
//! }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::RoomsyncError;
pub use server::{RoomsyncServer, RoomsyncServerBuilder};

pub use roomsync_protocol as protocol;
pub use roomsync_room as room;
pub use roomsync_session as session;
pub use roomsync_tick as tick;
pub use roomsync_transport as transport;

/// Installs a `tracing` subscriber that logs to stderr.
///
/// The filter comes from `RUST_LOG` and falls back to `info`. Calling this
/// more than once is harmless.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Everything needed to run a server and talk to it in tests.
pub mod prelude {
    pub use crate::{RoomsyncError, RoomsyncServer, RoomsyncServerBuilder, ServerConfig};
    pub use roomsync_protocol::{
        AppPayload, ClientMessage, ClientView, Codec, Entity, EntityId, EntityKind, Envelope,
        JsonCodec, PROTOCOL_VERSION, ServerMessage, SessionId, StateUpdate, UserId,
    };
    pub use roomsync_room::{RoomConfig, RoomHandle, RoomInfo};
    pub use roomsync_session::{Authenticator, SessionError};
    pub use roomsync_transport::{
        Connection, MemoryConnection, Transport, TransportError, WebSocketTransport,
    };
}
