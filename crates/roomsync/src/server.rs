//! `RoomsyncServer` builder and server loop.
//!
//! This is the entry point for running a roomsync server. It ties together
//! all the layers: transport → protocol → room (sessions, sync, simulation).

use std::sync::Arc;

use roomsync_protocol::{Codec, JsonCodec};
use roomsync_room::{RoomConfig, RoomHandle, spawn_room};
use roomsync_session::Authenticator;
use roomsync_transport::{Connection, Transport, TransportError, WebSocketTransport};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::handler::handle_connection;
use crate::{RoomsyncError, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator, C: Codec> {
    pub(crate) room: RoomHandle,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
    pub(crate) started: Instant,
}

/// Builder for configuring and starting a roomsync server.
///
/// # Example
///
/// ```rust,ignore
/// use roomsync::prelude::*;
///
/// let server = RoomsyncServerBuilder::new()
///     .bind("0.0.0.0:2567")
///     .build(my_auth);
/// server.listen().await?;
/// ```
pub struct RoomsyncServerBuilder<C: Codec = JsonCodec> {
    config: ServerConfig,
    codec: C,
}

impl RoomsyncServerBuilder<JsonCodec> {
    /// Creates a new builder with default settings and the JSON codec.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            codec: JsonCodec,
        }
    }
}

impl Default for RoomsyncServerBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> RoomsyncServerBuilder<C> {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address [`RoomsyncServer::listen`] binds to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn room_config(mut self, room: RoomConfig) -> Self {
        self.config.room = room;
        self
    }

    /// Swaps the wire codec.
    pub fn codec<C2: Codec>(self, codec: C2) -> RoomsyncServerBuilder<C2> {
        RoomsyncServerBuilder {
            config: self.config,
            codec,
        }
    }

    /// Starts the room and returns the server.
    ///
    /// Must be called from within a Tokio runtime: the room actor is
    /// spawned here and starts ticking immediately.
    pub fn build<A: Authenticator>(self, auth: A) -> RoomsyncServer<A, C> {
        let room = spawn_room(self.config.room.clone());
        tracing::info!(room_id = room.room_id(), "room started");

        RoomsyncServer {
            state: Arc::new(ServerState {
                room,
                auth,
                codec: self.codec,
                config: self.config,
                started: Instant::now(),
            }),
        }
    }
}

/// A running roomsync server with its room.
///
/// Cheap to clone; clones share the room.
pub struct RoomsyncServer<A: Authenticator, C: Codec = JsonCodec> {
    state: Arc<ServerState<A, C>>,
}

impl<A: Authenticator, C: Codec> Clone for RoomsyncServer<A, C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A: Authenticator, C: Codec> RoomsyncServer<A, C> {
    /// The room this server fronts.
    pub fn room(&self) -> &RoomHandle {
        &self.state.room
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Spawns a handler task for one already-established connection.
    pub fn serve<Conn>(&self, conn: Conn) -> JoinHandle<()>
    where
        Conn: Connection<Error = TransportError>,
    {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let conn_id = conn.id();
            if let Err(e) = handle_connection(conn, state).await {
                tracing::debug!(%conn_id, error = %e, "connection ended with error");
            }
        })
    }

    /// Accepts connections from `transport` forever, one handler task each.
    pub async fn run<T>(self, mut transport: T)
    where
        T: Transport<Error = TransportError>,
        T::Connection: Connection<Error = TransportError>,
    {
        tracing::info!(room_id = self.state.room.room_id(), "roomsync server running");

        loop {
            match transport.accept().await {
                Ok(conn) => {
                    self.serve(conn);
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }

    /// Binds a WebSocket listener on the configured address and runs the
    /// accept loop. Returns only if binding fails.
    pub async fn listen(self) -> Result<(), RoomsyncError> {
        let transport = WebSocketTransport::bind(&self.state.config.bind_addr).await?;
        let addr = transport.local_addr()?;
        tracing::info!(%addr, "listening for WebSocket clients");
        self.run(transport).await;
        Ok(())
    }

    /// Stops the room. Every connected client is closed by its handler.
    pub async fn shutdown(&self) -> Result<(), RoomsyncError> {
        self.state.room.shutdown().await?;
        Ok(())
    }
}
