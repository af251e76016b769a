//! Per-connection handler: handshake, then a pump between the connection
//! and the room.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Hello` or `Resume` → check version → admit or resume
//!   2. Loop: forward room output to the connection, route client messages
//!      to the room, answer heartbeats
//!   3. Report how the connection ended (leave vs. drop) to the room

use std::sync::Arc;

use roomsync_protocol::{
    ClientMessage, Codec, Envelope, PROTOCOL_VERSION, ServerMessage, SessionId,
};
use roomsync_room::{JoinTicket, RoomError};
use roomsync_session::{Authenticator, SessionError};
use roomsync_transport::{Connection, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::RoomsyncError;
use crate::server::ServerState;

/// Numbers and timestamps every envelope this connection sends.
struct Outbox<'a, Conn, C> {
    conn: &'a Conn,
    codec: &'a C,
    started: Instant,
    seq: u64,
}

impl<Conn, C> Outbox<'_, Conn, C>
where
    Conn: Connection<Error = TransportError>,
    C: Codec,
{
    async fn send(&mut self, payload: ServerMessage) -> Result<(), RoomsyncError> {
        let envelope = Envelope::new(self.seq, elapsed_ms(self.started), payload);
        self.seq += 1;
        let bytes = self.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_error(
        &mut self,
        code: u16,
        message: impl Into<String>,
    ) -> Result<(), RoomsyncError> {
        self.send(ServerMessage::Error {
            code,
            message: message.into(),
        })
        .await
    }
}

/// What the first message asked for.
enum Request {
    Join {
        token: Option<String>,
    },
    Resume {
        session_id: SessionId,
        reconnect_token: String,
    },
}

/// How the pump loop ended.
enum Exit {
    /// The client sent `Leave`.
    Left,
    /// The connection closed, failed, or went idle.
    Dropped,
    /// The room closed the client's channel.
    RoomClosed,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<Conn, A, C>(
    conn: Conn,
    state: Arc<ServerState<A, C>>,
) -> Result<(), RoomsyncError>
where
    Conn: Connection<Error = TransportError>,
    A: Authenticator,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let mut outbox = Outbox {
        conn: &conn,
        codec: &state.codec,
        started: state.started,
        seq: 1,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();

    let ticket = match perform_handshake(&mut outbox, &state, tx).await {
        Ok(ticket) => ticket,
        Err(e) => {
            let _ = conn.close().await;
            return Err(e);
        }
    };
    let session_id = ticket.session_id;
    tracing::info!(%conn_id, %session_id, "client attached");

    let exit = pump(&mut outbox, &state, &session_id, &mut rx).await;

    match exit {
        Exit::Left => {
            if let Err(e) = state.room.disconnect(session_id.clone(), true).await {
                tracing::debug!(%session_id, error = %e, "leave not applied");
            }
            let _ = conn.close().await;
        }
        Exit::Dropped => {
            if let Err(e) = state.room.disconnect(session_id.clone(), false).await {
                tracing::debug!(%session_id, error = %e, "drop not applied");
            }
            let _ = conn.close().await;
        }
        Exit::RoomClosed => {
            let _ = conn.close().await;
        }
    }

    tracing::debug!(%conn_id, %session_id, "connection handler finished");
    Ok(())
}

/// Receives the first message and turns it into a session.
///
/// On any failure the client gets an `Error` envelope first (when the
/// connection still works) and the caller closes the connection.
async fn perform_handshake<Conn, A, C>(
    outbox: &mut Outbox<'_, Conn, C>,
    state: &ServerState<A, C>,
    tx: mpsc::UnboundedSender<ServerMessage>,
) -> Result<JoinTicket, RoomsyncError>
where
    Conn: Connection<Error = TransportError>,
    A: Authenticator,
    C: Codec,
{
    let first = tokio::time::timeout(state.config.handshake_timeout, outbox.conn.recv()).await;
    let data = match first {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(RoomsyncError::Handshake(
                "connection closed before handshake".into(),
            ));
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            outbox.send_error(408, "handshake timed out").await?;
            return Err(RoomsyncError::Handshake("handshake timed out".into()));
        }
    };

    let envelope: Envelope<ClientMessage> = match state.codec.decode(&data) {
        Ok(env) => env,
        Err(e) => {
            outbox.send_error(400, format!("malformed handshake: {e}")).await?;
            return Err(e.into());
        }
    };

    let compatible = envelope.is_compatible();
    let (version, request) = match envelope.payload {
        ClientMessage::Hello { version, token } => (version, Request::Join { token }),
        ClientMessage::Resume {
            version,
            session_id,
            reconnect_token,
        } => (
            version,
            Request::Resume {
                session_id,
                reconnect_token,
            },
        ),
        _ => {
            outbox.send_error(400, "expected Hello or Resume").await?;
            return Err(RoomsyncError::Handshake(
                "first message must be Hello or Resume".into(),
            ));
        }
    };

    if version != PROTOCOL_VERSION || !compatible {
        let message = format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}");
        outbox.send_error(400, message.as_str()).await?;
        return Err(RoomsyncError::Handshake(message));
    }

    let result = match request {
        Request::Join { token } => {
            state
                .room
                .admit(&state.auth, token.as_deref().unwrap_or(""), tx)
                .await
        }
        Request::Resume {
            session_id,
            reconnect_token,
        } => state.room.resume(session_id, reconnect_token, tx).await,
    };

    match result {
        Ok(ticket) => Ok(ticket),
        Err(e) => {
            let (code, message) = rejection(&e);
            outbox.send_error(code, message).await?;
            Err(e.into())
        }
    }
}

/// Error code and client-facing text for a refused join or resume.
fn rejection(err: &RoomError) -> (u16, &'static str) {
    match err {
        RoomError::Session(SessionError::AuthFailed(_)) => (401, "unauthorized"),
        RoomError::Session(SessionError::InvalidToken) => (401, "invalid reconnection token"),
        RoomError::Session(SessionError::NotFound(_) | SessionError::Expired(_)) => {
            (404, "session not found or expired")
        }
        RoomError::Session(SessionError::AlreadyConnected(_)) => (409, "session already connected"),
        RoomError::Unavailable => (503, "room unavailable"),
        RoomError::Session(SessionError::NotActive(_)) | RoomError::InvariantViolation(_) => {
            (500, "internal error")
        }
    }
}

/// Moves messages both ways until the connection or the room ends.
async fn pump<Conn, A, C>(
    outbox: &mut Outbox<'_, Conn, C>,
    state: &ServerState<A, C>,
    session_id: &SessionId,
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
) -> Exit
where
    Conn: Connection<Error = TransportError>,
    A: Authenticator,
    C: Codec,
{
    let conn = outbox.conn;
    let idle_timeout = state.config.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            incoming = conn.recv() => {
                let data = match incoming {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%session_id, "connection closed");
                        return Exit::Dropped;
                    }
                    Err(e) => {
                        tracing::debug!(%session_id, error = %e, "recv error");
                        return Exit::Dropped;
                    }
                };
                idle.as_mut().reset(Instant::now() + idle_timeout);

                match handle_incoming(outbox, state, session_id, &data).await {
                    Ok(Some(exit)) => return exit,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(%session_id, error = %e, "connection failed");
                        return Exit::Dropped;
                    }
                }
            }

            outgoing = rx.recv() => {
                let Some(msg) = outgoing else {
                    tracing::debug!(%session_id, "room closed the client channel");
                    return Exit::RoomClosed;
                };
                if let Err(e) = outbox.send(msg).await {
                    tracing::debug!(%session_id, error = %e, "send failed");
                    return Exit::Dropped;
                }
            }

            () = &mut idle => {
                tracing::info!(%session_id, "connection idle, treating as dropped");
                return Exit::Dropped;
            }
        }
    }
}

/// Handles one inbound frame. `Ok(Some(exit))` ends the pump.
async fn handle_incoming<Conn, A, C>(
    outbox: &mut Outbox<'_, Conn, C>,
    state: &ServerState<A, C>,
    session_id: &SessionId,
    data: &[u8],
) -> Result<Option<Exit>, RoomsyncError>
where
    Conn: Connection<Error = TransportError>,
    A: Authenticator,
    C: Codec,
{
    let envelope: Envelope<ClientMessage> = match state.codec.decode(data) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(%session_id, error = %e, "failed to decode envelope");
            outbox.send_error(400, format!("invalid message: {e}")).await?;
            return Ok(None);
        }
    };

    match envelope.payload {
        ClientMessage::Message { data } => {
            if state.room.send_message(session_id.clone(), data).await.is_err() {
                return Ok(Some(Exit::RoomClosed));
            }
        }
        ClientMessage::Heartbeat { client_time } => {
            outbox
                .send(ServerMessage::HeartbeatAck {
                    client_time,
                    server_time: elapsed_ms(state.started),
                })
                .await?;
        }
        ClientMessage::Leave => {
            tracing::info!(%session_id, "client left");
            return Ok(Some(Exit::Left));
        }
        ClientMessage::Hello { .. } | ClientMessage::Resume { .. } => {
            outbox.send_error(400, "already joined").await?;
        }
    }

    Ok(None)
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
