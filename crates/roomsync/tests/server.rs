//! End-to-end tests: a real server task and room, driven through in-memory
//! connections (and one real WebSocket) with raw protocol envelopes.

use std::time::Duration;

use roomsync::prelude::*;
use roomsync_protocol::StateSnapshot;

// =========================================================================
// Test helpers
// =========================================================================

/// Rejects empty tokens and "bad"; anything else is the user name.
struct TestAuth;

impl Authenticator for TestAuth {
    async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
        if token.is_empty() || token == "bad" {
            return Err(SessionError::AuthFailed("rejected".into()));
        }
        Ok(UserId(token.to_owned()))
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        idle_timeout: Duration::from_secs(60),
        room: RoomConfig {
            rng_seed: Some(7),
            ..RoomConfig::default()
        },
        ..ServerConfig::default()
    }
}

fn start_server(config: ServerConfig) -> RoomsyncServer<TestAuth> {
    RoomsyncServerBuilder::new().config(config).build(TestAuth)
}

/// The client end of an in-memory connection, speaking raw envelopes.
struct TestClient {
    conn: MemoryConnection,
    seq: u64,
}

impl TestClient {
    fn connect(server: &RoomsyncServer<TestAuth>) -> Self {
        let (server_end, client_end) = MemoryConnection::pair();
        server.serve(server_end);
        Self {
            conn: client_end,
            seq: 1,
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let bytes = JsonCodec.encode(&Envelope::new(self.seq, 0, msg)).unwrap();
        self.seq += 1;
        self.conn.send(&bytes).await.unwrap();
    }

    async fn hello(&mut self, token: &str) {
        self.send(ClientMessage::Hello {
            version: PROTOCOL_VERSION,
            token: Some(token.into()),
        })
        .await;
    }

    /// Next server message, or `None` once the server closed the connection.
    async fn recv(&self) -> Option<ServerMessage> {
        let bytes = self.conn.recv().await.unwrap()?;
        let env: Envelope<ServerMessage> = JsonCodec.decode(&bytes).unwrap();
        assert!(env.is_compatible());
        Some(env.payload)
    }

    /// Skips messages until one matches.
    async fn recv_until(&self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            let msg = self.recv().await.expect("connection closed while waiting");
            if pred(&msg) {
                return msg;
            }
        }
    }

    async fn welcome(&self) -> (SessionId, String) {
        match self.recv().await {
            Some(ServerMessage::Welcome {
                session_id,
                reconnect_token,
                ..
            }) => (session_id, reconnect_token),
            other => panic!("expected Welcome, got {other:?}"),
        }
    }

    async fn snapshot(&self) -> StateSnapshot {
        match self
            .recv_until(|m| matches!(m, ServerMessage::State { update: StateUpdate::Snapshot(_) }))
            .await
        {
            ServerMessage::State {
                update: StateUpdate::Snapshot(snapshot),
            } => snapshot,
            _ => unreachable!(),
        }
    }

    /// Drains everything until the server closes the connection.
    async fn expect_closed(&self) {
        while self.recv().await.is_some() {}
    }
}

fn is_player_connected(snapshot: &StateSnapshot, id: &SessionId) -> Option<bool> {
    match snapshot.entities.get(&EntityId::from(id))?.kind {
        EntityKind::Player { connected } => Some(connected),
        EntityKind::Enemy { .. } => None,
    }
}

/// Polls the room until `check` holds, advancing (paused) time in between.
async fn wait_for_room(server: &RoomsyncServer<TestAuth>, check: impl Fn(&RoomInfo) -> bool) {
    for _ in 0..200 {
        let info = server.room().info().await.unwrap();
        if check(&info) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room never reached the expected state");
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_hello_gets_welcome_then_snapshot() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);

    client.hello("alice").await;

    let (session_id, token) = client.welcome().await;
    assert_eq!(token.len(), 32);
    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.entities.len(), 5, "own player plus four enemies");
    assert_eq!(is_player_connected(&snapshot, &session_id), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_wrong_version_is_rejected_and_closed() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);

    client
        .send(ClientMessage::Hello {
            version: PROTOCOL_VERSION + 1,
            token: Some("alice".into()),
        })
        .await;

    assert!(matches!(
        client.recv().await,
        Some(ServerMessage::Error { code: 400, .. })
    ));
    client.expect_closed().await;
    assert_eq!(server.room().info().await.unwrap().clients, 0);
}

#[tokio::test(start_paused = true)]
async fn test_message_before_hello_is_rejected() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);

    client
        .send(ClientMessage::Message {
            data: "move_right".into(),
        })
        .await;

    assert!(matches!(
        client.recv().await,
        Some(ServerMessage::Error { code: 400, .. })
    ));
    client.expect_closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_token_never_reaches_room() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);

    client.hello("bad").await;

    assert!(matches!(
        client.recv().await,
        Some(ServerMessage::Error { code: 401, .. })
    ));
    client.expect_closed().await;
    let info = server.room().info().await.unwrap();
    assert_eq!(info.clients, 0);
    assert_eq!(info.entities, 4);
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_times_out_handshake() {
    let server = start_server(test_config());
    let client = TestClient::connect(&server);

    assert!(matches!(
        client.recv().await,
        Some(ServerMessage::Error { code: 408, .. })
    ));
    client.expect_closed().await;
}

// =========================================================================
// Messaging
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_is_echoed() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);
    client.hello("alice").await;
    client.welcome().await;

    client.send(ClientMessage::Heartbeat { client_time: 1234 }).await;

    let ack = client
        .recv_until(|m| matches!(m, ServerMessage::HeartbeatAck { .. }))
        .await;
    assert!(matches!(ack, ServerMessage::HeartbeatAck { client_time: 1234, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_move_right_replies_to_sender_and_greets_everyone() {
    let server = start_server(test_config());
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    alice.hello("alice").await;
    let (alice_id, _) = alice.welcome().await;
    bob.hello("bob").await;
    bob.welcome().await;
    alice.snapshot().await;
    bob.snapshot().await;

    alice
        .send(ClientMessage::Message {
            data: "move_right".into(),
        })
        .await;

    let reply = alice
        .recv_until(|m| matches!(m, ServerMessage::Reply { .. }))
        .await;
    let ServerMessage::Reply {
        payload: AppPayload::Notice { num, text },
    } = reply
    else {
        panic!("expected notice, got {reply:?}");
    };
    assert!(num < 100);
    assert_eq!(text, "sending to a single client");
    alice
        .recv_until(|m| matches!(m, ServerMessage::Broadcast { .. }))
        .await;

    // Bob sees the greeting and the moved player, never the reply.
    let mut view_has_move = false;
    let mut greeted = false;
    while !(view_has_move && greeted) {
        match bob.recv().await.unwrap() {
            ServerMessage::Reply { .. } => panic!("reply leaked to another client"),
            ServerMessage::Broadcast { payload } => {
                assert_eq!(payload, AppPayload::hello_world());
                greeted = true;
            }
            ServerMessage::State {
                update: StateUpdate::Patch(patch),
            } => {
                view_has_move |= patch.ops.iter().any(|op| *op.id() == EntityId::from(&alice_id));
            }
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_update_stream_reproduces_room_state() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);
    client.hello("alice").await;
    client.welcome().await;

    let mut view = ClientView::default();
    view.apply(&StateUpdate::Snapshot(client.snapshot().await)).unwrap();

    for data in ["move_right", "move_left", "move_right", "jump"] {
        client.send(ClientMessage::Message { data: data.into() }).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let target = server.room().snapshot().await.unwrap();
    while view.version < target.version {
        if let Some(ServerMessage::State { update }) = client.recv().await {
            view.apply(&update).unwrap();
        }
    }
    assert_eq!(view.entities, target.entities);
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_leave_removes_player_and_closes() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);
    client.hello("alice").await;
    let (session_id, _) = client.welcome().await;

    client.send(ClientMessage::Leave).await;
    client.expect_closed().await;

    wait_for_room(&server, |info| info.clients == 0 && info.awaiting_reconnect == 0).await;
    let snapshot = server.room().snapshot().await.unwrap();
    assert!(!snapshot.entities.contains_key(&EntityId::from(&session_id)));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_client_resumes_with_token() {
    let server = start_server(test_config());
    let mut first = TestClient::connect(&server);
    first.hello("alice").await;
    let (session_id, token) = first.welcome().await;
    first.snapshot().await;
    drop(first);

    wait_for_room(&server, |info| info.awaiting_reconnect == 1).await;
    let during_grace = server.room().snapshot().await.unwrap();
    assert_eq!(is_player_connected(&during_grace, &session_id), Some(false));

    let mut second = TestClient::connect(&server);
    second
        .send(ClientMessage::Resume {
            version: PROTOCOL_VERSION,
            session_id: session_id.clone(),
            reconnect_token: token.clone(),
        })
        .await;

    let (resumed_id, new_token) = second.welcome().await;
    assert_eq!(resumed_id, session_id);
    assert_ne!(new_token, token, "token rotates on resume");
    let snapshot = second.snapshot().await;
    assert_eq!(is_player_connected(&snapshot, &session_id), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_resume_with_wrong_token_is_unauthorized() {
    let server = start_server(test_config());
    let mut first = TestClient::connect(&server);
    first.hello("alice").await;
    let (session_id, _) = first.welcome().await;
    drop(first);
    wait_for_room(&server, |info| info.awaiting_reconnect == 1).await;

    let mut second = TestClient::connect(&server);
    second
        .send(ClientMessage::Resume {
            version: PROTOCOL_VERSION,
            session_id,
            reconnect_token: "0".repeat(32),
        })
        .await;

    assert!(matches!(
        second.recv().await,
        Some(ServerMessage::Error { code: 401, .. })
    ));
    second.expect_closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_grace_is_not_found() {
    let server = start_server(test_config());
    let mut first = TestClient::connect(&server);
    first.hello("alice").await;
    let (session_id, token) = first.welcome().await;
    drop(first);
    wait_for_room(&server, |info| info.awaiting_reconnect == 1).await;

    tokio::time::sleep(Duration::from_secs(11)).await;

    let mut second = TestClient::connect(&server);
    second
        .send(ClientMessage::Resume {
            version: PROTOCOL_VERSION,
            session_id,
            reconnect_token: token,
        })
        .await;

    assert!(matches!(
        second.recv().await,
        Some(ServerMessage::Error { code: 404, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_counts_as_drop() {
    let server = start_server(ServerConfig {
        idle_timeout: Duration::from_secs(2),
        ..test_config()
    });
    let mut client = TestClient::connect(&server);
    client.hello("alice").await;
    client.welcome().await;

    tokio::time::sleep(Duration::from_secs(3)).await;

    let info = server.room().info().await.unwrap();
    assert_eq!(info.clients, 0);
    assert_eq!(info.awaiting_reconnect, 1);
}

#[tokio::test(start_paused = true)]
async fn test_room_shutdown_closes_clients() {
    let server = start_server(test_config());
    let mut client = TestClient::connect(&server);
    client.hello("alice").await;
    client.welcome().await;

    server.shutdown().await.unwrap();

    client.expect_closed().await;
}

// =========================================================================
// WebSocket
// =========================================================================

#[tokio::test]
async fn test_websocket_client_joins_and_receives_state() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let server = start_server(test_config());
    let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    tokio::spawn(server.clone().run(transport));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    let hello = format!(
        r#"{{"v":{PROTOCOL_VERSION},"seq":1,"timestamp":0,"payload":{{"type":"Hello","version":{PROTOCOL_VERSION},"token":"alice"}}}}"#
    );
    ws.send(Message::text(hello)).await.unwrap();

    let mut got_welcome = false;
    let mut got_snapshot = false;
    while !(got_welcome && got_snapshot) {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server should answer")
            .unwrap()
            .unwrap();
        let env: Envelope<ServerMessage> = serde_json::from_slice(&frame.into_data()).unwrap();
        match env.payload {
            ServerMessage::Welcome { .. } => got_welcome = true,
            ServerMessage::State {
                update: StateUpdate::Snapshot(_),
            } => {
                assert!(got_welcome, "welcome comes first");
                got_snapshot = true;
            }
            _ => {}
        }
    }
}
