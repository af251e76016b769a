//! A single demo room on a WebSocket port.
//!
//! ```text
//! cargo run -p demo-room                 # 127.0.0.1:2567, defaults
//! cargo run -p demo-room -- room.json    # settings from a JSON file
//! RUST_LOG=debug cargo run -p demo-room  # patch and despawn logging
//! ```
//!
//! Clients send `{"v":1,"seq":1,"timestamp":0,"payload":{"type":"Hello","version":1,"token":"me"}}`
//! and then `Message` payloads with `move_right` or `move_left`.

use roomsync::prelude::*;

/// Accepts any non-empty token as the user name. Development only.
struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
        if token.is_empty() {
            return Err(SessionError::AuthFailed("empty token".into()));
        }
        Ok(UserId(token.to_owned()))
    }
}

#[tokio::main]
async fn main() -> Result<(), RoomsyncError> {
    roomsync::init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::default(),
    };
    tracing::info!(
        bind_addr = %config.bind_addr,
        grace_ms = config.room.reconnect_grace.as_millis() as u64,
        "starting demo room"
    );

    let server = RoomsyncServerBuilder::new().config(config).build(DevAuthenticator);

    tokio::select! {
        result = server.clone().listen() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            server.shutdown().await
        }
    }
}
