//! The session registry: every live or pending-reconnect session in a room.
//!
//! The registry is plain data owned by the room actor. It never sleeps and
//! never spawns; the grace-period clock lives in [`GraceTimer`](crate::GraceTimer),
//! and the room feeds the timer's verdict back through [`SessionRegistry::expire`].

use std::collections::HashMap;
use std::time::Duration;

use rand::{Rng, distr::Alphanumeric};
use roomsync_protocol::{SessionId, UserId};
use tokio::time::Instant;

use crate::{Session, SessionError, SessionState};

/// Length of generated session ids.
const SESSION_ID_LEN: usize = 9;

/// What [`SessionRegistry::disconnect`] did with the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The session is gone. The caller removes its entity now.
    Terminated(Session),

    /// The session waits for a resume until `deadline`. The caller marks the
    /// entity disconnected and starts a grace timer tagged with `epoch`.
    Grace { epoch: u64, deadline: Instant },
}

/// Tracks all sessions of one room.
///
/// ```text
/// create() ──→ [Active] ──disconnect(consented)──→ Terminated
///                 │  ↑
///   disconnect()  │  │ reconnect(token)
///                 ▼  │
///          [AwaitingReconnect] ──expire(epoch)──→ Terminated
/// ```
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    grace: Duration,
}

impl SessionRegistry {
    /// A registry whose non-consented disconnects wait `grace` for a resume.
    /// A zero grace period terminates every disconnect immediately.
    pub fn new(grace: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            grace,
        }
    }

    /// Registers a new active session for an authenticated user and returns
    /// it. Each call allocates a fresh [`SessionId`], even for a user that
    /// already has one.
    ///
    /// `taken` reports ids that are in use outside the registry (the room
    /// passes its entity ids, since a session id doubles as the id of its
    /// player). Such ids are never handed out.
    pub fn create(&mut self, user: UserId, taken: impl Fn(&SessionId) -> bool) -> &Session {
        let id = loop {
            let candidate = generate_session_id();
            if !self.sessions.contains_key(&candidate) && !taken(&candidate) {
                break candidate;
            }
        };

        let session = Session {
            id: id.clone(),
            user,
            state: SessionState::Active,
            reconnect_token: generate_token(),
            epoch: 0,
        };

        tracing::info!(session_id = %id, user = %session.user, "session created");
        self.sessions.entry(id).or_insert(session)
    }

    /// Records that the session's connection ended.
    ///
    /// A consented leave (or a zero grace period) terminates the session.
    /// Anything else starts the grace period.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] — no such session
    /// - [`SessionError::NotActive`] — already awaiting reconnection
    pub fn disconnect(
        &mut self,
        id: &SessionId,
        consented: bool,
    ) -> Result<Disconnect, SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        if !session.is_active() {
            return Err(SessionError::NotActive(id.clone()));
        }

        if consented || self.grace.is_zero() {
            tracing::info!(session_id = %id, consented, "session terminated");
            let session = self
                .sessions
                .remove(id)
                .ok_or_else(|| SessionError::NotFound(id.clone()))?;
            return Ok(Disconnect::Terminated(session));
        }

        let deadline = Instant::now() + self.grace;
        session.epoch += 1;
        session.state = SessionState::AwaitingReconnect { deadline };

        tracing::info!(
            session_id = %id,
            grace_ms = self.grace.as_millis() as u64,
            "session awaiting reconnect"
        );
        Ok(Disconnect::Grace {
            epoch: session.epoch,
            deadline,
        })
    }

    /// Resumes a session that is awaiting reconnection.
    ///
    /// On success the session is active again under the same id, with a new
    /// reconnect token and a new epoch (which makes any pending expiry
    /// stale).
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] — unknown or already terminated
    /// - [`SessionError::InvalidToken`] — wrong token
    /// - [`SessionError::AlreadyConnected`] — the session is active
    /// - [`SessionError::Expired`] — the deadline has passed, even if the
    ///   timer has not fired yet
    pub fn reconnect(&mut self, id: &SessionId, token: &str) -> Result<&Session, SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        if session.reconnect_token != token {
            return Err(SessionError::InvalidToken);
        }

        match session.state {
            SessionState::Active => Err(SessionError::AlreadyConnected(id.clone())),
            SessionState::AwaitingReconnect { deadline } if Instant::now() >= deadline => {
                Err(SessionError::Expired(id.clone()))
            }
            SessionState::AwaitingReconnect { .. } => {
                session.state = SessionState::Active;
                session.epoch += 1;
                session.reconnect_token = generate_token();
                tracing::info!(session_id = %id, "session resumed");
                Ok(session)
            }
        }
    }

    /// Terminates a session whose grace period ran out.
    ///
    /// Returns `None` (and changes nothing) if the expiry is stale: the
    /// session was resumed, terminated some other way, or disconnected
    /// again under a newer epoch.
    pub fn expire(&mut self, id: &SessionId, epoch: u64) -> Option<Session> {
        let current = self.sessions.get(id)?;
        let pending = matches!(current.state, SessionState::AwaitingReconnect { .. });
        if !pending || current.epoch != epoch {
            tracing::debug!(session_id = %id, epoch, "stale grace expiry ignored");
            return None;
        }

        tracing::info!(session_id = %id, "session expired, grace period elapsed");
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Number of sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A short alphanumeric id, in the style clients expect to see in URLs.
fn generate_session_id() -> SessionId {
    let id: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect();
    SessionId(id)
}

/// 128 random bits as 32 lowercase hex characters.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
