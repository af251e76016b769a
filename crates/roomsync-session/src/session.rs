//! The record the room keeps for each client session.

use roomsync_protocol::{SessionId, UserId};
use tokio::time::Instant;

/// Lifecycle state of a session.
///
/// ```text
///   Active ──(drop)──→ AwaitingReconnect ──(deadline)──→ terminated
///     ↑                       │
///     └──────(resume)─────────┘
///
///   Active ──(leave)──→ terminated
/// ```
///
/// "Terminated" is not a state: a terminated session is removed from the
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; messages flow both ways.
    Active,

    /// The connection dropped without a leave. The session (and its
    /// entity) survive until `deadline`.
    AwaitingReconnect { deadline: Instant },
}

/// One client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Stable across reconnection; also the id of the session's entity.
    pub id: SessionId,

    /// Who authenticated this session.
    pub user: UserId,

    pub state: SessionState,

    /// Secret the client must present to resume. Rotated on every
    /// successful resume.
    pub reconnect_token: String,

    /// Bumped every time a grace period starts or ends. A grace timer
    /// carries the epoch it was started under, so an expiry that lost the
    /// race against a resume can be recognized as stale.
    pub epoch: u64,
}

impl Session {
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active)
    }
}
