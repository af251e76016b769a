//! Application message routing.
//!
//! A client message is free-form text. [`Command::parse`] recognizes the
//! commands the room understands; everything else is ignored. Whatever the
//! content, the sender's message also produces the greeting broadcast.

use rand::Rng;
use roomsync_protocol::{AppPayload, EntityId, EntityKind, Recipient, SessionId};

use crate::sim::{DESPAWN_MARKER, random_enemy};
use crate::{RoomError, RoomState};

/// How far "move forward" moves the sender's entity along x.
pub const MOVE_STEP: f64 = 0.01;

/// Text carried by the directed reply to "move forward".
const REPLY_TEXT: &str = "sending to a single client";

/// A recognized client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Step the sender's entity forward and reply to the sender only.
    MoveForward,
    /// Spawn a throwaway enemy that the simulation removes on its next tick.
    MoveBackward,
}

impl Command {
    /// Maps message content to a command. `None` for anything unrecognized.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "move_right" => Some(Self::MoveForward),
            "move_left" => Some(Self::MoveBackward),
            _ => None,
        }
    }
}

/// Messages produced by handling one client message.
pub type Outbound = Vec<(Recipient, AppPayload)>;

/// Handles one message from `sender` against the room state.
///
/// Never fails: an invariant violation (a sender without an entity) is
/// logged at `error!` and the message produces only the greeting.
pub fn dispatch<R: Rng + ?Sized>(
    state: &mut RoomState,
    sender: &SessionId,
    data: &str,
    rng: &mut R,
) -> Outbound {
    let mut out = Outbound::new();

    match Command::parse(data) {
        Some(command) => {
            tracing::debug!(session_id = %sender, ?command, "routing message");
            match handle(state, sender, command, rng) {
                Ok(mut replies) => out.append(&mut replies),
                Err(err) => {
                    tracing::error!(session_id = %sender, error = %err, "message handler failed");
                }
            }
        }
        None => {
            tracing::debug!(session_id = %sender, data, "unrecognized message ignored");
        }
    }

    out.push((Recipient::All, AppPayload::hello_world()));
    out
}

fn handle<R: Rng + ?Sized>(
    state: &mut RoomState,
    sender: &SessionId,
    command: Command,
    rng: &mut R,
) -> Result<Outbound, RoomError> {
    match command {
        Command::MoveForward => {
            let id = EntityId::from(sender);
            let entity = state.get_mut(&id).ok_or_else(|| {
                RoomError::InvariantViolation(format!("session {sender} has no entity"))
            })?;
            if !matches!(entity.kind, EntityKind::Player { .. }) {
                return Err(RoomError::InvariantViolation(format!(
                    "session {sender} owns a {} entity",
                    entity.kind_name()
                )));
            }
            entity.x += MOVE_STEP;

            let reply = AppPayload::Notice {
                num: rng.random_range(0..100),
                text: REPLY_TEXT.into(),
            };
            Ok(vec![(Recipient::Session(sender.clone()), reply)])
        }
        Command::MoveBackward => {
            let (x, y) = DESPAWN_MARKER;
            let enemy = random_enemy(x, y, &mut *rng);
            let id = state.create(enemy, &mut *rng);
            state.mark_for_despawn(id);
            Ok(Vec::new())
        }
    }
}
