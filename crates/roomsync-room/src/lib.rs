//! The authoritative core of a roomsync room.
//!
//! A room is one Tokio task (actor model) that exclusively owns the shared
//! entity state. Everything that reads or writes it runs inside that task:
//!
//! - [`RoomState`] — the Entity Model, with a change journal
//! - [`StateSynchronizer`] — turns the journal into patches and snapshots
//! - [`Simulation`] — world rules on an independent tick
//! - [`router`] — client message dispatch
//! - session lifecycle via [`roomsync_session::SessionRegistry`] and grace
//!   timers
//!
//! The outside world talks to the room through a [`RoomHandle`].

mod config;
mod error;
mod room;
pub mod router;
mod sim;
mod state;
mod sync;

pub use config::{RoomConfig, duration_ms};
pub use error::RoomError;
pub use room::{ClientSender, JoinTicket, RoomHandle, RoomInfo, spawn_room};
pub use sim::{DESPAWN_MARKER, Simulation, random_enemy};
pub use state::RoomState;
pub use sync::{StateSynchronizer, SyncFrame};
