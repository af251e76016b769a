//! Client session lifecycle for roomsync.
//!
//! This crate answers three questions for the room:
//!
//! 1. **Who is this?** The [`Authenticator`] trait turns a client token into
//!    a [`UserId`](roomsync_protocol::UserId).
//! 2. **Which sessions exist, and in what state?** The [`SessionRegistry`]
//!    state machine (Active / AwaitingReconnect).
//! 3. **When does a dropped session end for good?** A [`GraceTimer`] per
//!    disconnected session races the reconnection deadline against
//!    cancellation.
//!
//! ```text
//! Room (above)      ← owns the registry and the timers, removes entities
//!     ↕
//! Session (here)    ← identity, tokens, grace-period bookkeeping
//!     ↕
//! Protocol (below)  ← SessionId, UserId
//! ```

mod auth;
mod error;
mod registry;
mod session;
mod timer;

pub use auth::Authenticator;
pub use error::SessionError;
pub use registry::{Disconnect, SessionRegistry};
pub use session::{Session, SessionState};
pub use timer::GraceTimer;
