//! The simulation loop: world rules applied on their own fixed tick.
//!
//! The only rule is removal. Anything flagged with
//! [`RoomState::mark_for_despawn`] is removed on the next tick, as long as
//! it is simulation-owned. Players belong to their sessions and are never
//! removed here; a queued player is reported as an invariant violation.

use std::time::Duration;

use rand::Rng;
use roomsync_protocol::{Entity, EntityId};

use crate::{RoomError, RoomState};

/// Position given to enemies spawned by the "move backward" command. They
/// are queued for despawn at the same time, so the position is cosmetic.
pub const DESPAWN_MARKER: (f64, f64) = (547.0, 547.0);

/// Upper bound (exclusive) of enemy spawn coordinates.
const SPAWN_EXTENT: f64 = 2.0;

/// Upper bound (exclusive) of enemy power.
const MAX_POWER: f64 = 10.0;

/// A new enemy with a random power in `[0, 10)`.
pub fn random_enemy<R: Rng + ?Sized>(x: f64, y: f64, rng: &mut R) -> Entity {
    Entity::enemy(x, y, rng.random_range(0.0..MAX_POWER))
}

/// Runs world rules against the room state.
#[derive(Debug, Default)]
pub struct Simulation {
    ticks: u64,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Spawns `count` enemies at random positions in `[0, 2) × [0, 2)`.
    pub fn populate_enemies<R: Rng + ?Sized>(
        &self,
        state: &mut RoomState,
        count: usize,
        rng: &mut R,
    ) -> Vec<EntityId> {
        (0..count)
            .map(|_| {
                let x = rng.random_range(0.0..SPAWN_EXTENT);
                let y = rng.random_range(0.0..SPAWN_EXTENT);
                let enemy = random_enemy(x, y, &mut *rng);
                state.create(enemy, &mut *rng)
            })
            .collect()
    }

    /// Applies one tick. Returns the number of entities removed.
    ///
    /// Each queued id is handled on its own; a bad entry is logged and the
    /// rest of the queue is still processed.
    pub fn tick(&mut self, state: &mut RoomState, elapsed: Duration) -> usize {
        self.ticks += 1;
        let queue = state.take_despawn_queue();
        let mut removed = 0;

        for id in queue {
            match despawn(state, &id) {
                Ok(true) => removed += 1,
                Ok(false) => {
                    tracing::debug!(entity_id = %id, "queued entity already gone");
                }
                Err(err) => {
                    tracing::error!(entity_id = %id, error = %err, "despawn rejected");
                }
            }
        }

        if removed > 0 {
            tracing::debug!(
                tick = self.ticks,
                removed,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "simulation tick despawned entities"
            );
        }
        removed
    }
}

fn despawn(state: &mut RoomState, id: &EntityId) -> Result<bool, RoomError> {
    match state.get(id) {
        None => Ok(false),
        Some(entity) if entity.is_player() => Err(RoomError::InvariantViolation(format!(
            "player {id} queued for despawn"
        ))),
        Some(_) => Ok(state.remove(id).is_some()),
    }
}
