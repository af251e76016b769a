//! The room's shared state: every entity, keyed by id.
//!
//! [`RoomState`] is the only place entities live. Every mutating accessor
//! records the touched id in a change journal, so the synchronizer can diff
//! exactly what moved since its last tick without the caller knowing that
//! synchronization exists.

use std::collections::HashSet;

use rand::{Rng, distr::Alphanumeric};
use roomsync_protocol::{Entity, EntityId, EntityMap};

/// Length of ids generated for simulation-owned entities and rooms.
const GENERATED_ID_LEN: usize = 9;

/// A random short alphanumeric id.
pub(crate) fn generate_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..GENERATED_ID_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// The Entity Model.
#[derive(Debug, Default)]
pub struct RoomState {
    entities: EntityMap,
    /// Ids touched since the last `take_changes`, in first-touch order.
    changed: Vec<EntityId>,
    changed_set: HashSet<EntityId>,
    /// Entities flagged for removal by the next simulation tick.
    despawn_queue: Vec<EntityId>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity under a freshly generated id and returns the id.
    pub fn create<R: Rng + ?Sized>(&mut self, entity: Entity, rng: &mut R) -> EntityId {
        let id = loop {
            let candidate = EntityId(generate_id(rng));
            if !self.entities.contains_key(&candidate) {
                break candidate;
            }
        };
        self.insert(id.clone(), entity);
        id
    }

    /// Adds an entity under a caller-chosen id (players use their session
    /// id). Returns the entity previously stored under that id, if any.
    pub fn insert(&mut self, id: EntityId, entity: Entity) -> Option<Entity> {
        self.touch(&id);
        self.entities.insert(id, entity)
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Mutable access. The id is recorded as changed whether or not the
    /// caller actually writes; an unchanged entity produces no patch op.
    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        if !self.entities.contains_key(id) {
            return None;
        }
        self.touch(id);
        self.entities.get_mut(id)
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
        let removed = self.entities.remove(id)?;
        self.touch(id);
        Some(removed)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Entity)> {
        self.entities.iter()
    }

    /// Read-only view of the whole map (snapshots, tests).
    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Flags an entity for removal on the next simulation tick.
    pub fn mark_for_despawn(&mut self, id: EntityId) {
        self.despawn_queue.push(id);
    }

    pub fn pending_despawns(&self) -> &[EntityId] {
        &self.despawn_queue
    }

    pub(crate) fn take_despawn_queue(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.despawn_queue)
    }

    /// Drains the change journal.
    pub(crate) fn take_changes(&mut self) -> Vec<EntityId> {
        self.changed_set.clear();
        std::mem::take(&mut self.changed)
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    fn touch(&mut self, id: &EntityId) {
        if self.changed_set.insert(id.clone()) {
            self.changed.push(id.clone());
        }
    }
}
