//! The state synchronizer.
//!
//! Keeps the last state it shipped (the baseline) and, on each patch tick,
//! diffs only the entities the [`RoomState`] change journal says were
//! touched. Bandwidth scales with the rate of change, not with entity count.
//!
//! Clients that just joined or resumed have no baseline to patch, so they
//! get a full snapshot on their first tick instead of the patch.

use std::collections::HashSet;

use roomsync_protocol::{EntityMap, PatchOp, SessionId, StatePatch, StateSnapshot};

use crate::RoomState;

/// What one synchronizer tick produced. The room delivers it.
#[derive(Debug, Default)]
pub struct SyncFrame {
    /// Incremental update for every connected client not listed in
    /// `snapshot_for`. `None` when nothing changed.
    pub patch: Option<StatePatch>,

    /// Full state for the clients in `snapshot_for`.
    pub snapshot: Option<StateSnapshot>,

    pub snapshot_for: HashSet<SessionId>,
}

impl SyncFrame {
    /// `true` if `session` should get the patch from this frame.
    pub fn wants_patch(&self, session: &SessionId) -> bool {
        self.patch.is_some() && !self.snapshot_for.contains(session)
    }
}

/// Computes incremental state updates.
#[derive(Debug, Default)]
pub struct StateSynchronizer {
    baseline: EntityMap,
    version: u64,
    pending_snapshots: HashSet<SessionId>,
}

impl StateSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the last state shipped. Starts at 0 and goes up by one
    /// for every non-empty patch.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Queues a full snapshot for `session` on the next tick.
    pub fn request_snapshot(&mut self, session: SessionId) {
        self.pending_snapshots.insert(session);
    }

    /// Drops any pending snapshot for a session that went away.
    pub fn forget(&mut self, session: &SessionId) {
        self.pending_snapshots.remove(session);
    }

    /// Diffs the state against the baseline and advances the baseline.
    ///
    /// Only the change journal is consumed; entity content is read, never
    /// written. Calling this late just folds more changes into one patch.
    pub fn tick(&mut self, state: &mut RoomState) -> SyncFrame {
        let changed = state.take_changes();

        let mut ops = Vec::with_capacity(changed.len());
        for id in &changed {
            let current = state.get(id);
            if let Some(op) = PatchOp::between(id, self.baseline.get(id), current) {
                ops.push(op);
            }
            match current {
                Some(entity) => {
                    self.baseline.insert(id.clone(), entity.clone());
                }
                None => {
                    self.baseline.remove(id);
                }
            }
        }

        let patch = if ops.is_empty() {
            None
        } else {
            let base_version = self.version;
            self.version += 1;
            tracing::debug!(
                version = self.version,
                ops = ops.len(),
                "state patch computed"
            );
            Some(StatePatch {
                base_version,
                version: self.version,
                ops,
            })
        };

        let snapshot_for = std::mem::take(&mut self.pending_snapshots);
        let snapshot = (!snapshot_for.is_empty()).then(|| StateSnapshot {
            version: self.version,
            entities: self.baseline.clone(),
        });

        SyncFrame {
            patch,
            snapshot,
            snapshot_for,
        }
    }
}

#[cfg(test)]
mod tests {
    use roomsync_protocol::{ClientView, Entity, EntityId, StateUpdate};

    use super::*;

    fn eid(s: &str) -> EntityId {
        EntityId(s.into())
    }

    fn sid(s: &str) -> SessionId {
        SessionId(s.into())
    }

    #[test]
    fn test_tick_without_changes_sends_nothing() {
        let mut sync = StateSynchronizer::new();
        let mut state = RoomState::new();

        let frame = sync.tick(&mut state);

        assert!(frame.patch.is_none());
        assert!(frame.snapshot.is_none());
        assert_eq!(sync.version(), 0);
    }

    #[test]
    fn test_tick_after_insert_emits_add_and_bumps_version() {
        let mut sync = StateSynchronizer::new();
        let mut state = RoomState::new();
        state.insert(eid("p1"), Entity::player());

        let patch = sync.tick(&mut state).patch.unwrap();

        assert_eq!(patch.base_version, 0);
        assert_eq!(patch.version, 1);
        assert!(matches!(&patch.ops[..], [PatchOp::Add { id, .. }] if *id == eid("p1")));
    }

    #[test]
    fn test_tick_touch_without_write_emits_nothing() {
        let mut sync = StateSynchronizer::new();
        let mut state = RoomState::new();
        state.insert(eid("p1"), Entity::player());
        sync.tick(&mut state);

        let _ = state.get_mut(&eid("p1"));
        let frame = sync.tick(&mut state);

        assert!(frame.patch.is_none());
        assert_eq!(sync.version(), 1);
    }

    #[test]
    fn test_tick_create_and_remove_in_same_window_is_invisible() {
        let mut sync = StateSynchronizer::new();
        let mut state = RoomState::new();
        state.insert(eid("e1"), Entity::enemy(547.0, 547.0, 1.0));
        state.remove(&eid("e1"));

        assert!(sync.tick(&mut state).patch.is_none());
    }

    #[test]
    fn test_tick_pending_snapshot_excludes_session_from_patch() {
        let mut sync = StateSynchronizer::new();
        let mut state = RoomState::new();
        state.insert(eid("a"), Entity::player());
        sync.request_snapshot(sid("a"));

        let frame = sync.tick(&mut state);

        assert!(frame.wants_patch(&sid("b")));
        assert!(!frame.wants_patch(&sid("a")));
        let snapshot = frame.snapshot.unwrap();
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.entities.contains_key(&eid("a")));
    }

    #[test]
    fn test_forget_drops_pending_snapshot() {
        let mut sync = StateSynchronizer::new();
        let mut state = RoomState::new();
        sync.request_snapshot(sid("a"));
        sync.forget(&sid("a"));

        assert!(sync.tick(&mut state).snapshot.is_none());
    }

    #[test]
    fn test_patches_reproduce_server_state_on_client() {
        let mut sync = StateSynchronizer::new();
        let mut state = RoomState::new();
        let mut view = ClientView::default();

        state.insert(eid("p1"), Entity::player());
        state.insert(eid("e1"), Entity::enemy(0.3, 1.2, 4.0));
        sync.request_snapshot(sid("p1"));
        view.apply(&StateUpdate::Snapshot(sync.tick(&mut state).snapshot.unwrap()))
            .unwrap();
        assert_eq!(&view.entities, state.entities());

        let steps: [fn(&mut RoomState); 3] = [
            |s| s.get_mut(&eid("p1")).unwrap().x += 0.01,
            |s| {
                s.remove(&eid("e1"));
                s.insert(eid("e2"), Entity::enemy(1.0, 1.0, 2.0));
            },
            |s| {
                s.get_mut(&eid("e2")).unwrap().y = 5.0;
                s.remove(&eid("p1"));
            },
        ];
        for step in steps {
            step(&mut state);
            let patch = sync.tick(&mut state).patch.unwrap();
            view.apply(&StateUpdate::Patch(patch)).unwrap();
            assert_eq!(&view.entities, state.entities());
            assert_eq!(view.version, sync.version());
        }
    }
}
