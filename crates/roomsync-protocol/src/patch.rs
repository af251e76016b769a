//! State updates: full snapshots, incremental patches, and the client-side
//! view they are applied to.
//!
//! The server keeps a monotonically increasing state `version`. A snapshot
//! says "this is the whole state at version N". A patch says "starting from
//! version `base_version`, apply these ops and you are at `version`". A
//! client that sees a patch whose base does not match its own version has
//! missed something and must wait for (or ask for) a snapshot.
//!
//! ```text
//!   snapshot(v3) ──→ patch(3→4) ──→ patch(4→5) ──→ ...
//! ```

use serde::{Deserialize, Serialize};

use crate::{Entity, EntityId, EntityKind, EntityMap, ProtocolError};

// ---------------------------------------------------------------------------
// Field-level changes
// ---------------------------------------------------------------------------

/// A change to one field of an existing entity.
///
/// Adjacently tagged: `{ "field": "x", "value": 0.01 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldChange {
    X(f64),
    Y(f64),
    Connected(bool),
    Power(f64),
}

impl FieldChange {
    /// Wire name of the field, used in error messages.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::X(_) => "x",
            Self::Y(_) => "y",
            Self::Connected(_) => "connected",
            Self::Power(_) => "power",
        }
    }
}

// ---------------------------------------------------------------------------
// Patch operations
// ---------------------------------------------------------------------------

/// One operation in a [`StatePatch`]. Ops are applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum PatchOp {
    /// A new entity (or one whose kind changed, which replaces it whole).
    Add { id: EntityId, entity: Entity },

    /// Some fields of an existing entity changed.
    Update {
        id: EntityId,
        changes: Vec<FieldChange>,
    },

    /// The entity is gone.
    Remove { id: EntityId },
}

impl PatchOp {
    /// The entity this op touches.
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Add { id, .. } | Self::Update { id, .. } | Self::Remove { id } => id,
        }
    }

    /// Computes the minimal op that turns `before` into `after`.
    ///
    /// Returns `None` when nothing observable changed, including the case
    /// where the entity did not exist at either point (created and removed
    /// within the same window).
    pub fn between(
        id: &EntityId,
        before: Option<&Entity>,
        after: Option<&Entity>,
    ) -> Option<PatchOp> {
        match (before, after) {
            (None, None) => None,
            (None, Some(entity)) => Some(PatchOp::Add {
                id: id.clone(),
                entity: entity.clone(),
            }),
            (Some(_), None) => Some(PatchOp::Remove { id: id.clone() }),
            (Some(old), Some(new)) if !old.same_kind(new) => Some(PatchOp::Add {
                id: id.clone(),
                entity: new.clone(),
            }),
            (Some(old), Some(new)) => {
                let changes = field_changes(old, new);
                if changes.is_empty() {
                    None
                } else {
                    Some(PatchOp::Update {
                        id: id.clone(),
                        changes,
                    })
                }
            }
        }
    }
}

/// Lists the fields that differ between two entities of the same kind.
///
/// Floats are compared bit-for-bit so a NaN does not produce a change on
/// every tick.
fn field_changes(old: &Entity, new: &Entity) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.x.to_bits() != new.x.to_bits() {
        changes.push(FieldChange::X(new.x));
    }
    if old.y.to_bits() != new.y.to_bits() {
        changes.push(FieldChange::Y(new.y));
    }
    match (&old.kind, &new.kind) {
        (EntityKind::Player { connected: a }, EntityKind::Player { connected: b }) => {
            if a != b {
                changes.push(FieldChange::Connected(*b));
            }
        }
        (EntityKind::Enemy { power: a }, EntityKind::Enemy { power: b }) => {
            if a.to_bits() != b.to_bits() {
                changes.push(FieldChange::Power(*b));
            }
        }
        // Kind changes are handled by the caller as a full Add.
        _ => {}
    }
    changes
}

// ---------------------------------------------------------------------------
// Snapshot / Patch / Update
// ---------------------------------------------------------------------------

/// The whole room state at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub entities: EntityMap,
}

/// The changes between two consecutive state versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    pub base_version: u64,
    pub version: u64,
    pub ops: Vec<PatchOp>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// What the synchronizer ships to a client on a patch tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum StateUpdate {
    Snapshot(StateSnapshot),
    Patch(StatePatch),
}

// ---------------------------------------------------------------------------
// ClientView
// ---------------------------------------------------------------------------

/// A client's last-known copy of the room state.
///
/// Used by client code (and by tests) to fold a stream of
/// [`StateUpdate`]s back into a full state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientView {
    pub version: u64,
    pub entities: EntityMap,
}

impl ClientView {
    /// Applies one update.
    ///
    /// Snapshots always replace the view. Patches are applied all-or-nothing:
    /// if any op fails, the view is left exactly as it was.
    ///
    /// # Errors
    /// - [`ProtocolError::VersionGap`] — the patch was built on a different
    ///   version than the one this view holds
    /// - [`ProtocolError::UnknownEntity`] — an update/remove for an id the
    ///   view does not have
    /// - [`ProtocolError::FieldMismatch`] — a field that the entity's kind
    ///   does not carry
    pub fn apply(&mut self, update: &StateUpdate) -> Result<(), ProtocolError> {
        match update {
            StateUpdate::Snapshot(snapshot) => {
                self.version = snapshot.version;
                self.entities = snapshot.entities.clone();
                Ok(())
            }
            StateUpdate::Patch(patch) => self.apply_patch(patch),
        }
    }

    fn apply_patch(&mut self, patch: &StatePatch) -> Result<(), ProtocolError> {
        if patch.base_version != self.version {
            return Err(ProtocolError::VersionGap {
                expected: self.version,
                found: patch.base_version,
            });
        }

        // Work on a copy so a bad op halfway through can't leave a torn view.
        let mut entities = self.entities.clone();
        for op in &patch.ops {
            match op {
                PatchOp::Add { id, entity } => {
                    entities.insert(id.clone(), entity.clone());
                }
                PatchOp::Update { id, changes } => {
                    let entity = entities
                        .get_mut(id)
                        .ok_or_else(|| ProtocolError::UnknownEntity(id.clone()))?;
                    for change in changes {
                        entity.apply_change(id, change)?;
                    }
                }
                PatchOp::Remove { id } => {
                    entities
                        .remove(id)
                        .ok_or_else(|| ProtocolError::UnknownEntity(id.clone()))?;
                }
            }
        }

        self.entities = entities;
        self.version = patch.version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(s: &str) -> EntityId {
        EntityId(s.into())
    }

    fn view_with(entities: &[(&str, Entity)], version: u64) -> ClientView {
        ClientView {
            version,
            entities: entities
                .iter()
                .map(|(id, e)| (eid(id), e.clone()))
                .collect(),
        }
    }

    // =====================================================================
    // PatchOp::between
    // =====================================================================

    #[test]
    fn test_between_absent_both_sides_is_none() {
        assert_eq!(PatchOp::between(&eid("a"), None, None), None);
    }

    #[test]
    fn test_between_new_entity_is_add() {
        let e = Entity::player();
        let op = PatchOp::between(&eid("a"), None, Some(&e));
        assert_eq!(
            op,
            Some(PatchOp::Add {
                id: eid("a"),
                entity: e
            })
        );
    }

    #[test]
    fn test_between_gone_entity_is_remove() {
        let e = Entity::player();
        let op = PatchOp::between(&eid("a"), Some(&e), None);
        assert_eq!(op, Some(PatchOp::Remove { id: eid("a") }));
    }

    #[test]
    fn test_between_unchanged_entity_is_none() {
        let e = Entity::enemy(1.0, 1.0, 4.0);
        assert_eq!(PatchOp::between(&eid("a"), Some(&e), Some(&e)), None);
    }

    #[test]
    fn test_between_lists_only_changed_fields() {
        let old = Entity::player();
        let mut new = old.clone();
        new.x = 0.01;
        new.kind = EntityKind::Player { connected: false };

        let op = PatchOp::between(&eid("a"), Some(&old), Some(&new));

        assert_eq!(
            op,
            Some(PatchOp::Update {
                id: eid("a"),
                changes: vec![FieldChange::X(0.01), FieldChange::Connected(false)],
            })
        );
    }

    #[test]
    fn test_between_kind_change_is_full_add() {
        let old = Entity::player();
        let new = Entity::enemy(0.0, 0.0, 2.0);
        let op = PatchOp::between(&eid("a"), Some(&old), Some(&new));
        assert!(matches!(op, Some(PatchOp::Add { .. })));
    }

    #[test]
    fn test_between_nan_is_stable() {
        let e = Entity::enemy(f64::NAN, 0.0, 1.0);
        assert_eq!(PatchOp::between(&eid("a"), Some(&e), Some(&e.clone())), None);
    }

    // =====================================================================
    // ClientView::apply
    // =====================================================================

    #[test]
    fn test_apply_snapshot_replaces_view() {
        let mut view = view_with(&[("old", Entity::player())], 9);
        let snapshot = StateSnapshot {
            version: 2,
            entities: view_with(&[("new", Entity::enemy(1.0, 1.0, 1.0))], 0).entities,
        };

        view.apply(&StateUpdate::Snapshot(snapshot)).unwrap();

        assert_eq!(view.version, 2);
        assert!(view.entities.contains_key(&eid("new")));
        assert!(!view.entities.contains_key(&eid("old")));
    }

    #[test]
    fn test_apply_patch_with_wrong_base_is_version_gap() {
        let mut view = view_with(&[], 3);
        let patch = StatePatch {
            base_version: 4,
            version: 5,
            ops: vec![],
        };

        let result = view.apply(&StateUpdate::Patch(patch));

        assert!(matches!(
            result,
            Err(ProtocolError::VersionGap {
                expected: 3,
                found: 4
            })
        ));
    }

    #[test]
    fn test_apply_patch_is_all_or_nothing() {
        let mut view = view_with(&[("a", Entity::player())], 1);
        let before = view.clone();
        let patch = StatePatch {
            base_version: 1,
            version: 2,
            ops: vec![
                PatchOp::Remove { id: eid("a") },
                PatchOp::Remove { id: eid("missing") },
            ],
        };

        let result = view.apply(&StateUpdate::Patch(patch));

        assert!(matches!(result, Err(ProtocolError::UnknownEntity(_))));
        assert_eq!(view, before, "failed patch must not change the view");
    }

    #[test]
    fn test_patch_round_trip_reproduces_later_state() {
        // Build two states, diff every id, apply the diff to the first.
        let old = view_with(
            &[
                ("p1", Entity::player()),
                ("e1", Entity::enemy(0.5, 0.5, 3.0)),
                ("e2", Entity::enemy(1.0, 1.0, 7.0)),
            ],
            4,
        );
        let mut new_entities = old.entities.clone();
        new_entities.get_mut(&eid("p1")).unwrap().x += 0.01;
        new_entities.remove(&eid("e1"));
        new_entities.insert(eid("e3"), Entity::enemy(547.0, 547.0, 1.0));

        let mut ids: Vec<EntityId> = old.entities.keys().cloned().collect();
        ids.extend(new_entities.keys().cloned());
        ids.sort();
        ids.dedup();
        let ops = ids
            .iter()
            .filter_map(|id| PatchOp::between(id, old.entities.get(id), new_entities.get(id)))
            .collect();

        let mut view = old.clone();
        view.apply(&StateUpdate::Patch(StatePatch {
            base_version: 4,
            version: 5,
            ops,
        }))
        .unwrap();

        assert_eq!(view.entities, new_entities);
        assert_eq!(view.version, 5);
    }

    #[test]
    fn test_state_update_json_tags_mode() {
        let update = StateUpdate::Patch(StatePatch {
            base_version: 0,
            version: 1,
            ops: vec![PatchOp::Update {
                id: eid("a"),
                changes: vec![FieldChange::X(1.0)],
            }],
        });
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json["mode"], "Patch");
        assert_eq!(json["ops"][0]["op"], "Update");
        assert_eq!(json["ops"][0]["changes"][0]["field"], "x");
        assert_eq!(json["ops"][0]["changes"][0]["value"], 1.0);
    }
}
