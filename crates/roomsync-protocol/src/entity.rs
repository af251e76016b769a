//! The entity record shared by every client in a room.
//!
//! An entity is a position plus a kind-specific payload. The kind is an
//! explicit tagged variant, so code that needs `connected` or `power` has to
//! match on it instead of assuming the field exists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EntityId, FieldChange, ProtocolError};

/// The whole room state as a client sees it: entity id → entity.
///
/// A `BTreeMap` rather than a `HashMap` so that snapshots serialize in a
/// stable order.
pub type EntityMap = BTreeMap<EntityId, Entity>;

/// One entity in the room.
///
/// On the wire the kind is flattened into the same object:
/// `{ "x": 0.0, "y": 0.0, "kind": "Player", "connected": true }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub x: f64,
    pub y: f64,
    #[serde(flatten)]
    pub kind: EntityKind,
}

/// Kind-specific part of an [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntityKind {
    /// Owned by a client session. `connected` goes false while the session
    /// waits for a reconnection.
    Player { connected: bool },

    /// An NPC owned by the simulation. `power` is fixed at creation.
    Enemy { power: f64 },
}

impl Entity {
    /// A freshly joined player at the origin.
    pub fn player() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            kind: EntityKind::Player { connected: true },
        }
    }

    /// An enemy at the given position.
    pub fn enemy(x: f64, y: f64, power: f64) -> Self {
        Self {
            x,
            y,
            kind: EntityKind::Enemy { power },
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player { .. })
    }

    /// Short kind name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EntityKind::Player { .. } => "Player",
            EntityKind::Enemy { .. } => "Enemy",
        }
    }

    /// `true` if both entities are the same kind, regardless of field values.
    pub fn same_kind(&self, other: &Entity) -> bool {
        std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind)
    }

    /// Applies a single field change received in a patch.
    ///
    /// # Errors
    /// [`ProtocolError::FieldMismatch`] if the field does not exist on this
    /// entity's kind (e.g. `power` on a player).
    pub fn apply_change(
        &mut self,
        id: &EntityId,
        change: &FieldChange,
    ) -> Result<(), ProtocolError> {
        match (change, &mut self.kind) {
            (FieldChange::X(x), _) => self.x = *x,
            (FieldChange::Y(y), _) => self.y = *y,
            (FieldChange::Connected(value), EntityKind::Player { connected }) => {
                *connected = *value;
            }
            (FieldChange::Power(value), EntityKind::Enemy { power }) => {
                *power = *value;
            }
            (change, _) => {
                return Err(ProtocolError::FieldMismatch {
                    id: id.clone(),
                    field: change.field_name(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(s: &str) -> EntityId {
        EntityId(s.into())
    }

    #[test]
    fn test_player_defaults_to_origin_and_connected() {
        let p = Entity::player();
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 0.0);
        assert_eq!(p.kind, EntityKind::Player { connected: true });
        assert!(p.is_player());
    }

    #[test]
    fn test_entity_json_flattens_kind() {
        let json = serde_json::to_value(Entity::enemy(1.5, 0.5, 3.0)).unwrap();

        assert_eq!(json["x"], 1.5);
        assert_eq!(json["y"], 0.5);
        assert_eq!(json["kind"], "Enemy");
        assert_eq!(json["power"], 3.0);
    }

    #[test]
    fn test_entity_decodes_flattened_player() {
        let json = r#"{"x": 2.0, "y": 1.0, "kind": "Player", "connected": false}"#;
        let entity: Entity = serde_json::from_str(json).unwrap();

        assert_eq!(entity.kind, EntityKind::Player { connected: false });
        assert_eq!(entity.x, 2.0);
    }

    #[test]
    fn test_apply_change_moves_entity() {
        let mut p = Entity::player();
        p.apply_change(&eid("a"), &FieldChange::X(0.01)).unwrap();
        assert_eq!(p.x, 0.01);
    }

    #[test]
    fn test_apply_change_connected_on_player() {
        let mut p = Entity::player();
        p.apply_change(&eid("a"), &FieldChange::Connected(false))
            .unwrap();
        assert_eq!(p.kind, EntityKind::Player { connected: false });
    }

    #[test]
    fn test_apply_change_power_on_player_is_rejected() {
        let mut p = Entity::player();
        let result = p.apply_change(&eid("a"), &FieldChange::Power(5.0));

        assert!(matches!(
            result,
            Err(ProtocolError::FieldMismatch { field: "power", .. })
        ));
        assert_eq!(p, Entity::player(), "entity must be left untouched");
    }

    #[test]
    fn test_same_kind_ignores_field_values() {
        assert!(Entity::enemy(0.0, 0.0, 1.0).same_kind(&Entity::enemy(5.0, 5.0, 9.0)));
        assert!(!Entity::player().same_kind(&Entity::enemy(0.0, 0.0, 1.0)));
    }
}
