//! Domain change events delivered over the realtime channel.
//!
//! The wire carries `<entity>-created` / `<entity>-updated` with the entity
//! object as payload. Inbound frames are decoded into [`DomainEvent`] so the
//! synchronizer can dispatch on the tag instead of probing untyped payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Entity kinds the server emits change events for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Claim,
    Farmer,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Claim, EntityKind::Farmer];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Claim => "claim",
            EntityKind::Farmer => "farmer",
        }
    }

    /// Root query-cache collection for this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Claim => "claims",
            EntityKind::Farmer => "farmers",
        }
    }

    /// Field naming the owning farmer, for kinds that have owner-scoped
    /// collections.
    pub fn owner_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Claim => Some("farmer"),
            EntityKind::Farmer => None,
        }
    }

    pub fn event_name(&self, change: ChangeType) -> String {
        format!("{}-{}", self.as_str(), change.as_str())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Created,
    Updated,
}

impl ChangeType {
    pub const ALL: [ChangeType; 2] = [ChangeType::Created, ChangeType::Updated];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    EntityCreated { kind: EntityKind, entity: Value },
    EntityUpdated { kind: EntityKind, entity: Value },
}

impl DomainEvent {
    /// Decode a wire event name and payload.
    ///
    /// Returns `None` for anything that is not a known domain event, including
    /// lifecycle events such as `connect`.
    pub fn from_wire(event: &str, payload: Value) -> Option<Self> {
        let (kind, change) = event.rsplit_once('-')?;
        let kind = EntityKind::parse(kind)?;
        match change {
            "created" => Some(DomainEvent::EntityCreated {
                kind,
                entity: payload,
            }),
            "updated" => Some(DomainEvent::EntityUpdated {
                kind,
                entity: payload,
            }),
            _ => None,
        }
    }

    /// Every wire event name the synchronizer listens for.
    pub fn wire_names() -> Vec<String> {
        EntityKind::ALL
            .into_iter()
            .flat_map(|kind| ChangeType::ALL.into_iter().map(move |c| kind.event_name(c)))
            .collect()
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            DomainEvent::EntityCreated { kind, .. } | DomainEvent::EntityUpdated { kind, .. } => {
                *kind
            }
        }
    }

    pub fn change(&self) -> ChangeType {
        match self {
            DomainEvent::EntityCreated { .. } => ChangeType::Created,
            DomainEvent::EntityUpdated { .. } => ChangeType::Updated,
        }
    }

    pub fn entity(&self) -> &Value {
        match self {
            DomainEvent::EntityCreated { entity, .. } | DomainEvent::EntityUpdated { entity, .. } => {
                entity
            }
        }
    }

    pub fn event_name(&self) -> String {
        self.kind().event_name(self.change())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_wire_known_events() {
        let event = DomainEvent::from_wire("claim-updated", json!({"_id": "A"})).unwrap();
        assert_eq!(event.kind(), EntityKind::Claim);
        assert_eq!(event.change(), ChangeType::Updated);
        assert_eq!(event.event_name(), "claim-updated");

        let event = DomainEvent::from_wire("farmer-created", json!({"_id": "F"})).unwrap();
        assert!(matches!(event, DomainEvent::EntityCreated { kind: EntityKind::Farmer, .. }));
    }

    #[test]
    fn test_from_wire_rejects_unknown() {
        assert!(DomainEvent::from_wire("connect", Value::Null).is_none());
        assert!(DomainEvent::from_wire("claim-deleted", Value::Null).is_none());
        assert!(DomainEvent::from_wire("policy-created", Value::Null).is_none());
    }

    #[test]
    fn test_wire_names_cover_all_kinds() {
        let names = DomainEvent::wire_names();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"claim-created".to_string()));
        assert!(names.contains(&"farmer-updated".to_string()));
    }
}
