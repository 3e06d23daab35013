//! Helpers over opaque JSON entities.
//!
//! Entity schemas are owned by the server. The client only relies on an
//! identifier field and, for some kinds, an owner reference.

use serde_json::Value;

pub const DEFAULT_ID_FIELD: &str = "_id";

/// Identifier of `entity`, accepting string or numeric ids.
pub fn entity_id(entity: &Value, id_field: &str) -> Option<String> {
    scalar_id(entity.get(id_field)?)
}

/// Owner identifier stored under `owner_field`.
///
/// The owner may be a bare id or a populated object carrying its own
/// `id_field`.
pub fn owner_id(entity: &Value, owner_field: &str, id_field: &str) -> Option<String> {
    match entity.get(owner_field)? {
        Value::Object(owner) => owner.get(id_field).and_then(scalar_id),
        other => scalar_id(other),
    }
}

/// `{...existing, ...incoming}`: incoming keys win, keys only present locally
/// survive. Non-object operands are replaced wholesale by `incoming`.
pub fn shallow_merge(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(patch)) => {
            let mut merged = current.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
