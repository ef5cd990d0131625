//! One table of JSON entities keyed by snowflake id.

use dashmap::DashMap;
use serde_json::Value;

use crate::shared::snowflake::Snowflake;

/// Concurrent id -> payload map. Payloads stay as raw `Value`s; callers
/// that want typed views deserialize at the edge.
#[derive(Default)]
pub struct Store {
    entries: DashMap<Snowflake, Value>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a payload under its own `id` field. Returns the id, or
    /// `None` when the payload has no parseable id (nothing is stored).
    pub fn insert(&self, payload: Value) -> Option<Snowflake> {
        let id = Snowflake::from_payload(&payload)?;
        self.entries.insert(id, payload);
        Some(id)
    }

    /// Applies an update payload. Update events may carry partial
    /// objects, so known fields are merged over the cached entry rather
    /// than replacing it wholesale.
    pub fn merge(&self, payload: Value) -> Option<Snowflake> {
        let id = Snowflake::from_payload(&payload)?;
        match self.entries.get_mut(&id) {
            Some(mut entry) => merge_fields(entry.value_mut(), payload),
            None => {
                self.entries.insert(id, payload);
            }
        }
        Some(id)
    }

    pub fn get(&self, id: Snowflake) -> Option<Value> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: Snowflake) -> Option<Value> {
        self.entries.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<Snowflake> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn merge_fields(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(update)) => {
            for (key, value) in update {
                current.insert(key, value);
            }
        }
        (current, update) => *current = update,
    }
}
