use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::ChatMessage;

/// Shared state threaded through a graph run.
///
/// Field values are JSON for maximum flexibility; message-history fields
/// hold serialized `ChatMessage` objects. Keys are kept sorted so snapshots
/// compare and serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    data: BTreeMap<String, serde_json::Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by field name.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.get(field)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.data.contains_key(field)
    }

    /// Decode a message-history field. An absent field is an empty history.
    pub fn messages(&self, field: &str) -> Result<Vec<ChatMessage>> {
        match self.data.get(field) {
            None => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                TrellisError::InvalidUpdate {
                    field: field.to_string(),
                    message: format!("not a message list: {}", e),
                }
            }),
        }
    }

    /// Decode the last message of a message-history field.
    pub fn last_message(&self, field: &str) -> Result<Option<ChatMessage>> {
        let Some(last) = self
            .data
            .get(field)
            .and_then(|v| v.as_array())
            .and_then(|items| items.last())
        else {
            return Ok(None);
        };
        let msg = serde_json::from_value(last.clone()).map_err(|e| TrellisError::InvalidUpdate {
            field: field.to_string(),
            message: format!("last entry is not a message: {}", e),
        })?;
        Ok(Some(msg))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.data.iter()
    }

    pub(crate) fn insert(&mut self, field: String, value: serde_json::Value) {
        self.data.insert(field, value);
    }

    pub(crate) fn get_mut(&mut self, field: &str) -> Option<&mut serde_json::Value> {
        self.data.get_mut(field)
    }
}

/// Partial state update returned by a node.
///
/// Holds only the fields the node changes. How each field lands in the
/// state is decided by the field's merge policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateUpdate {
    data: BTreeMap<String, serde_json::Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value.
    pub fn set(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(field.into(), value);
        self
    }

    /// Set a string field value.
    pub fn set_str(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(field, serde_json::Value::String(value.into()))
    }

    /// Add one message to a message-history field of this update.
    pub fn message(mut self, field: impl Into<String>, msg: &ChatMessage) -> Self {
        let value = serde_json::to_value(msg).unwrap_or(serde_json::Value::Null);
        match self
            .data
            .entry(field.into())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()))
        {
            serde_json::Value::Array(items) => items.push(value),
            other => *other = serde_json::Value::Array(vec![value]),
        }
        self
    }

    /// Add several messages to a message-history field of this update.
    pub fn messages(self, field: impl Into<String>, msgs: &[ChatMessage]) -> Self {
        let field = field.into();
        msgs.iter()
            .fold(self, |update, msg| update.message(field.clone(), msg))
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|k| k.as_str())
    }
}

impl IntoIterator for StateUpdate {
    type Item = (String, serde_json::Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, serde_json::Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, serde_json::Value)> for StateUpdate {
    fn from_iter<I: IntoIterator<Item = (K, serde_json::Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl From<State> for StateUpdate {
    fn from(state: State) -> Self {
        Self { data: state.data }
    }
}
