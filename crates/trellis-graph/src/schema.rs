use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_core::error::{Result, TrellisError};

use crate::state::{State, StateUpdate};

/// How a field's update lands in the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The update overwrites the current value.
    #[default]
    Replace,
    /// The update is concatenated onto the current sequence.
    Append,
}

/// Declared state fields, in declaration order, with their merge policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    fields: Vec<(String, MergePolicy)>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a `replace` field.
    pub fn field(self, name: impl Into<String>) -> Self {
        self.with(name, MergePolicy::Replace)
    }

    /// Declare an `append` field (message histories).
    pub fn append(self, name: impl Into<String>) -> Self {
        self.with(name, MergePolicy::Append)
    }

    /// Declare a field with an explicit policy. Redeclaring a field
    /// changes its policy in place.
    pub fn with(mut self, name: impl Into<String>, policy: MergePolicy) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = policy,
            None => self.fields.push((name, policy)),
        }
        self
    }

    pub fn policy(&self, field: &str) -> Option<MergePolicy> {
        self.fields
            .iter()
            .find(|(n, _)| n == field)
            .map(|(_, p)| *p)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.policy(field).is_some()
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Merge an update into a state, producing a new state.
    ///
    /// `state` is never modified; on error no partial merge is observable.
    pub fn merge(&self, state: &State, update: StateUpdate) -> Result<State> {
        let mut next = state.clone();

        for (field, value) in update {
            let policy = self
                .policy(&field)
                .ok_or_else(|| TrellisError::UnknownField(field.clone()))?;

            match policy {
                MergePolicy::Replace => next.insert(field, value),
                MergePolicy::Append => append_value(&mut next, field, value)?,
            }
        }

        debug!(fields = next.len(), "State merged");
        Ok(next)
    }
}

/// Concatenate `value` onto the sequence stored under `field`.
///
/// An array update is appended element by element; any other value is
/// appended as a single element. An absent field starts empty.
fn append_value(state: &mut State, field: String, value: serde_json::Value) -> Result<()> {
    let incoming = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };

    match state.get_mut(&field) {
        None => state.insert(field, serde_json::Value::Array(incoming)),
        Some(serde_json::Value::Array(existing)) => existing.extend(incoming),
        Some(other) => {
            return Err(TrellisError::InvalidUpdate {
                message: format!("append field holds a non-sequence value: {}", other),
                field,
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn support_schema() -> StateSchema {
        StateSchema::new().append("messages").field("category")
    }

    #[test]
    fn test_declaration_order_and_policies() {
        let schema = support_schema().with("category", MergePolicy::Append);
        assert_eq!(
            schema.field_names().collect::<Vec<_>>(),
            vec!["messages", "category"]
        );
        assert_eq!(schema.policy("messages"), Some(MergePolicy::Append));
        assert_eq!(schema.policy("category"), Some(MergePolicy::Append));
        assert_eq!(schema.policy("missing"), None);
    }

    #[test]
    fn test_replace_last_write_wins() {
        let schema = support_schema();
        let s1 = schema
            .merge(&State::new(), StateUpdate::new().set_str("category", "billing"))
            .unwrap();
        let s2 = schema
            .merge(&s1, StateUpdate::new().set_str("category", "technical"))
            .unwrap();
        assert_eq!(s2.get_str("category"), Some("technical"));
        // copy-on-merge: earlier snapshot untouched
        assert_eq!(s1.get_str("category"), Some("billing"));
    }

    #[test]
    fn test_append_twice_preserves_call_order() {
        let schema = support_schema();
        let base = schema
            .merge(&State::new(), StateUpdate::new().set("messages", json!(["a", "b"])))
            .unwrap();

        let once = schema
            .merge(&base, StateUpdate::new().set("messages", json!(["x"])))
            .unwrap();
        let twice = schema
            .merge(&once, StateUpdate::new().set("messages", json!(["x"])))
            .unwrap();

        assert_eq!(twice.get("messages"), Some(&json!(["a", "b", "x", "x"])));
        assert_eq!(base.get("messages"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_append_onto_absent_field_starts_empty() {
        let schema = support_schema();
        let state = schema
            .merge(&State::new(), StateUpdate::new().set("messages", json!(["m1"])))
            .unwrap();
        assert_eq!(state.get("messages"), Some(&json!(["m1"])));
    }

    #[test]
    fn test_append_single_value_is_one_element() {
        let schema = support_schema();
        let state = schema
            .merge(&State::new(), StateUpdate::new().set("messages", json!("m1")))
            .unwrap();
        assert_eq!(state.get("messages"), Some(&json!(["m1"])));
    }

    #[test]
    fn test_unknown_field_rejected_without_partial_merge() {
        let schema = support_schema();
        let start = schema
            .merge(&State::new(), StateUpdate::new().set_str("category", "general"))
            .unwrap();

        let err = schema
            .merge(
                &start,
                StateUpdate::new()
                    .set_str("category", "billing")
                    .set_str("mood", "grumpy"),
            )
            .unwrap_err();

        assert!(matches!(err, TrellisError::UnknownField(ref f) if f == "mood"));
        assert_eq!(start.get_str("category"), Some("general"));
    }

    #[test]
    fn test_append_onto_scalar_is_invalid() {
        let replace_then_append = StateSchema::new().field("log");
        let state = replace_then_append
            .merge(&State::new(), StateUpdate::new().set_str("log", "scalar"))
            .unwrap();

        let schema = StateSchema::new().append("log");
        let err = schema
            .merge(&state, StateUpdate::new().set("log", json!(["entry"])))
            .unwrap_err();
        assert!(matches!(err, TrellisError::InvalidUpdate { ref field, .. } if field == "log"));
    }
}
