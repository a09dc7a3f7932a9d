use super::RemoteRow;
use crate::domain::value_objects::{EntityKind, RemoteId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

/// One entry of the remote change feed. Consumed once, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: EntityKind,
    pub event_type: ChangeEventType,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn remote_id(&self) -> Option<RemoteId> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|row| match row.get("id") {
                Some(Value::String(id)) => RemoteId::new(id.clone()).ok(),
                Some(Value::Number(id)) => RemoteId::new(id.to_string()).ok(),
                _ => None,
            })
    }

    pub fn new_row(&self) -> Option<Result<RemoteRow, String>> {
        self.new.clone().map(RemoteRow::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_id_prefers_new_then_old() {
        let event = ChangeEvent {
            table: EntityKind::Goals,
            event_type: ChangeEventType::Delete,
            new: None,
            old: Some(json!({"id": "goal-1"})),
        };
        assert_eq!(event.remote_id().map(|id| id.to_string()), Some("goal-1".into()));

        let event = ChangeEvent {
            table: EntityKind::Goals,
            event_type: ChangeEventType::Update,
            new: Some(json!({"id": "goal-2"})),
            old: Some(json!({"id": "goal-1"})),
        };
        assert_eq!(event.remote_id().map(|id| id.to_string()), Some("goal-2".into()));
    }
}
