use crate::domain::value_objects::lenient::timestamp_from_value;
use crate::domain::value_objects::{RemoteId, UserId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A row as returned by the remote store, with the sync columns lifted out and the domain
/// columns left in `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRow {
    pub id: RemoteId,
    pub user_id: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub fields: Map<String, Value>,
}

impl RemoteRow {
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(fields) = value else {
            return Err("Remote row must be a JSON object".to_string());
        };

        let id = match fields.get("id") {
            Some(Value::String(id)) => RemoteId::new(id.clone())?,
            Some(Value::Number(id)) => RemoteId::new(id.to_string())?,
            _ => return Err("Remote row is missing an id".to_string()),
        };
        let user_id = fields
            .get("user_id")
            .and_then(Value::as_str)
            .and_then(|raw| UserId::new(raw.to_string()).ok());

        Ok(Self {
            id,
            user_id,
            created_at: timestamp_from_value(fields.get("created_at")),
            updated_at: timestamp_from_value(fields.get("updated_at")),
            deleted_at: timestamp_from_value(fields.get("deleted_at")),
            fields,
        })
    }

    /// Soft-delete marker set by the remote.
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }
}
