use crate::domain::value_objects::lenient;
use crate::domain::value_objects::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Columns managed by the sync core rather than by the entity itself. They are stripped from
/// outgoing payloads and never read into a payload struct.
pub const SYNC_COLUMNS: &[&str] = &[
    "id",
    "remote_id",
    "user_id",
    "sync_status",
    "last_synced_at",
    "created_at",
    "updated_at",
    "deleted_at",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub facets: Vec<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub duration_minutes: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub difficulty: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub importance: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub contexts: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub people: Vec<String>,
    #[serde(default, deserialize_with = "lenient::object_or_empty")]
    pub frontmatter: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub body_markdown: String,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::bool_or_false")]
    pub archived: bool,
    #[serde(default, deserialize_with = "lenient::object_or_empty")]
    pub metadata: Map<String, Value>,
}

/// A tag, person or place referenced from entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    #[serde(rename = "type", default, deserialize_with = "lenient::string_or_default")]
    pub entity_type: String,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub display_name: String,
    #[serde(default, deserialize_with = "lenient::object_or_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub entry_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub template: String,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub total_duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub estimated_calories: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub overall_rpe: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub goal_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient::object_or_empty")]
    pub metadata: Map<String, Value>,
}

/// One set of an exercise inside a workout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRow {
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub exercise: String,
    #[serde(default, deserialize_with = "lenient::optional_integer")]
    pub set_index: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional_integer")]
    pub reps: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub weight: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub weight_unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub rpe: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub duration_seconds: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub distance: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub distance_unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::object_or_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionLog {
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub entry_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub meal_type: String,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_timestamp")]
    pub eaten_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub calories: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub protein_g: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub carbs_g: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub fat_g: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub fiber_g: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub sugar_g: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub sodium_mg: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub estimation_model: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient::json_list")]
    pub items: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub photo_uri: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub goal_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient::object_or_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub entry_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub bucket: String,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub path: String,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_integer")]
    pub byte_size: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub local_uri: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_or_default")]
    pub upload_status: String,
    #[serde(default, deserialize_with = "lenient::object_or_empty")]
    pub metadata: Map<String, Value>,
}

/// Domain fields of a synchronized record, one variant per [`EntityKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPayload {
    Entry(Entry),
    Goal(Goal),
    Entity(TrackedEntity),
    WorkoutSession(WorkoutSession),
    WorkoutRow(WorkoutRow),
    NutritionLog(NutritionLog),
    Attachment(Attachment),
}

impl EntityPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Entry(_) => EntityKind::Entries,
            EntityPayload::Goal(_) => EntityKind::Goals,
            EntityPayload::Entity(_) => EntityKind::Entities,
            EntityPayload::WorkoutSession(_) => EntityKind::WorkoutSessions,
            EntityPayload::WorkoutRow(_) => EntityKind::WorkoutRows,
            EntityPayload::NutritionLog(_) => EntityKind::NutritionLogs,
            EntityPayload::Attachment(_) => EntityKind::Attachments,
        }
    }

    /// Decodes the domain columns of a remote row and applies the product defaults for
    /// required columns the backend left empty.
    pub fn from_remote_row(kind: EntityKind, fields: &Map<String, Value>) -> Result<Self, String> {
        let value = Value::Object(fields.clone());
        let decode_err = |err: serde_json::Error| format!("Invalid {kind} row: {err}");

        let payload = match kind {
            EntityKind::Entries => {
                let mut entry: Entry = serde_json::from_value(value).map_err(decode_err)?;
                fill_default(&mut entry.title, "Untitled");
                fill_default(&mut entry.source, "app");
                EntityPayload::Entry(entry)
            }
            EntityKind::Goals => {
                let mut goal: Goal = serde_json::from_value(value).map_err(decode_err)?;
                fill_default(&mut goal.title, "Untitled Goal");
                EntityPayload::Goal(goal)
            }
            EntityKind::Entities => {
                let mut entity: TrackedEntity =
                    serde_json::from_value(value).map_err(decode_err)?;
                fill_default(&mut entity.entity_type, "tag");
                if entity.display_name.is_empty() {
                    entity.display_name = entity.key.clone();
                }
                EntityPayload::Entity(entity)
            }
            EntityKind::WorkoutSessions => {
                let mut session: WorkoutSession =
                    serde_json::from_value(value).map_err(decode_err)?;
                fill_default(&mut session.template, "strength");
                EntityPayload::WorkoutSession(session)
            }
            EntityKind::WorkoutRows => {
                let mut row: WorkoutRow = serde_json::from_value(value).map_err(decode_err)?;
                fill_default(&mut row.exercise, "Exercise");
                row.set_index.get_or_insert(1);
                EntityPayload::WorkoutRow(row)
            }
            EntityKind::NutritionLogs => {
                let mut log: NutritionLog = serde_json::from_value(value).map_err(decode_err)?;
                log.overlay_metadata();
                fill_default(&mut log.meal_type, "snack");
                EntityPayload::NutritionLog(log)
            }
            EntityKind::Attachments => {
                let mut attachment: Attachment =
                    serde_json::from_value(value).map_err(decode_err)?;
                fill_default(&mut attachment.upload_status, "pending");
                EntityPayload::Attachment(attachment)
            }
        };

        Ok(payload)
    }

    /// Reads a payload previously written by [`EntityPayload::to_json_string`].
    pub fn from_stored(kind: EntityKind, json: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(json).map_err(|err| format!("Invalid stored {kind}: {err}"))?;
        match value {
            Value::Object(map) => Self::from_remote_row(kind, &map),
            _ => Err(format!("Stored {kind} payload is not an object")),
        }
    }

    /// Domain columns as sent to the remote store. Sync bookkeeping columns are added by the
    /// caller.
    pub fn to_remote_payload(&self) -> Map<String, Value> {
        let value = match self {
            EntityPayload::Entry(inner) => serde_json::to_value(inner),
            EntityPayload::Goal(inner) => serde_json::to_value(inner),
            EntityPayload::Entity(inner) => serde_json::to_value(inner),
            EntityPayload::WorkoutSession(inner) => serde_json::to_value(inner),
            EntityPayload::WorkoutRow(inner) => serde_json::to_value(inner),
            EntityPayload::NutritionLog(inner) => serde_json::to_value(inner),
            EntityPayload::Attachment(inner) => serde_json::to_value(inner),
        };

        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.to_remote_payload()).to_string()
    }
}

impl NutritionLog {
    /// The backend keeps meal details inside `metadata`; those win over top-level columns.
    fn overlay_metadata(&mut self) {
        let meta = &self.metadata;
        if let Some(Value::String(kind)) = meta.get("type") {
            self.meal_type = kind.clone();
        }
        if let Some(Value::String(title)) = meta.get("title") {
            self.title = Some(title.clone());
        }
        if let Some(Value::Array(items)) = meta.get("items") {
            self.items = items.clone();
        }
        if let Some(Value::String(uri)) = meta.get("photo_uri") {
            self.photo_uri = Some(uri.clone());
        }
        if let Some(Value::String(notes)) = meta.get("notes") {
            self.notes = Some(notes.clone());
        }
        if meta.contains_key("tags") {
            self.tags = lenient::string_list_from_value(meta.get("tags"));
        }
        if let Some(Value::String(location)) = meta.get("location") {
            self.location = Some(location.clone());
        }
    }
}

fn fill_default(field: &mut String, default: &str) {
    if field.is_empty() {
        *field = default.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn entry_decodes_with_defaults() {
        let row = fields(json!({
            "title": null,
            "facets": ["task"],
            "tags": "[\"#work\", 3]",
            "frontmatter": {"goal": "goal-123"},
            "due_at": "2024-01-02T00:00:00Z",
            "scheduled_at": "not-a-date"
        }));

        let payload = EntityPayload::from_remote_row(EntityKind::Entries, &row).unwrap();
        let EntityPayload::Entry(entry) = payload else {
            panic!("expected entry");
        };
        assert_eq!(entry.title, "Untitled");
        assert_eq!(entry.source, "app");
        assert_eq!(entry.facets, vec!["task"]);
        assert_eq!(entry.tags, vec!["#work"]);
        assert_eq!(entry.frontmatter.get("goal"), Some(&json!("goal-123")));
        assert!(entry.due_at.is_some());
        assert!(entry.scheduled_at.is_none());
    }

    #[test]
    fn entity_display_name_falls_back_to_key() {
        let row = fields(json!({"key": "gym"}));
        let payload = EntityPayload::from_remote_row(EntityKind::Entities, &row).unwrap();
        let EntityPayload::Entity(entity) = payload else {
            panic!("expected entity");
        };
        assert_eq!(entity.entity_type, "tag");
        assert_eq!(entity.display_name, "gym");
    }

    #[test]
    fn nutrition_metadata_overrides_columns() {
        let row = fields(json!({
            "meal_type": "lunch",
            "title": "column title",
            "calories": 640,
            "metadata": {"type": "dinner", "title": "Ramen", "tags": ["late"]}
        }));
        let payload = EntityPayload::from_remote_row(EntityKind::NutritionLogs, &row).unwrap();
        let EntityPayload::NutritionLog(log) = payload else {
            panic!("expected nutrition log");
        };
        assert_eq!(log.meal_type, "dinner");
        assert_eq!(log.title.as_deref(), Some("Ramen"));
        assert_eq!(log.calories, Some(640.0));
        assert_eq!(log.tags, vec!["late"]);
    }

    #[test]
    fn stored_payload_reads_back_identically() {
        let row = fields(json!({"exercise": "Squat", "reps": 5, "weight": 100.5}));
        let payload = EntityPayload::from_remote_row(EntityKind::WorkoutRows, &row).unwrap();
        let stored = payload.to_json_string();
        let restored = EntityPayload::from_stored(EntityKind::WorkoutRows, &stored).unwrap();
        assert_eq!(restored, payload);
        assert_eq!(restored.kind(), EntityKind::WorkoutRows);
    }

    #[test]
    fn remote_payload_omits_sync_columns() {
        let row = fields(json!({"title": "Run 5k", "archived": true}));
        let payload = EntityPayload::from_remote_row(EntityKind::Goals, &row).unwrap();
        let outgoing = payload.to_remote_payload();
        assert_eq!(outgoing.get("title"), Some(&json!("Run 5k")));
        assert_eq!(outgoing.get("archived"), Some(&json!(true)));
        for column in SYNC_COLUMNS {
            assert!(!outgoing.contains_key(*column));
        }
    }
}
