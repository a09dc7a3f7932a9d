use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field snapshot carried by a queue item. Always a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuePayload(Map<String, Value>);

impl QueuePayload {
    pub fn new(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(format!("Queue payload must be a JSON object, got {other}")),
        }
    }

    /// Lenient decoding for persisted payloads: anything that is not an object becomes empty.
    pub fn from_json_str_lossy(json: &str) -> Self {
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Shallow merge; fields of `newer` win.
    pub fn merge(&mut self, newer: QueuePayload) {
        for (key, value) in newer.0 {
            self.0.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overrides_existing_fields() {
        let mut base = QueuePayload::new(json!({"title": "A", "tags": ["x"]})).unwrap();
        base.merge(QueuePayload::new(json!({"title": "B", "status": "done"})).unwrap());
        assert_eq!(
            Value::Object(base.into_map()),
            json!({"title": "B", "tags": ["x"], "status": "done"})
        );
    }

    #[test]
    fn non_object_payloads() {
        assert!(QueuePayload::new(json!([1, 2])).is_err());
        assert_eq!(QueuePayload::new(Value::Null), Ok(QueuePayload::default()));
        assert_eq!(QueuePayload::from_json_str_lossy("not json"), QueuePayload::default());
    }
}
