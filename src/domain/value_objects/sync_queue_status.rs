use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncQueueStatus {
    Pending,
    InProgress,
    Failed,
    Completed,
    Unknown(String),
}

impl SyncQueueStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SyncQueueStatus::Pending => "pending",
            SyncQueueStatus::InProgress => "in_progress",
            SyncQueueStatus::Failed => "failed",
            SyncQueueStatus::Completed => "completed",
            SyncQueueStatus::Unknown(value) => value.as_str(),
        }
    }

    /// Active items block a second item for the same record.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncQueueStatus::Pending | SyncQueueStatus::InProgress)
    }
}

impl fmt::Display for SyncQueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SyncQueueStatus {
    fn from(value: &str) -> Self {
        match value {
            "pending" => SyncQueueStatus::Pending,
            "in_progress" => SyncQueueStatus::InProgress,
            "failed" => SyncQueueStatus::Failed,
            "completed" => SyncQueueStatus::Completed,
            other => SyncQueueStatus::Unknown(other.to_string()),
        }
    }
}
