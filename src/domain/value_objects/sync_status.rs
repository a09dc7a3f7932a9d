use serde::{Deserialize, Serialize};
use std::fmt;

/// Sync state carried by every synchronized local row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    Pending,
    Conflict,
    Unknown(String),
}

impl SyncStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Unknown(value) => value.as_str(),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SyncStatus {
    fn from(value: &str) -> Self {
        match value {
            "synced" => SyncStatus::Synced,
            "pending" => SyncStatus::Pending,
            "conflict" => SyncStatus::Conflict,
            other => SyncStatus::Unknown(other.to_string()),
        }
    }
}
