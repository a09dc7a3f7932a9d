use serde::{Deserialize, Serialize};
use std::fmt;

/// Tables that take part in synchronization. Local and remote table names are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Entries,
    Goals,
    Entities,
    WorkoutSessions,
    WorkoutRows,
    NutritionLogs,
    Attachments,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Entries,
        EntityKind::Goals,
        EntityKind::Entities,
        EntityKind::WorkoutSessions,
        EntityKind::WorkoutRows,
        EntityKind::NutritionLogs,
        EntityKind::Attachments,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Entries => "entries",
            EntityKind::Goals => "goals",
            EntityKind::Entities => "entities",
            EntityKind::WorkoutSessions => "workout_sessions",
            EntityKind::WorkoutRows => "workout_rows",
            EntityKind::NutritionLogs => "nutrition_logs",
            EntityKind::Attachments => "attachments",
        }
    }

    pub fn remote_table(&self) -> &'static str {
        self.table_name()
    }

    /// Entries are tombstoned with `deleted_at`; every other kind is physically removed.
    pub fn soft_deletes(&self) -> bool {
        matches!(self, EntityKind::Entries)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

impl TryFrom<&str> for EntityKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.table_name() == value)
            .ok_or_else(|| format!("Unknown table: {value}"))
    }
}
