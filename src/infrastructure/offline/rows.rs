use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct LocalRecordRow {
    pub id: String,
    pub remote_id: Option<String>,
    pub user_id: String,
    pub data: String,
    pub sync_status: String,
    pub last_synced_at: Option<i64>,
    pub remote_updated_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SyncQueueItemRow {
    pub id: i64,
    pub table_name: String,
    pub record_id: String,
    pub operation: String,
    pub payload: String,
    pub status: String,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub next_retry_at: Option<i64>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct StatusCountRow {
    pub status: String,
    pub count: i64,
}
