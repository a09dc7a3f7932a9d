use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub auto_sync: bool,
    /// Seconds between automatic push/pull cycles.
    pub sync_interval: u64,
    pub batch_size: u32,
    /// Seconds between scans for failed queue items that are due for a retry.
    pub retry_check_interval: u64,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/insight-sync.db?mode=rwc".to_string(),
                max_connections: 5,
            },
            sync: SyncConfig::default(),
            realtime: RealtimeConfig { enabled: true },
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval: 30,
            batch_size: 100,
            retry_check_interval: 10,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 5 * 60 * 1_000, // 5 minutes
            max_retries: 10,
        }
    }
}

impl SyncConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }

    pub fn retry_check_interval(&self) -> Duration {
        Duration::from_secs(self.retry_check_interval)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("INSIGHT_SYNC_DATABASE_URL") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.database.url = trimmed.to_string();
            }
        }
        if let Ok(v) = std::env::var("INSIGHT_SYNC_AUTO_SYNC") {
            cfg.sync.auto_sync = parse_bool(&v, cfg.sync.auto_sync);
        }
        if let Some(value) = env_u64("INSIGHT_SYNC_INTERVAL_SECS") {
            cfg.sync.sync_interval = value.max(1);
        }
        if let Some(value) = env_u64("INSIGHT_SYNC_BATCH_SIZE") {
            cfg.sync.batch_size = u32::try_from(value).unwrap_or(u32::MAX).max(1);
        }
        if let Some(value) = env_u64("INSIGHT_SYNC_RETRY_CHECK_SECS") {
            cfg.sync.retry_check_interval = value.max(1);
        }
        if let Some(value) = env_u64("INSIGHT_SYNC_INITIAL_RETRY_MS") {
            cfg.sync.initial_retry_delay_ms = value;
        }
        if let Some(value) = env_u64("INSIGHT_SYNC_MAX_RETRY_MS") {
            cfg.sync.max_retry_delay_ms = value;
        }
        if let Some(value) = env_u64("INSIGHT_SYNC_MAX_RETRIES") {
            cfg.sync.max_retries = u32::try_from(value).unwrap_or(u32::MAX);
        }
        if let Ok(v) = std::env::var("INSIGHT_SYNC_REALTIME") {
            cfg.realtime.enabled = parse_bool(&v, cfg.realtime.enabled);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.sync.batch_size == 0 {
            return Err("Sync batch_size must be greater than 0".to_string());
        }
        if self.sync.sync_interval == 0 {
            return Err("Sync sync_interval must be greater than 0".to_string());
        }
        if self.sync.retry_check_interval == 0 {
            return Err("Sync retry_check_interval must be greater than 0".to_string());
        }
        if self.sync.max_retries == 0 {
            return Err("Sync max_retries must be greater than 0".to_string());
        }
        if self.sync.initial_retry_delay_ms > self.sync.max_retry_delay_ms {
            return Err(
                "Sync initial_retry_delay_ms must not exceed max_retry_delay_ms".to_string(),
            );
        }
        Ok(())
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}
