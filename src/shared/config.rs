use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub replay: ReplayConfig,
    pub channel: ChannelConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Rejected attempts before a queued mutation is dropped.
    pub max_attempts: u32,
    /// Per-request timeout during a replay pass.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_concurrent: u32,
    pub max_file_size: u64,
    /// How long a completed task stays visible before removal.
    pub completed_linger_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/tessera-sync.db".to_string(),
                max_connections: 5,
                connection_timeout: 30,
            },
            api: ApiConfig {
                base_url: "https://api.tessera.app/v1".to_string(),
            },
            replay: ReplayConfig {
                max_attempts: 5,
                request_timeout_secs: 30,
            },
            channel: ChannelConfig {
                url: "wss://push.tessera.app/socket".to_string(),
                reconnect_base_delay_ms: 500,
                reconnect_max_delay_ms: 30_000,
                max_reconnect_attempts: 10,
            },
            upload: UploadConfig {
                max_concurrent: 4,
                max_file_size: 25 * 1024 * 1024, // 25MB
                completed_linger_ms: 3_000,
            },
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("TESSERA_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v;
            }
        }
        if let Ok(v) = std::env::var("TESSERA_API_BASE_URL") {
            if !v.trim().is_empty() {
                cfg.api.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("TESSERA_CHANNEL_URL") {
            if !v.trim().is_empty() {
                cfg.channel.url = v;
            }
        }
        if let Ok(v) = std::env::var("TESSERA_REPLAY_MAX_ATTEMPTS") {
            if let Some(value) = parse_u32(&v) {
                cfg.replay.max_attempts = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("TESSERA_REPLAY_TIMEOUT_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.replay.request_timeout_secs = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("TESSERA_CHANNEL_MAX_RECONNECTS") {
            if let Some(value) = parse_u32(&v) {
                cfg.channel.max_reconnect_attempts = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("TESSERA_UPLOAD_MAX_CONCURRENT") {
            if let Some(value) = parse_u32(&v) {
                cfg.upload.max_concurrent = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("TESSERA_UPLOAD_MAX_FILE_SIZE") {
            if let Some(value) = parse_u64(&v) {
                cfg.upload.max_file_size = value.max(1);
            }
        }

        cfg
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.api.base_url.trim().is_empty() {
            return Err("API base_url must not be empty".to_string());
        }
        if self.replay.max_attempts == 0 {
            return Err("Replay max_attempts must be greater than 0".to_string());
        }
        if self.channel.max_reconnect_attempts == 0 {
            return Err("Channel max_reconnect_attempts must be greater than 0".to_string());
        }
        if self.channel.reconnect_base_delay_ms > self.channel.reconnect_max_delay_ms {
            return Err("Channel reconnect_base_delay_ms must not exceed the max delay".to_string());
        }
        if self.upload.max_concurrent == 0 {
            return Err("Upload max_concurrent must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}
