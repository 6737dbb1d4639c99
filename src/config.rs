use crate::datasource::FetchOptions;
use crate::domain::SyncMode;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub lastfm_api_url: String,
    pub lastfm_api_key: String,
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Per (battle, participant) reconciliation cooldown.
    pub sync_cooldown_secs: i64,
    /// Page cap for quick-mode fetches.
    pub quick_max_pages: u32,
    pub inter_request_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// This worker's shard of the deduplicated participant list.
    pub shard_id: u32,
    pub total_shards: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16)?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let lastfm_api_url = env_map
            .get("LASTFM_API_URL")
            .cloned()
            .unwrap_or_else(|| "https://ws.audioscrobbler.com/2.0".to_string());

        let lastfm_api_key = env_map
            .get("LASTFM_API_KEY")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("LASTFM_API_KEY".to_string()))?;

        let tick_interval_secs = parse_or(&env_map, "TICK_INTERVAL_SECS", 60u64)?;
        let sync_cooldown_secs = parse_or(&env_map, "SYNC_COOLDOWN_SECS", 300i64)?;
        let quick_max_pages = parse_or(&env_map, "QUICK_MAX_PAGES", 2u32)?;
        let inter_request_delay_ms = parse_or(&env_map, "INTER_REQUEST_DELAY_MS", 250u64)?;
        let request_timeout_secs = parse_or(&env_map, "REQUEST_TIMEOUT_SECS", 10u64)?;

        let shard_id = parse_or(&env_map, "SHARD_ID", 0u32)?;
        let total_shards = parse_or(&env_map, "TOTAL_SHARDS", 1u32)?;
        if total_shards == 0 {
            return Err(ConfigError::InvalidValue(
                "TOTAL_SHARDS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if shard_id >= total_shards {
            return Err(ConfigError::InvalidValue(
                "SHARD_ID".to_string(),
                format!("must be < TOTAL_SHARDS ({})", total_shards),
            ));
        }

        Ok(Config {
            port,
            database_path,
            lastfm_api_url,
            lastfm_api_key,
            tick_interval_secs,
            sync_cooldown_secs,
            quick_max_pages,
            inter_request_delay_ms,
            request_timeout_secs,
            shard_id,
            total_shards,
        })
    }

    /// Fetch options for the given reconciliation mode. Quick mode caps
    /// pagination; full mode runs until the provider is exhausted.
    pub fn fetch_options(&self, mode: SyncMode) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_pages: match mode {
                SyncMode::Quick => Some(self.quick_max_pages),
                SyncMode::Full => None,
            },
            inter_request_delay: Duration::from_millis(self.inter_request_delay_ms),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("could not parse {:?}", raw),
            )
        }),
    }
}
