// Configuration - layered settings for the live feed, history and server
use crate::application::connection_pool::DEFAULT_MAX_CONNECTIONS;
use crate::application::debouncer::DEFAULT_QUIET_PERIOD;
use crate::domain::series::LIVE_SERIES_WINDOW;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub historical: HistoricalSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamSettings {
    pub base_url: String,
    pub max_connections: usize,
    pub debounce_ms: u64,
    pub channel_capacity: usize,
    pub series_window: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002/monitoring".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            debounce_ms: DEFAULT_QUIET_PERIOD.as_millis() as u64,
            channel_capacity: 256,
            series_window: LIVE_SERIES_WINDOW,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoricalSettings {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for HistoricalSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081/api/historical/process".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Loads `config/monitoring.*` when present, then `MONITORING__*` overrides.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/monitoring").required(false))
        .add_source(config::Environment::with_prefix("MONITORING").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
