use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws-chat/websocket";
pub const MESSAGE_PAGE_SIZE: u32 = 50;

pub const ENV_API_BASE_URL: &str = "CHAT_API_BASE_URL";
pub const ENV_WS_URL: &str = "CHAT_WS_URL";
pub const ENV_TOKEN: &str = "CHAT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub ws_url: String,
    pub page_size: u32,
    pub transport: TransportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            page_size: MESSAGE_PAGE_SIZE,
            transport: TransportConfig::default(),
        }
    }
}

/// Connection tuning for the STOMP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub reconnect_delay_ms: u64,
    pub heartbeat_outgoing_ms: u64,
    pub heartbeat_incoming_ms: u64,
    /// Unset means a connect attempt may hang until the socket errors.
    pub connect_timeout_ms: Option<u64>,
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5000,
            heartbeat_outgoing_ms: 4000,
            heartbeat_incoming_ms: 4000,
            connect_timeout_ms: None,
            channel_capacity: 100,
        }
    }
}

impl TransportConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

/// Environment variables (including a `.env` loaded by dotenvy) win over the
/// file.
pub fn apply_env_overrides(mut config: AppConfig) -> AppConfig {
    if let Some(url) = non_empty_env(ENV_API_BASE_URL) {
        log::debug!("Using {ENV_API_BASE_URL}={url}");
        config.api_base_url = url;
    }
    if let Some(url) = non_empty_env(ENV_WS_URL) {
        log::debug!("Using {ENV_WS_URL}={url}");
        config.ws_url = url;
    }
    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.page_size, MESSAGE_PAGE_SIZE);
        assert_eq!(config.transport.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.transport.connect_timeout(), None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        fs::write(
            &path,
            r#"{"ws_url":"wss://chat.example.com/ws","transport":{"connect_timeout_ms":1500}}"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.ws_url, "wss://chat.example.com/ws");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.transport.heartbeat_incoming_ms, 4000);
        assert_eq!(
            config.transport.connect_timeout(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        fs::write(&path, "{ not json").unwrap();
        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.json");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.page_size = 20;
        save_config(path, &config).unwrap();
        assert_eq!(load_config(path).page_size, 20);
    }
}
