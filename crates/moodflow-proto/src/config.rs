use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Connection settings for the remote generation job API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model version identifier sent with every submission.
    #[serde(default = "default_model_version")]
    pub model_version: String,
    /// Requested clip length in seconds.  Treated as a hint only — the
    /// service may ignore it.  Set to 0 to leave the parameter out of
    /// the submission entirely.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: Option<u32>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// How many seconds before end-of-track to start generating the
    /// next clip.
    #[serde(default = "default_advance_threshold_secs")]
    pub advance_threshold_secs: f64,
    /// Pause before retrying generation after a playback error, to
    /// avoid tight failure loops.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_credential_file")]
    pub credential_file: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model_version: default_model_version(),
            duration_secs: default_duration_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            advance_threshold_secs: default_advance_threshold_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            volume: default_volume(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            credential_file: default_credential_file(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.replicate.com/v1/predictions".to_string()
}

fn default_model_version() -> String {
    "9a423b48397ce2d82e2fc5be17cc6c273cc129cf70e0f44a911d6b0385853b4e".to_string()
}

fn default_duration_secs() -> Option<u32> {
    Some(90)
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_advance_threshold_secs() -> f64 {
    30.0
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_volume() -> f32 {
    0.5
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8790
}

fn default_credential_file() -> PathBuf {
    platform::config_dir().join("credential.json")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.api.base_url.starts_with("https://"));
        assert_eq!(config.api.poll_interval_secs, 3);
        assert_eq!(config.api.max_poll_attempts, 60);
        assert_eq!(config.player.advance_threshold_secs, 30.0);
        assert_eq!(config.player.retry_delay_secs, 2);
        assert!(config.http.enabled);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert!(config.daemon.credential_file.ends_with("credential.json"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            poll_interval_secs = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.api.poll_interval_secs, 1);
        assert_eq!(config.api.max_poll_attempts, 60);
        assert_eq!(config.player.volume, 0.5);
    }

    #[test]
    fn test_duration_hint_can_be_disabled() {
        let config: Config = toml::from_str("[api]\nduration_secs = 45\n").unwrap();
        assert_eq!(config.api.duration_secs, Some(45));
        // serde default keeps the hint when the key is absent
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.api.duration_secs, Some(90));
    }
}
