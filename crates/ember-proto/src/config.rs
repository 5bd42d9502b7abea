use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Explicit mpv path. When unset the binary is discovered at startup.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Subtitle language preference passed as `--slang`.
    #[serde(default = "default_slang")]
    pub slang: String,
    #[serde(default = "default_fullscreen")]
    pub fullscreen: bool,
    /// Appended verbatim after the built-in arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Width requested from the server when fetching cover art.
    #[serde(default = "default_cover_width")]
    pub cover_width: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default tracing filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: None,
            slang: default_slang(),
            fullscreen: default_fullscreen(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
            page_size: default_page_size(),
            ping_interval_secs: default_ping_interval_secs(),
            search_limit: default_search_limit(),
            cover_width: default_cover_width(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

fn default_slang() -> String {
    "chi,zho,zh,chs,cht,cn,chinese".to_string()
}

fn default_fullscreen() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_image_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> usize {
    20
}

fn default_ping_interval_secs() -> u64 {
    10
}

fn default_search_limit() -> usize {
    50
}

fn default_cover_width() -> u32 {
    800
}

fn default_log_filter() -> String {
    "info,hyper_util=warn,reqwest=warn,hyper=warn".to_string()
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

impl Default for Config {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            network: NetworkConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.timeout(), Duration::from_secs(15));
        assert_eq!(config.network.page_size, 20);
        assert_eq!(config.network.ping_interval(), Duration::from_secs(10));
        assert!(config.player.binary.is_none());
        assert!(config.player.slang.starts_with("chi"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[network]\npage_size = 40\n").unwrap();
        assert_eq!(config.network.page_size, 40);
        assert_eq!(config.network.timeout_secs, 15);
        assert!(config.player.fullscreen);
        assert!(config.log.filter.starts_with("info"));
    }
}
