use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::errors::{AppError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub backend_base_url: String,
    pub download_path: PathBuf,
    pub meta_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    /// When polling exhausts every attempt the transfer is still attempted;
    /// the GET itself decides whether the file really exists. Set to false to
    /// treat exhaustion as fatal instead.
    pub proceed_after_poll_timeout: bool,
    pub ui: UiConfig,
    pub proxy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UiConfig {
    pub theme: String,
    pub show_notifications: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_base_url: "https://video-downloader-backend-3jov.onrender.com".to_string(),
            download_path: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            meta_timeout_secs: 15,
            poll_interval_ms: 1000,
            poll_max_attempts: 30,
            proceed_after_poll_timeout: true,
            ui: UiConfig::default(),
            proxy: None,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            show_notifications: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: AppConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        let config_dir = config_path.parent().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Config path has no parent directory".to_string(),
            ))
        })?;

        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("clipfetch").join("config.json"))
    }

    pub fn meta_timeout(&self) -> Duration {
        Duration::from_secs(self.meta_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
