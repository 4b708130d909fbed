//! Application configuration management.
//!
//! Configuration is stored at `~/.config/basecamp/config.json`. Missing
//! fields take their defaults, and `BASECAMP_*` environment variables
//! override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CacheSettings;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "basecamp";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_ORIGIN: &str = "BASECAMP_ORIGIN";
pub const ENV_REMOTE_URL: &str = "BASECAMP_REMOTE_URL";
pub const ENV_API_KEY: &str = "BASECAMP_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site the offline cache is built from.
    pub origin: String,
    /// Cache generation name. Bump it when a deploy changes assets.
    pub cache_version: String,
    pub manifest_path: String,
    pub seed_assets: Vec<String>,
    pub offline_page: String,
    pub remote_base_url: Option<String>,
    pub tracking_interval_secs: u64,
    pub last_display_name: Option<String>,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            cache_version: "offline-cache-v1".to_string(),
            manifest_path: "/asset-manifest.json".to_string(),
            seed_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/offline.html".to_string(),
                "/manifest.webmanifest".to_string(),
            ],
            offline_page: "/offline.html".to_string(),
            remote_base_url: None,
            tracking_interval_secs: 10,
            last_display_name: None,
            api_key: None,
        }
    }
}

impl Config {
    /// Load the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override fields from environment lookups. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(origin) = value(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(remote) = value(ENV_REMOTE_URL) {
            self.remote_base_url = Some(remote);
        }
        if let Some(key) = value(ENV_API_KEY) {
            self.api_key = Some(key);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn base_cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Asset buckets.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        Ok(Self::base_cache_dir()?.join("buckets"))
    }

    /// The local key-value store (tracking log, generation record).
    pub fn data_dir(&self) -> Result<PathBuf> {
        Ok(Self::base_cache_dir()?.join("store"))
    }

    pub fn tracking_interval(&self) -> Duration {
        Duration::from_secs(self.tracking_interval_secs.max(1))
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin: {}", self.origin))
    }

    pub fn cache_settings(&self) -> Result<CacheSettings> {
        let mut settings = CacheSettings::new(self.origin_url()?, self.cache_version.clone());
        settings.manifest_path = self.manifest_path.clone();
        settings.offline_page = self.offline_page.clone();
        settings.seed_assets = self.seed_assets.clone();
        Ok(settings)
    }
}
