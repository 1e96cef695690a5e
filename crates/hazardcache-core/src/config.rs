//! Application configuration management.
//!
//! Configuration is stored at `~/.config/hazardcache/config.json`. Every field
//! has a default, so a missing file is not an error. Environment variables
//! (`HAZARDCACHE_*`) override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::EngineSettings;
use crate::fetch::client::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SOURCE_URL};
use crate::freshness::{IngestMode, DEFAULT_MAX_AGE_MILLIS};
use crate::gate::DEFAULT_COOLDOWN_MILLIS;
use crate::monitor::DEFAULT_RADIUS_METERS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "hazardcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// How often the engine re-checks freshness.
const DEFAULT_REFRESH_CHECK_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_cache_age_millis: i64,
    pub proximity_radius_meters: f64,
    pub alert_cooldown_millis: u64,
    pub ingest_mode: IngestMode,
    pub source_url: String,
    pub request_timeout_secs: u64,
    pub refresh_check_interval_secs: u64,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cache_age_millis: DEFAULT_MAX_AGE_MILLIS,
            proximity_radius_meters: DEFAULT_RADIUS_METERS,
            alert_cooldown_millis: DEFAULT_COOLDOWN_MILLIS,
            ingest_mode: IngestMode::default(),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_check_interval_secs: DEFAULT_REFRESH_CHECK_INTERVAL_SECS,
            cache_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            debug!(path = %path.display(), "Loaded config");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Override fields from `HAZARDCACHE_*` variables looked up through `var`.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("HAZARDCACHE_SOURCE_URL") {
            self.source_url = url;
        }
        if let Some(dir) = var("HAZARDCACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(radius) = var("HAZARDCACHE_RADIUS_METERS") {
            self.proximity_radius_meters = radius
                .parse()
                .with_context(|| format!("Invalid HAZARDCACHE_RADIUS_METERS: {}", radius))?;
        }
        if let Some(cooldown) = var("HAZARDCACHE_COOLDOWN_MS") {
            self.alert_cooldown_millis = cooldown
                .parse()
                .with_context(|| format!("Invalid HAZARDCACHE_COOLDOWN_MS: {}", cooldown))?;
        }
        if let Some(max_age) = var("HAZARDCACHE_MAX_AGE_MS") {
            self.max_cache_age_millis = max_age
                .parse()
                .with_context(|| format!("Invalid HAZARDCACHE_MAX_AGE_MS: {}", max_age))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.proximity_radius_meters.is_finite() || self.proximity_radius_meters <= 0.0 {
            bail!(
                "proximity_radius_meters must be a positive number, got {}",
                self.proximity_radius_meters
            );
        }
        if self.max_cache_age_millis <= 0 {
            bail!(
                "max_cache_age_millis must be positive, got {}",
                self.max_cache_age_millis
            );
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        if self.refresh_check_interval_secs == 0 {
            bail!("refresh_check_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_cache_age_millis: self.max_cache_age_millis,
            proximity_radius_meters: self.proximity_radius_meters,
            alert_cooldown_millis: self.alert_cooldown_millis,
            ingest_mode: self.ingest_mode,
            refresh_check_interval: Duration::from_secs(self.refresh_check_interval_secs),
        }
    }
}
