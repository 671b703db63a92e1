//! Configuration management for the media scheduler
//!
//! Settings are layered: built-in defaults, then the TOML file (if any),
//! then `MEDIA_SCHED_*` environment overrides. The file mirrors the
//! runtime [`SchedulerConfig`] sections so it converts without loss.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{
    ConcurrencyLimits, JanitorConfig, ReadinessConfig, SchedulerConfig, SchedulerConfigBuilder,
};
use crate::constants::config as paths;
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Concurrency limits applied when the scheduler starts
    pub limits: ConcurrencyLimits,
    /// Progressive readiness settings
    pub readiness: ReadinessConfig,
    /// Cache janitor settings
    pub janitor: JanitorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Default config file location for the current user
    pub fn default_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(paths::APP_DIR).join(paths::FILE_NAME))
    }

    /// Load configuration from a TOML file
    pub async fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load configuration with precedence defaults < file < environment
    ///
    /// An explicitly given path must exist; the default location is optional.
    pub async fn load_or_default(explicit: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path).await?,
            None => match Self::default_path() {
                Ok(path) if path.exists() => Self::load_from(&path).await?,
                Ok(path) => {
                    debug!("No config file at {}, using defaults", path.display());
                    Self::default()
                }
                Err(e) => {
                    debug!("{}, using defaults", e);
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `MEDIA_SCHED_MAX_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets: [(&str, &mut usize); 3] = [
            (paths::ENV_MAX_GLOBAL, &mut self.limits.max_global),
            (paths::ENV_MAX_VIDEO, &mut self.limits.max_video),
            (paths::ENV_MAX_THUMB, &mut self.limits.max_thumb),
        ];

        for (key, slot) in targets {
            let Some(raw) = lookup(key) else {
                continue;
            };
            let value = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: key.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
            debug!("{} overrides limit with {}", key, value);
            *slot = value;
        }
        Ok(())
    }

    /// Write the configuration, creating parent directories as needed
    pub async fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_toml_string()?).await?;
        info!("Wrote configuration to: {}", path.display());
        Ok(())
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every section, collecting all problems
    pub fn validate(&self) -> ConfigResult<()> {
        self.to_scheduler_config()
            .validate()
            .map_err(|errors| ConfigError::ValidationFailed { errors })
    }

    /// Convert to the runtime scheduler configuration
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        let ConcurrencyLimits {
            max_global,
            max_video,
            max_thumb,
        } = self.limits;

        SchedulerConfigBuilder::new()
            .limits(max_global, max_video, max_thumb)
            .readiness(self.readiness.clone())
            .janitor(self.janitor.clone())
            .build()
    }
}
