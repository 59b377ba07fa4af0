//! Configuration management for the query engine
//!
//! Settings are loaded from a TOML file with one section per component:
//!
//! ```toml
//! [planner]
//! max_expansion_cofactors = 16
//!
//! [cache]
//! max_entries = 1000
//! max_idle_secs = 300
//! eviction_policy = "lru"
//!
//! [logging]
//! level = "INFO"
//! json_format = false
//! ```
//!
//! Missing sections and keys fall back to their defaults.

use crate::cache::QueryCacheConfig;
use crate::monitoring::logging::LoggingConfig;
use crate::query::planner::PlannerConfig;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const LOG_LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

/// Query engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Planner settings
    pub planner: PlannerConfig,
    /// Compiled-query cache settings
    pub cache: QueryCacheConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Cache max entries cannot be 0")]
    ZeroCacheEntries,

    #[error("Unknown log level: {0}")]
    UnknownLogLevel(String),

    #[error("Slow query threshold cannot be 0 when slow query logging is enabled")]
    ZeroSlowQueryThreshold,
}

/// Configuration manager
pub struct ConfigManager {
    /// Current configuration
    config: Arc<RwLock<EngineConfig>>,
    /// Configuration file path
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load the configuration at `config_path`, writing the defaults there
    /// first if the file does not exist
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let default_config = EngineConfig::default();
            Self::save_config(&config_path, &default_config)?;
            default_config
        };

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get current configuration
    pub fn get_config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Update, validate and persist the configuration.
    ///
    /// The in-memory configuration is left untouched when validation fails.
    pub fn update_config<F>(&self, section: &str, updater: F) -> Result<()>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut config = self.config.write();
        let mut updated = config.clone();
        updater(&mut updated);

        Self::validate_config(&updated)
            .with_context(|| format!("Invalid update to section '{}'", section))?;
        Self::save_config(&self.config_path, &updated)?;
        *config = updated;

        info!("Configuration updated: section={}", section);
        Ok(())
    }

    /// Reload configuration from file
    pub fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(&self.config_path)?;
        *self.config.write() = new_config;

        info!("Configuration reloaded from {}", self.config_path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.cache.max_entries == 0 {
            return Err(ConfigError::ZeroCacheEntries);
        }

        if !LOG_LEVELS.contains(&config.logging.level.to_uppercase().as_str()) {
            return Err(ConfigError::UnknownLogLevel(config.logging.level.clone()));
        }

        if config.logging.slow_query_logging && config.logging.slow_query_threshold_ms == 0 {
            return Err(ConfigError::ZeroSlowQueryThreshold);
        }

        Ok(())
    }

    /// Load and validate configuration from file
    pub fn load_config(path: &Path) -> Result<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Self::validate_config(&config)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(config)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.planner.max_expansion_cofactors, 16);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.eviction_policy, EvictionPolicy::LRU);
        assert_eq!(config.logging.level, "INFO");
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        config.cache.max_entries = 0;
        assert_eq!(ConfigManager::validate_config(&config), Err(ConfigError::ZeroCacheEntries));

        let config = EngineConfig {
            logging: LoggingConfig {
                level: "loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            ConfigManager::validate_config(&config),
            Err(ConfigError::UnknownLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gridquery.toml");
        std::fs::write(
            &config_path,
            "[planner]\nmax_expansion_cofactors = 4\n\n[cache]\neviction_policy = \"lfu\"\n",
        )
        .unwrap();

        let config = ConfigManager::load_config(&config_path).unwrap();
        assert_eq!(config.planner.max_expansion_cofactors, 4);
        assert_eq!(config.cache.eviction_policy, EvictionPolicy::LFU);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_config_manager() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("conf").join("gridquery.toml");

        let manager = ConfigManager::new(config_path.clone()).unwrap();
        assert!(config_path.exists());
        assert_eq!(manager.get_config(), EngineConfig::default());
    }

    #[test]
    fn test_config_update_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gridquery.toml");
        let manager = ConfigManager::new(config_path.clone()).unwrap();

        manager
            .update_config("cache", |config| config.cache.max_idle_secs = 0)
            .unwrap();
        assert_eq!(ConfigManager::load_config(&config_path).unwrap().cache.max_idle_secs, 0);

        let rejected = manager.update_config("cache", |config| config.cache.max_entries = 0);
        assert!(rejected.is_err());
        assert_eq!(manager.get_config().cache.max_entries, 1000);

        std::fs::write(&config_path, "[logging]\nlevel = \"debug\"\n").unwrap();
        manager.reload_config().unwrap();
        assert_eq!(manager.get_config().logging.level, "debug");
        assert_eq!(manager.get_config().cache.max_idle_secs, 300);
    }

    #[test]
    fn test_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gridquery.toml");
        std::fs::write(&config_path, "[cache]\nmax_entries = \"many\"\n").unwrap();

        let err = ConfigManager::load_config(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
