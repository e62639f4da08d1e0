use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::alerts::DEFAULT_ALERT_WINDOW_DAYS;
use crate::engine::AnalyticsEngine;
use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::models::AlertCategory;
use crate::thresholds::{ThresholdTable, Thresholds};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Where records are stored
    #[serde(default)]
    pub storage: StorageSettings,

    /// Analysis defaults
    #[serde(default)]
    pub analysis: AnalysisSettings,

    #[serde(default)]
    pub logging: LogConfig,

    /// Threshold table consumed by every component
    #[serde(default)]
    pub thresholds: ThresholdTable,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database file
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("readyrs")
                .join("readyrs.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Days of history loaded per athlete before computing anything
    pub lookback_days: u32,

    /// Active window for general alerts
    pub alert_window_days: u32,

    /// Categories evaluated when none are requested explicitly
    pub alert_categories: Vec<AlertCategory>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            lookback_days: 730,
            alert_window_days: DEFAULT_ALERT_WINDOW_DAYS,
            alert_categories: AlertCategory::ALL.to_vec(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            storage: StorageSettings::default(),
            analysis: AnalysisSettings::default(),
            logging: LogConfig::default(),
            thresholds: ThresholdTable::default(),
        }
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("readyrs")
            .join("config.toml")
    }

    /// Load the default file, falling back to built-in defaults when it is absent
    ///
    /// A file that exists but cannot be parsed is still an error.
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path();
        if !config_path.exists() {
            warn!(path = %config_path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_file(&config_path)
    }

    /// Validated thresholds; every missing key is reported at once
    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Thresholds::from_table(&self.thresholds)
    }

    /// Engine configured from this file
    pub fn engine(&self) -> Result<AnalyticsEngine, ConfigError> {
        Ok(AnalyticsEngine::new(self.thresholds()?).with_alert_window_days(self.analysis.alert_window_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::READINESS_KEY;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.metadata.version, deserialized.metadata.version);
        assert_eq!(config.thresholds, deserialized.thresholds);
        assert_eq!(config.analysis, deserialized.analysis);
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = AppConfig::default();
        original.analysis.alert_window_days = 14;
        original.thresholds.set(READINESS_KEY, "green_min", 80.0);
        original.save_to_file(&config_path).unwrap();

        let loaded = AppConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.analysis.alert_window_days, 14);
        assert_eq!(loaded.thresholds().unwrap().readiness.green_min, 80.0);
    }

    #[test]
    fn test_missing_threshold_is_fatal() {
        let mut config = AppConfig::default();
        config.thresholds.remove(READINESS_KEY, "pain_penalty_factor");

        match config.engine() {
            Err(ConfigError::MissingThresholds { keys }) => {
                assert_eq!(keys, vec!["readiness.pain_penalty_factor".to_string()]);
            }
            other => panic!("expected missing thresholds, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_minimal_file_uses_section_defaults() {
        let content = r#"
[metadata]
version = "1.0"
created_at = "2024-01-01T00:00:00Z"
updated_at = "2024-01-01T00:00:00Z"
"#;
        let config: AppConfig = toml::from_str(content).unwrap();
        assert_eq!(config.analysis.lookback_days, 730);
        assert!(config.thresholds().is_ok());
    }
}
