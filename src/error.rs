//! Unified error hierarchy for readyrs
//!
//! Insufficient data is not an error anywhere in the engine; these types
//! cover configuration, storage and import boundaries only.

use chrono::NaiveDate;
use thiserror::Error;

/// Top-level error type for all readyrs operations
#[derive(Debug, Error)]
pub enum ReadyError {
    /// Threshold table or configuration file problems
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metric store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Record import and boundary validation errors
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors, fatal at configuration-validation time
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// One or more required `key.name` threshold entries are absent
    #[error("Missing threshold entries: {}", .keys.join(", "))]
    MissingThresholds { keys: Vec<String> },

    /// A threshold is present but unusable
    #[error("Invalid threshold {key}: {reason}")]
    InvalidThreshold { key: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Metric store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Athlete not found: {0}")]
    AthleteNotFound(String),

    #[error("Corrupted row in {table}: {reason}")]
    CorruptedRow { table: String, reason: String },
}

/// Errors raised while validating upstream records at the adapter boundary
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Row {row}: invalid date '{value}'")]
    InvalidDate { row: usize, value: String },

    #[error("Row {row}: unknown metric type '{value}'")]
    UnknownMetricType { row: usize, value: String },

    #[error("Row {row}: {metric} expects a numeric value, got '{value}'")]
    NonNumericValue {
        row: usize,
        metric: String,
        value: String,
    },

    #[error("Row {row}: value {value} outside {metric} scale {min}-{max}")]
    OutOfScale {
        row: usize,
        metric: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Row {row}: missing athlete id")]
    MissingAthlete { row: usize },

    #[error("Row {row}: record dated {date} is in the future")]
    FutureDate { row: usize, date: NaiveDate },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for readyrs operations
pub type Result<T> = std::result::Result<T, ReadyError>;

impl ReadyError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ReadyError::Config(_) => ErrorSeverity::Critical,
            ReadyError::Import(_) => ErrorSeverity::Warning,
            ReadyError::Store(StoreError::AthleteNotFound(_)) => ErrorSeverity::Warning,
            ReadyError::Store(_) => ErrorSeverity::Error,
            ReadyError::Io(_) => ErrorSeverity::Error,
            ReadyError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ReadyError::Config(ConfigError::MissingThresholds { keys }) => format!(
                "The threshold configuration is incomplete ({} missing). Add: {}",
                keys.len(),
                keys.join(", ")
            ),
            ReadyError::Store(StoreError::AthleteNotFound(id)) => {
                format!("No athlete with id '{}' in the metric store.", id)
            }
            ReadyError::Import(err) => format!("Some records were rejected: {}", err),
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Configuration or internal fault, the engine cannot run
    Critical,
    /// Operation failed
    Error,
    /// Input rejected, other work can continue
    Warning,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = ReadyError::Config(ConfigError::MissingThresholds {
            keys: vec!["pain.trend_increase_percent".to_string()],
        });
        assert_eq!(err.severity(), ErrorSeverity::Critical);

        let err = ReadyError::Import(ImportError::MissingAthlete { row: 3 });
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_missing_threshold_message_lists_keys() {
        let err = ReadyError::from(ConfigError::MissingThresholds {
            keys: vec!["load.acwr_danger".to_string(), "general.min_samples".to_string()],
        });
        let message = err.user_message();
        assert!(message.contains("2 missing"));
        assert!(message.contains("load.acwr_danger"));
        assert!(message.contains("general.min_samples"));
    }

    #[test]
    fn test_import_error_display() {
        let err = ImportError::UnknownMetricType {
            row: 4,
            value: "vo2".to_string(),
        };
        assert_eq!(err.to_string(), "Row 4: unknown metric type 'vo2'");
    }
}
