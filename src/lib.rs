// Library interface for readyrs
// The CLI in main.rs and the integration tests both build on these modules

pub mod alerts;
pub mod config;
pub mod cycle;
pub mod derived;
pub mod engine;
pub mod error;
pub mod import;
pub mod logging;
pub mod models;
pub mod readiness;
pub mod series;
pub mod store;
pub mod thresholds;
pub mod trend;

// Re-export commonly used types for convenience
pub use models::*;
pub use alerts::AlertEngine;
pub use config::AppConfig;
pub use cycle::{CyclePhase, CyclePhaseResult};
pub use engine::{AnalyticsEngine, AthleteReport};
pub use error::{ReadyError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use readiness::{ReadinessLevel, ReadinessScore, ReadinessStatus};
pub use series::DateSeries;
pub use store::{InMemoryStore, MetricStore, SqliteStore};
pub use thresholds::{ThresholdTable, Thresholds};
pub use trend::{CorrelationResult, TrendDirection, TrendResult, Window};
