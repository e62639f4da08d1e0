use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::error::ImportError;
use crate::models::{MetricRecord, MetricType, MetricValue, TrainingPlanWeek};

/// One record as it arrives from a file, before validation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRecord {
    pub athlete_id: String,
    pub date: String,
    pub metric_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

/// One planned week as it arrives from a file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPlanWeek {
    pub athlete_id: String,
    pub start_date: String,
    pub volume_planned: f64,
    pub intensity_planned: f64,
}

/// Boundary checks applied before anything reaches the engine
#[derive(Debug, Clone, Default)]
pub struct RecordValidator {
    /// Records dated after this day are rejected
    today: Option<NaiveDate>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(row: usize, raw: &str) -> Result<NaiveDate, ImportError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| ImportError::InvalidDate {
        row,
        value: raw.to_string(),
    })
}

impl RecordValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_after(today: NaiveDate) -> Self {
        RecordValidator { today: Some(today) }
    }

    pub fn validate(&self, row: usize, raw: RawRecord) -> Result<MetricRecord, ImportError> {
        let athlete_id = raw.athlete_id.trim().to_string();
        if athlete_id.is_empty() {
            return Err(ImportError::MissingAthlete { row });
        }

        let date = parse_date(row, &raw.date)?;
        if let Some(today) = self.today {
            if date > today {
                return Err(ImportError::FutureDate { row, date });
            }
        }

        let metric_type = MetricType::from_slug(&raw.metric_type).ok_or_else(|| ImportError::UnknownMetricType {
            row,
            value: raw.metric_type.clone(),
        })?;

        let value = if metric_type.is_numeric() {
            let number = raw
                .value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ImportError::NonNumericValue {
                    row,
                    metric: metric_type.slug().to_string(),
                    value: raw.value.clone(),
                })?;

            if let Some((min, max)) = metric_type.scale() {
                if number < min || number > max {
                    return Err(ImportError::OutOfScale {
                        row,
                        metric: metric_type.slug().to_string(),
                        value: number,
                        min,
                        max,
                    });
                }
            }
            MetricValue::Numeric(number)
        } else {
            MetricValue::Text(raw.value.trim().to_string())
        };

        let recorded_at = match non_empty(raw.recorded_at) {
            Some(ts) => Some(
                DateTime::parse_from_rfc3339(&ts)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| ImportError::InvalidDate { row, value: ts })?,
            ),
            None => None,
        };

        Ok(MetricRecord {
            athlete_id,
            date,
            metric_type,
            sub_type: non_empty(raw.sub_type),
            value,
            unit: non_empty(raw.unit).or_else(|| Some(metric_type.unit().to_string()).filter(|u| !u.is_empty())),
            recorded_at,
        })
    }

    pub fn validate_plan_week(&self, row: usize, raw: RawPlanWeek) -> Result<TrainingPlanWeek, ImportError> {
        let athlete_id = raw.athlete_id.trim().to_string();
        if athlete_id.is_empty() {
            return Err(ImportError::MissingAthlete { row });
        }

        for (metric, value, max) in [
            ("volume_planned", raw.volume_planned, 10.0),
            ("intensity_planned", raw.intensity_planned, 100.0),
        ] {
            if !value.is_finite() || !(0.0..=max).contains(&value) {
                return Err(ImportError::OutOfScale {
                    row,
                    metric: metric.to_string(),
                    value,
                    min: 0.0,
                    max,
                });
            }
        }

        Ok(TrainingPlanWeek {
            athlete_id,
            start_date: parse_date(row, &raw.start_date)?,
            volume_planned: raw.volume_planned,
            intensity_planned: raw.intensity_planned,
        })
    }
}
