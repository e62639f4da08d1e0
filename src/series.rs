//! Date-keyed numeric series built from raw records
//!
//! Upstream data is user-submitted and can contain same-day corrections, so
//! records are first collapsed under upsert semantics (one record per
//! `(athlete, date, metric type, sub-type)`, latest submission wins) and then
//! folded into one value per day.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{MetricRecord, MetricType, RecordKey};

/// First day of the `days`-day span ending on `as_of`, `None` when it
/// predates the representable calendar
pub fn span_start(as_of: NaiveDate, days: u32) -> Option<NaiveDate> {
    as_of.checked_sub_days(Days::new(days.saturating_sub(1) as u64))
}

/// Collapse duplicate submissions, keeping the latest one per record key
///
/// "Latest" means the greatest `recorded_at`; records without a timestamp
/// rank by their position in the input, later entries winning.
pub fn dedup_records(records: &[MetricRecord]) -> Vec<MetricRecord> {
    let mut latest: BTreeMap<RecordKey, (usize, &MetricRecord)> = BTreeMap::new();

    for (position, record) in records.iter().enumerate() {
        let key = record.key();
        let replace = match latest.get(&key) {
            None => true,
            Some((_, existing)) => match (existing.recorded_at, record.recorded_at) {
                (Some(old), Some(new)) => new >= old,
                (Some(_), None) => false,
                _ => true,
            },
        };
        if replace {
            latest.insert(key, (position, record));
        }
    }

    let mut kept: Vec<(usize, &MetricRecord)> = latest.into_values().collect();
    kept.sort_by_key(|(position, _)| *position);
    kept.into_iter().map(|(_, record)| record.clone()).collect()
}

/// Ordered map of one numeric value per day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateSeries {
    points: BTreeMap<NaiveDate, f64>,
}

impl DateSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Daily series for one metric type
    ///
    /// Non-numeric values are skipped. Several sub-typed entries on the same
    /// day are summed for additive metrics (session load) and averaged
    /// otherwise.
    pub fn from_records(records: &[MetricRecord], metric_type: MetricType) -> Self {
        let relevant: Vec<MetricRecord> = records
            .iter()
            .filter(|r| r.metric_type == metric_type)
            .cloned()
            .collect();

        let mut per_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for record in dedup_records(&relevant) {
            if let Some(value) = record.numeric_value() {
                per_day.entry(record.date).or_default().push(value);
            }
        }

        let points = per_day
            .into_iter()
            .map(|(date, values)| {
                let total: f64 = values.iter().sum();
                let value = if metric_type.is_additive() {
                    total
                } else {
                    total / values.len() as f64
                };
                (date, value)
            })
            .collect();

        DateSeries { points }
    }

    /// Build from arbitrary `(date, value)` pairs; a later pair for the same date wins
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        DateSeries {
            points: points.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, date: NaiveDate, value: f64) {
        self.points.insert(date, value);
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.points.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.keys().next_back().copied()
    }

    /// Chronologically ordered values
    pub fn values(&self) -> Vec<f64> {
        self.points.values().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.points.iter().map(|(d, v)| (*d, *v))
    }

    /// Points with `from <= date <= to`
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> DateSeries {
        if from > to {
            return DateSeries::new();
        }
        DateSeries {
            points: self
                .points
                .range(from..=to)
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }

    /// The `days` calendar days ending on and including `as_of`
    ///
    /// A window reaching past the start of the calendar covers everything up to `as_of`.
    pub fn window(&self, as_of: NaiveDate, days: u32) -> DateSeries {
        if days == 0 {
            return DateSeries::new();
        }
        match span_start(as_of, days) {
            Some(from) => self.between(from, as_of),
            None => self.up_to(as_of),
        }
    }

    /// Everything up to and including `as_of`
    pub fn up_to(&self, as_of: NaiveDate) -> DateSeries {
        DateSeries {
            points: self
                .points
                .range(..=as_of)
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.values().sum::<f64>() / self.points.len() as f64)
    }

    pub fn sum(&self) -> f64 {
        self.points.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_same_day_correction_latest_wins() {
        let records = vec![
            MetricRecord::numeric("a1", day(1), MetricType::Pain, 6.0),
            MetricRecord::numeric("a1", day(1), MetricType::Pain, 2.0),
        ];
        let series = DateSeries::from_records(&records, MetricType::Pain);
        assert_eq!(series.len(), 1);
        assert_eq!(series.get(day(1)), Some(2.0));
    }

    #[test]
    fn test_recorded_at_beats_input_order() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap();
        let records = vec![
            MetricRecord::numeric("a1", day(1), MetricType::Mood, 8.0).with_recorded_at(late),
            MetricRecord::numeric("a1", day(1), MetricType::Mood, 3.0).with_recorded_at(early),
        ];
        let deduped = dedup_records(&records);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].numeric_value(), Some(8.0));
    }

    #[test]
    fn test_sessions_are_summed_per_day() {
        let records = vec![
            MetricRecord::numeric("a1", day(2), MetricType::SessionLoad, 6.0).with_sub_type("am"),
            MetricRecord::numeric("a1", day(2), MetricType::SessionLoad, 4.0).with_sub_type("pm"),
        ];
        let series = DateSeries::from_records(&records, MetricType::SessionLoad);
        assert_eq!(series.get(day(2)), Some(10.0));
    }

    #[test]
    fn test_window_is_inclusive_of_as_of() {
        let series = DateSeries::from_points((1..=10).map(|d| (day(d), d as f64)));
        let window = series.window(day(10), 7);
        assert_eq!(window.len(), 7);
        assert_eq!(window.first_date(), Some(day(4)));
        assert_eq!(series.window(day(10), 0).len(), 0);
    }

    #[test]
    fn test_window_beyond_calendar_covers_all_history() {
        let series = DateSeries::from_points((1..=10).map(|d| (day(d), d as f64)));
        assert_eq!(span_start(day(10), u32::MAX), None);
        let window = series.window(day(9), u32::MAX);
        assert_eq!(window.len(), 9);
        assert_eq!(window.last_date(), Some(day(9)));
    }

    #[test]
    fn test_text_values_skipped() {
        let mut note = MetricRecord::numeric("a1", day(3), MetricType::Comment, 0.0);
        note.value = crate::models::MetricValue::Text("tired".to_string());
        let series = DateSeries::from_records(&[note], MetricType::Comment);
        assert!(series.is_empty());
    }
}
