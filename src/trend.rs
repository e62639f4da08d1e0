//! Trend Engine
//!
//! Rolling averages over fixed lookback windows, a three-segment trend
//! classification and Pearson correlation between two date-aligned series.
//!
//! # Segmented trend
//!
//! A chronologically sorted series of `n >= 2` points is split into three
//! segments of `floor(n / 3)` points. The average of the first segment is
//! compared to the average of the last one (the most recent `floor(n / 3)`
//! points). With fewer than 3 points the first and last raw values are used.
//! A change within ±0.5% is reported as stable so single-day noise does not
//! flip the label.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::models::{MetricRecord, MetricType};
use crate::series::DateSeries;

/// Percent change inside which a trend is stable
pub const TREND_DEAD_BAND_PERCENT: f64 = 0.5;

/// Minimum overlapping dates for a correlation
pub const MIN_COMMON_DATES: usize = 5;

const ZERO_VARIANCE_EPSILON: f64 = 1e-12;

/// Lookback window for rolling averages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Window {
    Days(u32),
    AllTime,
}

impl Window {
    pub const STANDARD: [Window; 7] = [
        Window::Days(7),
        Window::Days(14),
        Window::Days(30),
        Window::Days(90),
        Window::Days(180),
        Window::Days(365),
        Window::AllTime,
    ];

    /// Restrict a series to this window ending on `as_of`
    pub fn apply(&self, series: &DateSeries, as_of: NaiveDate) -> DateSeries {
        match self {
            Window::Days(days) => series.window(as_of, *days),
            Window::AllTime => series.up_to(as_of),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Days(days) => write!(f, "{}d", days),
            Window::AllTime => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAverage {
    pub window: Window,
    pub average: Option<f64>,
    pub samples: usize,
}

/// Rolling averages for several metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingAverageReport {
    pub as_of: NaiveDate,
    pub averages: BTreeMap<MetricType, Vec<WindowAverage>>,
    /// Requested metrics that carry free text
    pub not_averageable: Vec<MetricType>,
}

impl RollingAverageReport {
    pub fn average(&self, metric: MetricType, window: Window) -> Option<f64> {
        self.averages
            .get(&metric)?
            .iter()
            .find(|w| w.window == window)
            .and_then(|w| w.average)
    }
}

/// Averages of one series for each standard window
pub fn window_averages(series: &DateSeries, as_of: NaiveDate) -> Vec<WindowAverage> {
    Window::STANDARD
        .iter()
        .map(|window| {
            let slice = window.apply(series, as_of);
            WindowAverage {
                window: *window,
                average: slice.mean(),
                samples: slice.len(),
            }
        })
        .collect()
}

/// Rolling averages of every requested metric over the standard windows
pub fn rolling_averages(
    records: &[MetricRecord],
    metrics: &[MetricType],
    as_of: NaiveDate,
) -> RollingAverageReport {
    let (numeric, text): (Vec<MetricType>, Vec<MetricType>) =
        metrics.iter().copied().partition(|metric| metric.is_numeric());

    let averages = numeric
        .into_iter()
        .map(|metric| {
            let series = DateSeries::from_records(records, metric);
            (metric, window_averages(&series, as_of))
        })
        .collect();

    RollingAverageReport {
        as_of,
        averages,
        not_averageable: text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    #[serde(rename = "n/a")]
    NotAvailable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Decreasing => write!(f, "decreasing"),
            TrendDirection::Stable => write!(f, "stable"),
            TrendDirection::NotAvailable => write!(f, "n/a"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub trend: TrendDirection,
    pub change_percent: Option<f64>,
    /// Average of the first segment
    pub first_value: Option<f64>,
    /// Average of the last segment
    pub last_value: Option<f64>,
    pub points: usize,
}

impl TrendResult {
    fn not_available(points: usize) -> Self {
        TrendResult {
            trend: TrendDirection::NotAvailable,
            change_percent: None,
            first_value: None,
            last_value: None,
            points,
        }
    }
}

/// Percent change from `first` to `last` with explicit zero-base cases
pub fn percent_change(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        if last == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (last - first) / first.abs() * 100.0
    }
}

pub fn classify_change(change_percent: f64) -> TrendDirection {
    if change_percent > TREND_DEAD_BAND_PERCENT {
        TrendDirection::Increasing
    } else if change_percent < -TREND_DEAD_BAND_PERCENT {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Three-segment trend of values that are already in chronological order
pub fn segmented_trend(values: &[f64]) -> TrendResult {
    let n = values.len();
    if n < 2 {
        return TrendResult::not_available(n);
    }

    let segment = n / 3;
    let (first_value, last_value) = if segment == 0 {
        (values[0], values[n - 1])
    } else {
        (average(&values[..segment]), average(&values[n - segment..]))
    };

    let change = percent_change(first_value, last_value);
    let trend = classify_change(change);
    debug!(points = n, first_value, last_value, change, %trend, "Segmented trend");

    TrendResult {
        trend,
        change_percent: Some(change),
        first_value: Some(first_value),
        last_value: Some(last_value),
        points: n,
    }
}

/// Trend of a date series; the ordered map guarantees chronological order
pub fn series_trend(series: &DateSeries) -> TrendResult {
    segmented_trend(&series.values())
}

/// Trend of arbitrary `(date, value)` points within the last `window_days`
/// days up to `as_of` (all points up to `as_of` when `None`)
///
/// Input order does not matter: points are sorted by date before segmenting.
pub fn compute_trend(
    points: &[(NaiveDate, f64)],
    window_days: Option<u32>,
    as_of: NaiveDate,
) -> TrendResult {
    let mut sorted: Vec<(NaiveDate, f64)> = points.to_vec();
    sorted.sort_by_key(|(date, _)| *date);

    let series = DateSeries::from_points(sorted);
    let window = window_days.map(Window::Days).unwrap_or(Window::AllTime);
    series_trend(&window.apply(&series, as_of))
}

/// Trend of one metric from raw records
pub fn metric_trend(
    records: &[MetricRecord],
    metric: MetricType,
    window_days: Option<u32>,
    as_of: NaiveDate,
) -> TrendResult {
    if !metric.is_numeric() {
        return TrendResult::not_available(0);
    }
    let series = DateSeries::from_records(records, metric);
    let window = window_days.map(Window::Days).unwrap_or(Window::AllTime);
    series_trend(&window.apply(&series, as_of))
}

/// Why a correlation carries no meaningful value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationNote {
    InsufficientCommonDates,
    ZeroVariance,
}

impl fmt::Display for CorrelationNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationNote::InsufficientCommonDates => write!(f, "insufficient common dates"),
            CorrelationNote::ZeroVariance => write!(f, "zero variance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Pearson coefficient in [-1, 1]
    pub correlation: Option<f64>,
    /// Slope of the regression of B on A
    pub impact_size: Option<f64>,
    pub common_dates: usize,
    pub reason: Option<CorrelationNote>,
}

/// Pearson correlation of two series joined on exact dates
pub fn correlate(a: &DateSeries, b: &DateSeries) -> CorrelationResult {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .filter_map(|(date, x)| b.get(date).map(|y| (x, y)))
        .collect();
    let n = pairs.len();

    if n < MIN_COMMON_DATES {
        return CorrelationResult {
            correlation: None,
            impact_size: None,
            common_dates: n,
            reason: Some(CorrelationNote::InsufficientCommonDates),
        };
    }

    let count = n as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / count;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / count;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    let mut scale_x = 0.0;
    let mut scale_y = 0.0;
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
        scale_x += x * x;
        scale_y += y * y;
    }

    let flat_x = sxx <= ZERO_VARIANCE_EPSILON * scale_x.max(1.0);
    let flat_y = syy <= ZERO_VARIANCE_EPSILON * scale_y.max(1.0);

    if flat_x || flat_y {
        return CorrelationResult {
            correlation: Some(0.0),
            impact_size: Some(if flat_x { 0.0 } else { sxy / sxx }),
            common_dates: n,
            reason: Some(CorrelationNote::ZeroVariance),
        };
    }

    let correlation = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    debug!(common_dates = n, correlation, "Correlation computed");

    CorrelationResult {
        correlation: Some(correlation),
        impact_size: Some(sxy / sxx),
        common_dates: n,
        reason: None,
    }
}

/// Correlation between two metrics of the same athlete
pub fn correlate_metrics(records: &[MetricRecord], a: MetricType, b: MetricType) -> CorrelationResult {
    correlate(
        &DateSeries::from_records(records, a),
        &DateSeries::from_records(records, b),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn base() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn dated(values: &[f64]) -> DateSeries {
        DateSeries::from_points(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (base() + Duration::days(i as i64), *v)),
        )
    }

    #[test]
    fn test_segmented_trend_example() {
        let values = [2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0];
        let result = segmented_trend(&values);
        assert_eq!(result.first_value, Some(2.0));
        assert_eq!(result.last_value, Some(8.0));
        assert_eq!(result.change_percent, Some(300.0));
        assert_eq!(result.trend, TrendDirection::Increasing);
    }

    #[test]
    fn test_trend_needs_two_points() {
        assert_eq!(segmented_trend(&[]).trend, TrendDirection::NotAvailable);
        assert_eq!(segmented_trend(&[4.0]).trend, TrendDirection::NotAvailable);
        assert_eq!(segmented_trend(&[4.0]).change_percent, None);
    }

    #[test]
    fn test_two_points_compare_raw_values() {
        let result = segmented_trend(&[5.0, 4.0]);
        assert!((result.change_percent.unwrap() + 20.0).abs() < 1e-9);
        assert_eq!(result.trend, TrendDirection::Decreasing);
    }

    #[test]
    fn test_dead_band_is_stable() {
        let result = segmented_trend(&[100.0, 100.0, 100.0, 100.4, 100.4, 100.4]);
        assert_eq!(result.trend, TrendDirection::Stable);
    }

    #[test]
    fn test_percent_change_zero_base() {
        assert_eq!(percent_change(0.0, 3.0), 100.0);
        assert_eq!(percent_change(0.0, -3.0), 100.0);
        assert_eq!(percent_change(0.0, 0.0), 0.0);
        assert_eq!(percent_change(-4.0, -2.0), 50.0);
    }

    #[test]
    fn test_compute_trend_window_and_order() {
        let as_of = base() + Duration::days(29);
        let mut points: Vec<(NaiveDate, f64)> =
            (0..30).map(|i| (base() + Duration::days(i), i as f64)).collect();
        points.reverse();

        let all = compute_trend(&points, None, as_of);
        assert_eq!(all.points, 30);
        assert_eq!(all.trend, TrendDirection::Increasing);

        let last_week = compute_trend(&points, Some(7), as_of);
        assert_eq!(last_week.points, 7);
    }

    #[test]
    fn test_rolling_averages_skip_text_metrics() {
        let as_of = base() + Duration::days(9);
        let records: Vec<MetricRecord> = (0..10)
            .map(|i| MetricRecord::numeric("a1", base() + Duration::days(i), MetricType::Mood, i as f64))
            .collect();

        let report = rolling_averages(&records, &[MetricType::Mood, MetricType::Comment], as_of);
        assert_eq!(report.not_averageable, vec![MetricType::Comment]);
        // last 7 days: 3..=9
        assert_eq!(report.average(MetricType::Mood, Window::Days(7)), Some(6.0));
        assert_eq!(report.average(MetricType::Mood, Window::AllTime), Some(4.5));
    }

    #[test]
    fn test_correlation_insufficient_common_dates() {
        let a = dated(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let b = DateSeries::from_points((0..3).map(|i| (base() + Duration::days(i), i as f64)));
        let result = correlate(&a, &b);
        assert_eq!(result.correlation, None);
        assert_eq!(result.common_dates, 3);
        assert_eq!(result.reason, Some(CorrelationNote::InsufficientCommonDates));
        assert_eq!(
            result.reason.map(|r| r.to_string()),
            Some("insufficient common dates".to_string())
        );
    }

    #[test]
    fn test_perfect_correlation_and_slope() {
        let a = dated(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = dated(&[3.0, 5.0, 7.0, 9.0, 11.0, 13.0]);
        let result = correlate(&a, &b);
        assert!((result.correlation.unwrap() - 1.0).abs() < 1e-12);
        assert!((result.impact_size.unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn test_zero_variance_reports_zero() {
        let a = dated(&[2.2, 2.2, 2.2, 2.2, 2.2]);
        let b = dated(&[1.0, 4.0, 2.0, 5.0, 3.0]);
        let result = correlate(&a, &b);
        assert_eq!(result.correlation, Some(0.0));
        assert_eq!(result.reason, Some(CorrelationNote::ZeroVariance));
    }

    proptest! {
        #[test]
        fn prop_trend_independent_of_input_order(
            values in proptest::collection::vec(-50.0f64..50.0, 2..40),
            seed in any::<u64>(),
        ) {
            let as_of = base() + Duration::days(values.len() as i64);
            let points: Vec<(NaiveDate, f64)> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (base() + Duration::days(i as i64), *v))
                .collect();

            let mut shuffled = points.clone();
            // deterministic rotation + reversal stands in for a shuffle
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            prop_assert_eq!(compute_trend(&points, None, as_of), compute_trend(&shuffled, None, as_of));
        }

        #[test]
        fn prop_correlation_symmetric(
            pairs in proptest::collection::vec((-100.0f64..100.0, -100.0f64..100.0), 5..30),
        ) {
            let a = dated(&pairs.iter().map(|(x, _)| *x).collect::<Vec<_>>());
            let b = dated(&pairs.iter().map(|(_, y)| *y).collect::<Vec<_>>());
            let ab = correlate(&a, &b);
            let ba = correlate(&b, &a);
            prop_assert_eq!(ab.correlation, ba.correlation);
            prop_assert_eq!(ab.reason, ba.reason);
            if let Some(r) = ab.correlation {
                prop_assert!((-1.0..=1.0).contains(&r));
            }
        }
    }
}
