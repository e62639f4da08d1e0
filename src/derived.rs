//! Derived Metric Calculator
//!
//! Pure functions that turn raw daily records into composite values:
//!
//! - **Wellness index (0-10)**: sleep quality, inverted fatigue, inverted pain
//!   and mood, rescaled to the sub-scores actually present
//! - **Internal load**: sum of session RPE loads over a week
//! - **Normalized internal load**: weekly load divided by the number of
//!   distinct days that carry a load entry
//! - **Planned load**: `(volume + 1) + sqrt(intensity - 50) * 0.25` above an
//!   intensity baseline of 50
//! - **Load ratio**: normalized internal load ÷ planned load (0 = uncomputable)
//! - **ACWR**: 7-day acute load ÷ 28-day chronic weekly average
//! - **Monotony**: mean daily load ÷ standard deviation over 7 days

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeSet;
use tracing::debug;

use crate::models::{
    week_start, AthleteSnapshot, CalculatedMetric, CalculatedMetricType, MetricRecord, MetricType,
};
use crate::series::{dedup_records, DateSeries};

/// Intensity below which planned intensity adds no load
const PLANNED_INTENSITY_BASELINE: f64 = 50.0;
const PLANNED_INTENSITY_WEIGHT: f64 = 0.25;

const ACUTE_DAYS: u32 = 7;
const CHRONIC_DAYS: u32 = 28;

/// Same-day inputs of the wellness index, each on its native scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WellnessComponents {
    pub sleep_quality: Option<f64>,
    pub general_fatigue: Option<f64>,
    pub pain: Option<f64>,
    pub mood: Option<f64>,
}

impl WellnessComponents {
    /// Read the four sub-scores for `date`
    pub fn for_day(records: &[MetricRecord], date: NaiveDate) -> Self {
        let value = |metric| DateSeries::from_records(records, metric).get(date);
        WellnessComponents {
            sleep_quality: value(MetricType::SleepQuality),
            general_fatigue: value(MetricType::GeneralFatigue),
            pain: value(MetricType::Pain),
            mood: value(MetricType::Mood),
        }
    }

    pub fn present_count(&self) -> usize {
        [self.sleep_quality, self.general_fatigue, self.pain, self.mood]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }
}

/// Map a rating onto 0-10 using the metric's scale
fn normalize(metric: MetricType, value: f64) -> f64 {
    let (min, max) = metric.scale().unwrap_or((0.0, 10.0));
    if max <= min {
        return 0.0;
    }
    ((value - min) / (max - min) * 10.0).clamp(0.0, 10.0)
}

/// Wellness index on a 0-10 scale, `None` when no sub-score is present
///
/// Missing sub-scores are excluded from both the sum and the maximum, so the
/// index reflects only what was observed.
pub fn wellness_index(components: &WellnessComponents) -> Option<f64> {
    let sub_scores = [
        components
            .sleep_quality
            .map(|v| normalize(MetricType::SleepQuality, v)),
        components
            .general_fatigue
            .map(|v| 10.0 - normalize(MetricType::GeneralFatigue, v)),
        components.pain.map(|v| 10.0 - normalize(MetricType::Pain, v)),
        components.mood.map(|v| normalize(MetricType::Mood, v)),
    ];

    let present: Vec<f64> = sub_scores.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }

    let max_possible = present.len() as f64 * 10.0;
    let index = present.iter().sum::<f64>() / max_possible * 10.0;
    Some(index.clamp(0.0, 10.0))
}

/// Session-load entries dated `from..=to`, after upsert dedup
fn session_loads(records: &[MetricRecord], from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDate, f64)> {
    let loads: Vec<MetricRecord> = records
        .iter()
        .filter(|r| r.metric_type == MetricType::SessionLoad && r.date >= from && r.date <= to)
        .cloned()
        .collect();

    dedup_records(&loads)
        .iter()
        .filter_map(|r| r.numeric_value().map(|v| (r.date, v)))
        .collect()
}

/// Sum of per-session loads in the 7 days starting at `week_start`
pub fn internal_load(records: &[MetricRecord], week_start: NaiveDate) -> f64 {
    session_loads(records, week_start, week_start + Duration::days(6))
        .iter()
        .map(|(_, v)| v)
        .sum()
}

/// Weekly load divided by the count of distinct days carrying a load entry
///
/// Multi-session days therefore do not inflate the average. Returns 0 when
/// the week has no entries.
pub fn normalized_internal_load(records: &[MetricRecord], week_start: NaiveDate) -> f64 {
    let loads = session_loads(records, week_start, week_start + Duration::days(6));
    let days: BTreeSet<NaiveDate> = loads.iter().map(|(d, _)| *d).collect();
    if days.is_empty() {
        return 0.0;
    }
    loads.iter().map(|(_, v)| v).sum::<f64>() / days.len() as f64
}

/// Coach-planned load for a week
pub fn planned_load(volume_planned: f64, intensity_planned: f64) -> f64 {
    if volume_planned == 0.0 && intensity_planned == 0.0 {
        return 0.0;
    }

    let intensity_term = if intensity_planned > PLANNED_INTENSITY_BASELINE {
        (intensity_planned - PLANNED_INTENSITY_BASELINE).sqrt() * PLANNED_INTENSITY_WEIGHT
    } else {
        0.0
    };

    (volume_planned + 1.0) + intensity_term
}

/// Internal ÷ planned load
///
/// Returns exactly 0 when `planned` is 0. Callers must read a ratio of 0 as
/// "uncomputable", not as zero load.
pub fn load_ratio(internal: f64, planned: f64) -> f64 {
    if planned == 0.0 {
        return 0.0;
    }
    internal / planned
}

/// Acute:chronic workload ratio as of a date
///
/// Acute is the 7-day load sum, chronic the 28-day load expressed per week.
/// `None` when there is no chronic load to compare against.
pub fn acwr(records: &[MetricRecord], as_of: NaiveDate) -> Option<f64> {
    let daily = DateSeries::from_records(records, MetricType::SessionLoad);
    let acute = daily.window(as_of, ACUTE_DAYS).sum();
    let chronic = daily.window(as_of, CHRONIC_DAYS).sum() / (CHRONIC_DAYS / ACUTE_DAYS) as f64;

    if chronic <= 0.0 {
        return None;
    }
    Some(acute / chronic)
}

/// Foster training monotony over the 7 days ending on `as_of`
///
/// Rest days count as zero load. `None` without any load, or when daily load
/// does not vary at all.
pub fn training_monotony(records: &[MetricRecord], as_of: NaiveDate) -> Option<f64> {
    let daily = DateSeries::from_records(records, MetricType::SessionLoad).window(as_of, ACUTE_DAYS);
    if daily.is_empty() {
        return None;
    }

    let loads: Vec<f64> = (0..ACUTE_DAYS as i64)
        .map(|offset| daily.get(as_of - Duration::days(offset)).unwrap_or(0.0))
        .collect();

    let std_dev = loads.iter().std_dev();
    if !std_dev.is_finite() || std_dev == 0.0 {
        return None;
    }
    Some(loads.iter().mean() / std_dev)
}

/// Weekly load figures for the week starting on `week_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyLoad {
    pub week_start: NaiveDate,
    pub internal_load: f64,
    pub normalized_internal_load: f64,
    pub planned_load: Option<f64>,
    /// 0 when no plan covers the week
    pub load_ratio: f64,
}

impl WeeklyLoad {
    pub fn compute(snapshot: &AthleteSnapshot, week_start: NaiveDate) -> Self {
        let internal = internal_load(&snapshot.records, week_start);
        let normalized = normalized_internal_load(&snapshot.records, week_start);
        let planned = snapshot
            .plan_week_for(week_start)
            .map(|week| planned_load(week.volume_planned, week.intensity_planned));

        WeeklyLoad {
            week_start,
            internal_load: internal,
            normalized_internal_load: normalized,
            planned_load: planned,
            load_ratio: load_ratio(normalized, planned.unwrap_or(0.0)),
        }
    }
}

/// Calculator that produces cache rows for a period
pub struct DerivedMetricCalculator;

impl DerivedMetricCalculator {
    /// Wellness index per day plus weekly load rows for every ISO week
    /// overlapping `from..=to`
    ///
    /// Weekly rows are dated on the week's Monday. ACWR is evaluated on the
    /// last day of the week that falls inside the period.
    pub fn compute(snapshot: &AthleteSnapshot, from: NaiveDate, to: NaiveDate) -> Vec<CalculatedMetric> {
        let athlete_id = snapshot.profile.id.as_str();
        let mut rows = Vec::new();
        if from > to {
            return rows;
        }

        let row = |date, metric_type, value| CalculatedMetric {
            athlete_id: athlete_id.to_string(),
            date,
            metric_type,
            value,
        };

        let wellness_days: BTreeSet<NaiveDate> = snapshot
            .records
            .iter()
            .filter(|r| {
                matches!(
                    r.metric_type,
                    MetricType::SleepQuality
                        | MetricType::GeneralFatigue
                        | MetricType::Pain
                        | MetricType::Mood
                ) && r.date >= from
                    && r.date <= to
            })
            .map(|r| r.date)
            .collect();

        for date in wellness_days {
            let components = WellnessComponents::for_day(&snapshot.records, date);
            if let Some(index) = wellness_index(&components) {
                rows.push(row(date, CalculatedMetricType::WellnessIndex, index));
            }
        }

        let mut week = week_start(from);
        while week <= to {
            let weekly = WeeklyLoad::compute(snapshot, week);
            let has_load = !session_loads(&snapshot.records, week, week + Duration::days(6)).is_empty();

            if has_load || weekly.planned_load.is_some() {
                rows.push(row(week, CalculatedMetricType::InternalLoad, weekly.internal_load));
                rows.push(row(
                    week,
                    CalculatedMetricType::NormalizedInternalLoad,
                    weekly.normalized_internal_load,
                ));
                if let Some(planned) = weekly.planned_load {
                    rows.push(row(week, CalculatedMetricType::PlannedLoad, planned));
                }
                rows.push(row(week, CalculatedMetricType::LoadRatio, weekly.load_ratio));

                let evaluated_on = (week + Duration::days(6)).min(to);
                if let Some(ratio) = acwr(&snapshot.records, evaluated_on) {
                    rows.push(row(week, CalculatedMetricType::Acwr, ratio));
                }
            }

            week += Duration::days(7);
        }

        rows.sort_by(|a, b| (a.date, a.metric_type).cmp(&(b.date, b.metric_type)));
        debug!(
            athlete = athlete_id,
            %from,
            %to,
            rows = rows.len(),
            "Derived metrics computed"
        );
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AthleteProfile, Gender, TrainingPlanWeek};
    use proptest::prelude::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn load(date: NaiveDate, session: &str, value: f64) -> MetricRecord {
        MetricRecord::numeric("a1", date, MetricType::SessionLoad, value).with_sub_type(session)
    }

    #[test]
    fn test_wellness_index_example() {
        let components = WellnessComponents {
            sleep_quality: Some(8.0),
            general_fatigue: Some(3.0),
            pain: Some(2.0),
            mood: Some(7.0),
        };
        let index = wellness_index(&components).unwrap();
        assert!((index - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_wellness_index_rescales_to_present_scores() {
        let components = WellnessComponents {
            sleep_quality: Some(6.0),
            pain: Some(0.0),
            ..Default::default()
        };
        // (6 + 10) / 20 * 10
        assert!((wellness_index(&components).unwrap() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_wellness_index_none_without_scores() {
        assert_eq!(wellness_index(&WellnessComponents::default()), None);
    }

    #[test]
    fn test_planned_load_example() {
        let planned = planned_load(4.0, 70.0);
        assert!((planned - (5.0 + 20f64.sqrt() * 0.25)).abs() < 1e-9);
        assert!((planned - 6.118).abs() < 0.001);
    }

    #[test]
    fn test_planned_load_below_intensity_baseline() {
        assert_eq!(planned_load(3.0, 40.0), 4.0);
        assert_eq!(planned_load(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_load_ratio_zero_plan() {
        assert_eq!(load_ratio(12.0, 0.0), 0.0);
        assert!((load_ratio(6.0, 4.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_load_uses_distinct_days() {
        let monday = day(2024, 5, 13);
        let records = vec![
            load(monday, "am", 6.0),
            load(monday, "pm", 4.0),
            load(monday + Duration::days(2), "am", 5.0),
        ];
        assert_eq!(internal_load(&records, monday), 15.0);
        assert_eq!(normalized_internal_load(&records, monday), 7.5);
        assert_eq!(normalized_internal_load(&records, monday + Duration::days(7)), 0.0);
    }

    #[test]
    fn test_acwr_steady_load_is_one() {
        let as_of = day(2024, 5, 31);
        let records: Vec<MetricRecord> = (0..28)
            .map(|offset| load(as_of - Duration::days(offset), "s1", 5.0))
            .collect();
        assert!((acwr(&records, as_of).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(acwr(&[], as_of), None);
    }

    #[test]
    fn test_monotony_requires_variation() {
        let as_of = day(2024, 5, 31);
        let flat: Vec<MetricRecord> = (0..7)
            .map(|offset| load(as_of - Duration::days(offset), "s1", 5.0))
            .collect();
        assert_eq!(training_monotony(&flat, as_of), None);

        let varied = vec![load(as_of, "s1", 8.0), load(as_of - Duration::days(2), "s1", 4.0)];
        assert!(training_monotony(&varied, as_of).unwrap() > 0.0);
    }

    #[test]
    fn test_calculator_emits_weekly_rows() {
        let monday = day(2024, 5, 13);
        let profile = AthleteProfile::new("a1", Gender::Female);
        let mut records = vec![load(monday, "am", 6.0), load(monday + Duration::days(1), "am", 6.0)];
        records.push(MetricRecord::numeric("a1", monday, MetricType::SleepQuality, 8.0));
        let snapshot = AthleteSnapshot::new(profile, records).with_plan_weeks(vec![TrainingPlanWeek {
            athlete_id: "a1".to_string(),
            start_date: monday,
            volume_planned: 4.0,
            intensity_planned: 70.0,
        }]);

        let rows = DerivedMetricCalculator::compute(&snapshot, monday, monday + Duration::days(6));

        let find = |t| rows.iter().find(|r| r.metric_type == t).map(|r| r.value);
        assert_eq!(find(CalculatedMetricType::WellnessIndex), Some(8.0));
        assert_eq!(find(CalculatedMetricType::InternalLoad), Some(12.0));
        assert_eq!(find(CalculatedMetricType::NormalizedInternalLoad), Some(6.0));
        let ratio = find(CalculatedMetricType::LoadRatio).unwrap();
        assert!((ratio - 6.0 / planned_load(4.0, 70.0)).abs() < 1e-9);
        assert!(find(CalculatedMetricType::Acwr).is_some());
    }

    #[test]
    fn test_mid_week_plan_sets_weekly_ratio() {
        let monday = day(2024, 5, 13);
        let records = vec![load(monday + Duration::days(3), "am", 6.0)];
        let snapshot = AthleteSnapshot::new(AthleteProfile::new("a1", Gender::Male), records).with_plan_weeks(vec![
            TrainingPlanWeek {
                athlete_id: "a1".to_string(),
                start_date: monday + Duration::days(2),
                volume_planned: 4.0,
                intensity_planned: 70.0,
            },
        ]);

        let weekly = WeeklyLoad::compute(&snapshot, monday);
        assert_eq!(weekly.planned_load, Some(planned_load(4.0, 70.0)));
        assert!(weekly.load_ratio > 0.0);
    }

    proptest! {
        #[test]
        fn prop_wellness_index_bounded(
            sleep in proptest::option::of(-5.0f64..15.0),
            fatigue in proptest::option::of(-5.0f64..15.0),
            pain in proptest::option::of(-5.0f64..15.0),
            mood in proptest::option::of(-5.0f64..15.0),
        ) {
            let components = WellnessComponents {
                sleep_quality: sleep,
                general_fatigue: fatigue,
                pain,
                mood,
            };
            match wellness_index(&components) {
                Some(index) => {
                    prop_assert!(components.present_count() > 0);
                    prop_assert!((0.0..=10.0).contains(&index));
                }
                None => prop_assert_eq!(components.present_count(), 0),
            }
        }

        #[test]
        fn prop_load_ratio_zero_plan(internal in 0.0f64..1000.0) {
            prop_assert_eq!(load_ratio(internal, 0.0), 0.0);
        }
    }
}
