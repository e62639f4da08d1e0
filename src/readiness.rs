//! Readiness Scorer
//!
//! Daily fitness-to-train estimate on a 0-100 scale. Scoring starts at 100 and
//! applies independent penalties:
//!
//! 1. Wellness index: `(10 - index) * factor`
//! 2. HRV drop versus the prior 7-day average (today excluded)
//! 3. Same-day pain: `pain * factor`
//! 4. Pre-session energy and leg feel, tiered
//! 5. Current-week load ratio above the overload threshold, linear in the excess
//!
//! The result is clamped to `[0, 100]` and mapped to a level. Severe pain
//! forces red; a first day of period with low energy forces at least orange.
//!
//! When more than the allowed number of essential signals are missing for the
//! day the score is reported as not computable instead of a misleadingly
//! precise number.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::debug;

use crate::derived::{wellness_index, WeeklyLoad, WellnessComponents};
use crate::models::{week_start, Alert, AlertCategory, AlertSeverity, AthleteSnapshot, MetricType};
use crate::series::DateSeries;
use crate::thresholds::{ReadinessThresholds, TierThresholds};

/// Signals the score is built from
pub const ESSENTIAL_SIGNALS: [MetricType; 7] = [
    MetricType::SleepQuality,
    MetricType::GeneralFatigue,
    MetricType::Pain,
    MetricType::Mood,
    MetricType::Hrv,
    MetricType::PreSessionEnergy,
    MetricType::LegFeel,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessLevel {
    Green,
    Yellow,
    Orange,
    Red,
    /// No score available
    Neutral,
}

impl ReadinessLevel {
    /// Map a clamped score onto a level
    pub fn from_score(score: u8, thresholds: &ReadinessThresholds) -> Self {
        let score = score as f64;
        if score >= thresholds.green_min {
            ReadinessLevel::Green
        } else if score >= thresholds.yellow_min {
            ReadinessLevel::Yellow
        } else if score >= thresholds.orange_min {
            ReadinessLevel::Orange
        } else {
            ReadinessLevel::Red
        }
    }

    fn risk_rank(&self) -> u8 {
        match self {
            ReadinessLevel::Neutral => 0,
            ReadinessLevel::Green => 1,
            ReadinessLevel::Yellow => 2,
            ReadinessLevel::Orange => 3,
            ReadinessLevel::Red => 4,
        }
    }

    /// The riskier of two levels
    pub fn at_least(self, floor: ReadinessLevel) -> Self {
        if floor.risk_rank() > self.risk_rank() {
            floor
        } else {
            self
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ReadinessLevel::Green => "Ready to train",
            ReadinessLevel::Yellow => "Slightly reduced readiness",
            ReadinessLevel::Orange => "Reduced readiness, train with caution",
            ReadinessLevel::Red => "Not ready, high risk",
            ReadinessLevel::Neutral => "Readiness not available",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            ReadinessLevel::Green => "Proceed with the planned session",
            ReadinessLevel::Yellow => "Keep the plan but monitor how the warm-up feels",
            ReadinessLevel::Orange => "Reduce intensity or volume and talk to your coach",
            ReadinessLevel::Red => "Rest or recovery only; consult staff before training",
            ReadinessLevel::Neutral => "Complete today's questionnaire to get a readiness score",
        }
    }
}

impl fmt::Display for ReadinessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessLevel::Green => write!(f, "green"),
            ReadinessLevel::Yellow => write!(f, "yellow"),
            ReadinessLevel::Orange => write!(f, "orange"),
            ReadinessLevel::Red => write!(f, "red"),
            ReadinessLevel::Neutral => write!(f, "neutral"),
        }
    }
}

/// Score or an explicit "not computable" marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessScore {
    Value(u8),
    NotComputable,
}

impl ReadinessScore {
    pub fn value(&self) -> Option<u8> {
        match self {
            ReadinessScore::Value(v) => Some(*v),
            ReadinessScore::NotComputable => None,
        }
    }
}

impl Serialize for ReadinessScore {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ReadinessScore::Value(v) => serializer.serialize_u8(*v),
            ReadinessScore::NotComputable => serializer.serialize_str("not computable"),
        }
    }
}

impl fmt::Display for ReadinessScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessScore::Value(v) => write!(f, "{}", v),
            ReadinessScore::NotComputable => write!(f, "not computable"),
        }
    }
}

/// Source of a deduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltySource {
    Wellness,
    HrvDrop,
    Pain,
    PreSessionEnergy,
    LegFeel,
    LoadOverload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Penalty {
    pub source: PenaltySource,
    pub points: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessStatus {
    pub date: NaiveDate,
    pub score: ReadinessScore,
    pub level: ReadinessLevel,
    pub message: String,
    pub recommendation: String,
    pub contributing_alerts: Vec<Alert>,
    pub penalties: Vec<Penalty>,
    /// Essential signals absent on the day
    pub missing_signals: Vec<MetricType>,
}

fn tier_penalty(value: f64, tiers: &TierThresholds) -> f64 {
    if value <= tiers.low_max {
        tiers.high_penalty
    } else if value <= tiers.medium_max {
        tiers.medium_penalty
    } else {
        0.0
    }
}

/// HRV drop in percent of the prior-days average, positive when HRV fell
fn hrv_drop_percent(hrv: &DateSeries, as_of: NaiveDate, thresholds: &ReadinessThresholds) -> Option<f64> {
    let today = hrv.get(as_of)?;
    let yesterday = as_of.pred_opt()?;
    let baseline = hrv.window(yesterday, thresholds.hrv_baseline_days.max(1));
    if baseline.len() < thresholds.hrv_min_baseline_points.max(1) {
        return None;
    }
    let mean = baseline.mean()?;
    if mean <= 0.0 {
        return None;
    }
    Some((mean - today) / mean * 100.0)
}

fn penalty_alert(penalty: &Penalty) -> Alert {
    let severity = if penalty.points >= 10.0 {
        AlertSeverity::Warning
    } else {
        AlertSeverity::Info
    };
    let alert = Alert::new(severity, AlertCategory::Readiness, penalty.detail.clone());
    match penalty.source {
        PenaltySource::HrvDrop => alert.for_metric(MetricType::Hrv),
        PenaltySource::Pain => alert.for_metric(MetricType::Pain),
        PenaltySource::PreSessionEnergy => alert.for_metric(MetricType::PreSessionEnergy),
        PenaltySource::LegFeel => alert.for_metric(MetricType::LegFeel),
        PenaltySource::LoadOverload => alert.for_metric(MetricType::SessionLoad),
        PenaltySource::Wellness => alert,
    }
}

fn labels(metrics: &[MetricType]) -> String {
    metrics
        .iter()
        .map(|m| m.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Readiness for `as_of` from a pre-loaded snapshot
pub fn compute_readiness(
    snapshot: &AthleteSnapshot,
    as_of: NaiveDate,
    thresholds: &ReadinessThresholds,
) -> ReadinessStatus {
    let snapshot = snapshot.as_of(as_of);
    let records = &snapshot.records;
    let today = |metric| DateSeries::from_records(records, metric).get(as_of);

    let missing: Vec<MetricType> = ESSENTIAL_SIGNALS
        .iter()
        .copied()
        .filter(|metric| today(*metric).is_none())
        .collect();

    if missing.len() > thresholds.max_missing_essential {
        let message = format!("Readiness cannot be computed: missing {}", labels(&missing));
        debug!(athlete = %snapshot.profile.id, %as_of, missing = missing.len(), "Readiness not computable");
        return ReadinessStatus {
            date: as_of,
            score: ReadinessScore::NotComputable,
            level: ReadinessLevel::Neutral,
            contributing_alerts: vec![Alert::new(
                AlertSeverity::Info,
                AlertCategory::Readiness,
                message.clone(),
            )],
            message,
            recommendation: ReadinessLevel::Neutral.recommendation().to_string(),
            penalties: Vec::new(),
            missing_signals: missing,
        };
    }

    let mut penalties = Vec::new();

    if let Some(index) = wellness_index(&WellnessComponents::for_day(records, as_of)) {
        let points = (10.0 - index) * thresholds.wellness_penalty_factor;
        if points > 0.0 {
            penalties.push(Penalty {
                source: PenaltySource::Wellness,
                points,
                detail: format!("Wellness index {:.1}/10", index),
            });
        }
    }

    let hrv = DateSeries::from_records(records, MetricType::Hrv);
    if let Some(drop) = hrv_drop_percent(&hrv, as_of, thresholds) {
        let points = if drop > thresholds.hrv_severe_drop_percent {
            thresholds.hrv_severe_penalty
        } else if drop > thresholds.hrv_moderate_drop_percent {
            thresholds.hrv_moderate_penalty
        } else {
            0.0
        };
        if points > 0.0 {
            penalties.push(Penalty {
                source: PenaltySource::HrvDrop,
                points,
                detail: format!(
                    "HRV {:.0}% below the {}-day average",
                    drop, thresholds.hrv_baseline_days
                ),
            });
        }
    }

    let pain = today(MetricType::Pain);
    if let Some(pain) = pain {
        let points = pain * thresholds.pain_penalty_factor;
        if points > 0.0 {
            penalties.push(Penalty {
                source: PenaltySource::Pain,
                points,
                detail: format!("Pain reported at {:.0}/10", pain),
            });
        }
    }

    let energy = today(MetricType::PreSessionEnergy);
    for (metric, source, value, tiers) in [
        (MetricType::PreSessionEnergy, PenaltySource::PreSessionEnergy, energy, &thresholds.energy),
        (MetricType::LegFeel, PenaltySource::LegFeel, today(MetricType::LegFeel), &thresholds.leg_feel),
    ] {
        if let Some(value) = value {
            let points = tier_penalty(value, tiers);
            if points > 0.0 {
                penalties.push(Penalty {
                    source,
                    points,
                    detail: format!("{} low at {:.0}/10", metric.label(), value),
                });
            }
        }
    }

    let weekly = WeeklyLoad::compute(&snapshot, week_start(as_of));
    // A ratio of exactly 0 means no plan or no load this week
    if weekly.load_ratio > thresholds.load_ratio_overload {
        let excess = weekly.load_ratio - thresholds.load_ratio_overload;
        penalties.push(Penalty {
            source: PenaltySource::LoadOverload,
            points: excess * thresholds.overload_penalty_per_unit,
            detail: format!(
                "Weekly load ratio {:.2} above {:.2}",
                weekly.load_ratio, thresholds.load_ratio_overload
            ),
        });
    }

    let raw = 100.0 - penalties.iter().map(|p| p.points).sum::<f64>();
    let score = raw.clamp(0.0, 100.0).round() as u8;
    let mut level = ReadinessLevel::from_score(score, thresholds);
    let mut contributing_alerts: Vec<Alert> = penalties.iter().map(penalty_alert).collect();

    if let Some(pain) = pain.filter(|p| *p >= thresholds.severe_pain_min) {
        level = ReadinessLevel::Red;
        contributing_alerts.push(
            Alert::new(
                AlertSeverity::Danger,
                AlertCategory::Readiness,
                format!("Severe pain ({:.0}/10) reported today", pain),
            )
            .for_metric(MetricType::Pain),
        );
    }

    let period_starts_today = today(MetricType::FirstDayOfPeriod)
        .map(|flag| flag > 0.0)
        .unwrap_or(false);
    if period_starts_today && energy.map(|e| e <= thresholds.energy.low_max).unwrap_or(false) {
        let escalated = level.at_least(ReadinessLevel::Orange);
        if escalated != level {
            contributing_alerts.push(
                Alert::new(
                    AlertSeverity::Warning,
                    AlertCategory::Readiness,
                    "First day of period combined with low energy",
                )
                .for_metric(MetricType::FirstDayOfPeriod),
            );
        }
        level = escalated;
    }

    debug!(
        athlete = %snapshot.profile.id,
        %as_of,
        raw,
        score,
        %level,
        penalties = penalties.len(),
        "Readiness computed"
    );

    let mut message = level.message().to_string();
    if !missing.is_empty() {
        message.push_str(&format!(" (missing: {})", labels(&missing)));
    }

    ReadinessStatus {
        date: as_of,
        score: ReadinessScore::Value(score),
        level,
        message,
        recommendation: level.recommendation().to_string(),
        contributing_alerts,
        penalties,
        missing_signals: missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AthleteProfile, Gender, MetricRecord, TrainingPlanWeek};
    use crate::thresholds::Thresholds;
    use chrono::Duration;
    use proptest::prelude::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
    }

    fn thresholds() -> ReadinessThresholds {
        Thresholds::default().readiness
    }

    fn rec(metric: MetricType, value: f64) -> MetricRecord {
        MetricRecord::numeric("a1", as_of(), metric, value)
    }

    fn hrv_history(value: f64) -> Vec<MetricRecord> {
        (1..=7)
            .map(|d| MetricRecord::numeric("a1", as_of() - Duration::days(d), MetricType::Hrv, value))
            .collect()
    }

    fn perfect_day() -> Vec<MetricRecord> {
        let mut records = hrv_history(60.0);
        records.extend([
            rec(MetricType::SleepQuality, 10.0),
            rec(MetricType::GeneralFatigue, 0.0),
            rec(MetricType::Pain, 0.0),
            rec(MetricType::Mood, 10.0),
            rec(MetricType::Hrv, 62.0),
            rec(MetricType::PreSessionEnergy, 9.0),
            rec(MetricType::LegFeel, 9.0),
        ]);
        records
    }

    fn snapshot(records: Vec<MetricRecord>, gender: Gender) -> AthleteSnapshot {
        AthleteSnapshot::new(AthleteProfile::new("a1", gender), records)
    }

    #[test]
    fn test_perfect_day_is_green() {
        let status = compute_readiness(&snapshot(perfect_day(), Gender::Male), as_of(), &thresholds());
        assert_eq!(status.score, ReadinessScore::Value(100));
        assert_eq!(status.level, ReadinessLevel::Green);
        assert!(status.penalties.is_empty());
        assert!(status.missing_signals.is_empty());
    }

    #[test]
    fn test_too_many_missing_signals_not_computable() {
        let records = vec![rec(MetricType::SleepQuality, 7.0), rec(MetricType::Mood, 6.0)];
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());

        assert_eq!(status.score, ReadinessScore::NotComputable);
        assert_eq!(status.level, ReadinessLevel::Neutral);
        assert_eq!(status.missing_signals.len(), 5);
        assert!(status.message.contains("HRV"));
        assert!(status.message.contains("Leg feel"));
        assert_eq!(serde_json::to_value(status.score).unwrap(), "not computable");
    }

    #[test]
    fn test_three_missing_signals_still_scored() {
        let records = vec![
            rec(MetricType::SleepQuality, 8.0),
            rec(MetricType::GeneralFatigue, 2.0),
            rec(MetricType::Pain, 0.0),
            rec(MetricType::Mood, 8.0),
        ];
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());
        assert!(status.score.value().is_some());
        assert_eq!(status.missing_signals.len(), 3);
    }

    #[test]
    fn test_severe_hrv_drop_penalty() {
        let mut records = perfect_day();
        records.retain(|r| !(r.metric_type == MetricType::Hrv && r.date == as_of()));
        records.push(rec(MetricType::Hrv, 45.0)); // 25% below 60
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());

        let hrv = status
            .penalties
            .iter()
            .find(|p| p.source == PenaltySource::HrvDrop)
            .unwrap();
        assert_eq!(hrv.points, thresholds().hrv_severe_penalty);
        assert_eq!(status.score, ReadinessScore::Value(80));
    }

    fn with_today(metric: MetricType, value: f64) -> Vec<MetricRecord> {
        let mut records = perfect_day();
        records.retain(|r| !(r.metric_type == metric && r.date == as_of()));
        records.push(rec(metric, value));
        records
    }

    fn penalty(status: &ReadinessStatus, source: PenaltySource) -> Option<f64> {
        status.penalties.iter().find(|p| p.source == source).map(|p| p.points)
    }

    #[test]
    fn test_moderate_hrv_drop_penalty() {
        // 55 is about 8% below 60: past the moderate line, short of severe
        let records = with_today(MetricType::Hrv, 55.0);
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());

        assert_eq!(penalty(&status, PenaltySource::HrvDrop), Some(thresholds().hrv_moderate_penalty));
        assert_eq!(status.score, ReadinessScore::Value(90));
        assert_eq!(status.level, ReadinessLevel::Green);
    }

    #[test]
    fn test_small_hrv_drop_is_free() {
        // 5% below the average stays under the moderate line
        let records = with_today(MetricType::Hrv, 57.0);
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());

        assert_eq!(penalty(&status, PenaltySource::HrvDrop), None);
        assert_eq!(status.score, ReadinessScore::Value(100));
    }

    #[test]
    fn test_medium_energy_and_leg_feel_tier() {
        let t = thresholds();

        let energy = with_today(MetricType::PreSessionEnergy, 4.0);
        let status = compute_readiness(&snapshot(energy, Gender::Male), as_of(), &t);
        assert_eq!(penalty(&status, PenaltySource::PreSessionEnergy), Some(t.energy.medium_penalty));
        assert_eq!(status.score, ReadinessScore::Value(93));

        // Exactly on the medium upper bound still counts as medium
        let legs = with_today(MetricType::LegFeel, t.leg_feel.medium_max);
        let status = compute_readiness(&snapshot(legs, Gender::Male), as_of(), &t);
        assert_eq!(penalty(&status, PenaltySource::LegFeel), Some(t.leg_feel.medium_penalty));
        assert_eq!(status.score, ReadinessScore::Value(93));

        // Exactly on the low upper bound falls into the high-penalty tier
        let legs = with_today(MetricType::LegFeel, t.leg_feel.low_max);
        let status = compute_readiness(&snapshot(legs, Gender::Male), as_of(), &t);
        assert_eq!(penalty(&status, PenaltySource::LegFeel), Some(t.leg_feel.high_penalty));
    }

    #[test]
    fn test_level_band_edges() {
        let t = thresholds();
        let cases = [
            (100, ReadinessLevel::Green),
            (75, ReadinessLevel::Green),
            (74, ReadinessLevel::Yellow),
            (55, ReadinessLevel::Yellow),
            (54, ReadinessLevel::Orange),
            (35, ReadinessLevel::Orange),
            (34, ReadinessLevel::Red),
            (0, ReadinessLevel::Red),
        ];
        for (score, expected) in cases {
            assert_eq!(ReadinessLevel::from_score(score, &t), expected, "score {}", score);
        }
    }

    #[test]
    fn test_score_exactly_at_yellow_min() {
        // 15 energy + 7 legs + 20 HRV + 2 pain + 1 wellness = 45 points
        let mut records = with_today(MetricType::PreSessionEnergy, 3.0);
        records.retain(|r| {
            !(r.date == as_of() && matches!(r.metric_type, MetricType::LegFeel | MetricType::Hrv | MetricType::Pain))
        });
        records.extend([
            rec(MetricType::LegFeel, 4.0),
            rec(MetricType::Hrv, 45.0),
            rec(MetricType::Pain, 1.0),
        ]);
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());

        assert_eq!(status.score, ReadinessScore::Value(55));
        assert_eq!(status.level, ReadinessLevel::Yellow);
    }

    #[test]
    fn test_severe_pain_forces_red() {
        let mut records = perfect_day();
        records.push(rec(MetricType::Pain, 8.0));
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());

        assert_eq!(status.level, ReadinessLevel::Red);
        assert!(status
            .contributing_alerts
            .iter()
            .any(|a| a.severity == AlertSeverity::Danger));
    }

    #[test]
    fn test_period_with_low_energy_forces_orange() {
        let mut records = perfect_day();
        records.push(rec(MetricType::PreSessionEnergy, 3.0));
        records.push(rec(MetricType::FirstDayOfPeriod, 1.0));
        let status = compute_readiness(&snapshot(records, Gender::Female), as_of(), &thresholds());

        // 100 - 15 energy penalty = 85, green by score
        assert_eq!(status.score, ReadinessScore::Value(85));
        assert_eq!(status.level, ReadinessLevel::Orange);
    }

    #[test]
    fn test_overload_penalty_grows_with_excess() {
        let monday = week_start(as_of());
        let mut records = perfect_day();
        records.push(MetricRecord::numeric("a1", monday, MetricType::SessionLoad, 9.0));
        let snap = snapshot(records, Gender::Male).with_plan_weeks(vec![TrainingPlanWeek {
            athlete_id: "a1".to_string(),
            start_date: monday,
            volume_planned: 4.0,
            intensity_planned: 50.0,
        }]);

        // ratio 9 / 5 = 1.8, excess 0.5 * 50 = 25
        let status = compute_readiness(&snap, as_of(), &thresholds());
        let load = status
            .penalties
            .iter()
            .find(|p| p.source == PenaltySource::LoadOverload)
            .unwrap();
        assert!((load.points - 25.0).abs() < 1e-9);
        assert_eq!(status.score, ReadinessScore::Value(75));
    }

    #[test]
    fn test_future_records_ignored() {
        let mut records = perfect_day();
        records.push(MetricRecord::numeric(
            "a1",
            as_of() + Duration::days(1),
            MetricType::Pain,
            10.0,
        ));
        let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &thresholds());
        assert_eq!(status.score, ReadinessScore::Value(100));
    }

    proptest! {
        #[test]
        fn prop_score_always_clamped(
            sleep in 0.0f64..10.0,
            fatigue in 0.0f64..10.0,
            pain in 0.0f64..10.0,
            energy in 0.0f64..10.0,
            hrv_today in 10.0f64..120.0,
            factor in 0.0f64..100.0,
        ) {
            let mut t = thresholds();
            t.wellness_penalty_factor = factor;
            t.pain_penalty_factor = factor;

            let mut records = hrv_history(60.0);
            records.extend([
                rec(MetricType::SleepQuality, sleep),
                rec(MetricType::GeneralFatigue, fatigue),
                rec(MetricType::Pain, pain),
                rec(MetricType::Mood, sleep),
                rec(MetricType::Hrv, hrv_today),
                rec(MetricType::PreSessionEnergy, energy),
                rec(MetricType::LegFeel, energy),
            ]);

            let status = compute_readiness(&snapshot(records, Gender::Male), as_of(), &t);
            let score = status.score.value().unwrap();
            prop_assert!(score <= 100);
        }
    }
}
