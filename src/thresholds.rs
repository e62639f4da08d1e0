//! Threshold table and its validated, typed form
//!
//! The table is a nested `key -> name -> value` map so it can be loaded from
//! TOML (`[pain] persistent_high_7d_min = 5.0`). Components never read the raw
//! table: [`Thresholds::from_table`] resolves every required entry up front
//! and fails with the full list of missing keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::models::MetricType;

pub const READINESS_KEY: &str = "readiness";
pub const CYCLE_KEY: &str = "menstrual_cycle";
pub const LOAD_KEY: &str = "load";
pub const GENERAL_KEY: &str = "general";

/// Upper bound for any day-count threshold (one century)
pub const MAX_DAY_SPAN: f64 = 36_500.0;

/// Metrics covered by the general trend alert battery
pub const GENERAL_ALERT_METRICS: [MetricType; 6] = [
    MetricType::GeneralFatigue,
    MetricType::SleepQuality,
    MetricType::Pain,
    MetricType::Hrv,
    MetricType::PerformanceFeel,
    MetricType::BodyWeight,
];

/// Raw nested threshold mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable(BTreeMap<String, BTreeMap<String, f64>>);

impl ThresholdTable {
    pub fn empty() -> Self {
        ThresholdTable(BTreeMap::new())
    }

    pub fn get(&self, key: &str, name: &str) -> Option<f64> {
        self.0.get(key).and_then(|entries| entries.get(name)).copied()
    }

    pub fn set(&mut self, key: &str, name: &str, value: f64) {
        self.0
            .entry(key.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn remove(&mut self, key: &str, name: &str) -> Option<f64> {
        self.0.get_mut(key).and_then(|entries| entries.remove(name))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    fn with(mut self, key: &str, entries: &[(&str, f64)]) -> Self {
        for (name, value) in entries {
            self.set(key, name, *value);
        }
        self
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        ThresholdTable::empty()
            .with(
                READINESS_KEY,
                &[
                    ("wellness_penalty_factor", 4.0),
                    ("hrv_moderate_drop_percent", 7.0),
                    ("hrv_moderate_penalty", 10.0),
                    ("hrv_severe_drop_percent", 15.0),
                    ("hrv_severe_penalty", 20.0),
                    ("hrv_baseline_days", 7.0),
                    ("hrv_min_baseline_points", 3.0),
                    ("pain_penalty_factor", 2.0),
                    ("severe_pain_min", 7.0),
                    ("energy_low_max", 3.0),
                    ("energy_medium_max", 5.0),
                    ("energy_high_penalty", 15.0),
                    ("energy_medium_penalty", 7.0),
                    ("leg_feel_low_max", 3.0),
                    ("leg_feel_medium_max", 5.0),
                    ("leg_feel_high_penalty", 15.0),
                    ("leg_feel_medium_penalty", 7.0),
                    ("load_ratio_overload", 1.3),
                    ("overload_penalty_per_unit", 50.0),
                    ("green_min", 75.0),
                    ("yellow_min", 55.0),
                    ("orange_min", 35.0),
                    ("max_missing_essential", 3.0),
                ],
            )
            .with(
                CYCLE_KEY,
                &[
                    ("amenorrhea_threshold_days", 60.0),
                    ("delay_threshold_days", 2.0),
                    ("normal_min_days", 21.0),
                    ("normal_max_days", 35.0),
                    ("menstrual_days", 5.0),
                    ("ovulation_window_days", 2.0),
                    ("lookback_days", 730.0),
                    ("max_events", 26.0),
                ],
            )
            .with(
                LOAD_KEY,
                &[
                    ("ratio_overload", 1.3),
                    ("ratio_underload", 0.7),
                    ("acwr_warning", 1.3),
                    ("acwr_danger", 1.5),
                    ("acwr_low", 0.8),
                    ("weekly_increase_percent", 15.0),
                    ("monotony_max", 2.0),
                ],
            )
            .with(GENERAL_KEY, &[("min_samples", 5.0)])
            .with(
                MetricType::GeneralFatigue.slug(),
                &[
                    ("persistent_high_7d_min", 7.0),
                    ("persistent_high_30d_min", 6.0),
                    ("trend_increase_percent", 15.0),
                    ("trend_decrease_percent", 15.0),
                ],
            )
            .with(
                MetricType::SleepQuality.slug(),
                &[
                    ("persistent_low_7d_max", 4.0),
                    ("persistent_low_30d_max", 5.0),
                    ("trend_increase_percent", 15.0),
                    ("trend_decrease_percent", 15.0),
                ],
            )
            .with(
                MetricType::Pain.slug(),
                &[
                    ("persistent_high_7d_min", 5.0),
                    ("persistent_high_30d_min", 4.0),
                    ("trend_increase_percent", 20.0),
                    ("trend_decrease_percent", 20.0),
                ],
            )
            .with(
                MetricType::Hrv.slug(),
                &[
                    ("persistent_drop_percent", 10.0),
                    ("trend_increase_percent", 10.0),
                    ("trend_decrease_percent", 10.0),
                ],
            )
            .with(
                MetricType::PerformanceFeel.slug(),
                &[
                    ("persistent_low_7d_max", 4.0),
                    ("persistent_low_30d_max", 5.0),
                    ("trend_increase_percent", 15.0),
                    ("trend_decrease_percent", 15.0),
                ],
            )
            .with(
                MetricType::BodyWeight.slug(),
                &[
                    ("persistent_drop_percent", 3.0),
                    ("trend_increase_percent", 2.0),
                    ("trend_decrease_percent", 2.0),
                ],
            )
    }
}

/// Which trend direction is a concern for a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdverseTrend {
    Increase,
    Decrease,
    /// Any large change is a concern (e.g. body weight)
    Either,
}

/// Persistent-level rule for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PersistentRule {
    /// 7-day and 30-day averages both at or above their minimums
    High { min_7d: f64, min_30d: f64 },
    /// 7-day and 30-day averages both at or below their maximums
    Low { max_7d: f64, max_30d: f64 },
    /// 7-day and 30-day averages both below the all-time average by more than `drop_percent`
    BelowBaseline { drop_percent: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistentKind {
    High,
    Low,
    BelowBaseline,
}

fn alert_profile(metric: MetricType) -> Option<(PersistentKind, AdverseTrend)> {
    match metric {
        MetricType::GeneralFatigue => Some((PersistentKind::High, AdverseTrend::Increase)),
        MetricType::SleepQuality => Some((PersistentKind::Low, AdverseTrend::Decrease)),
        MetricType::Pain => Some((PersistentKind::High, AdverseTrend::Increase)),
        MetricType::Hrv => Some((PersistentKind::BelowBaseline, AdverseTrend::Decrease)),
        MetricType::PerformanceFeel => Some((PersistentKind::Low, AdverseTrend::Decrease)),
        MetricType::BodyWeight => Some((PersistentKind::BelowBaseline, AdverseTrend::Either)),
        MetricType::SleepDuration
        | MetricType::Mood
        | MetricType::RestingHeartRate
        | MetricType::PreSessionEnergy
        | MetricType::LegFeel
        | MetricType::SessionLoad
        | MetricType::FirstDayOfPeriod
        | MetricType::InjuryNote
        | MetricType::Comment => None,
    }
}

/// General-category rule set for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRule {
    pub metric: MetricType,
    pub persistent: PersistentRule,
    pub adverse_trend: AdverseTrend,
    pub trend_increase_percent: f64,
    pub trend_decrease_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessThresholds {
    pub wellness_penalty_factor: f64,
    pub hrv_moderate_drop_percent: f64,
    pub hrv_moderate_penalty: f64,
    pub hrv_severe_drop_percent: f64,
    pub hrv_severe_penalty: f64,
    pub hrv_baseline_days: u32,
    pub hrv_min_baseline_points: usize,
    pub pain_penalty_factor: f64,
    pub severe_pain_min: f64,
    pub energy: TierThresholds,
    pub leg_feel: TierThresholds,
    pub load_ratio_overload: f64,
    pub overload_penalty_per_unit: f64,
    pub green_min: f64,
    pub yellow_min: f64,
    pub orange_min: f64,
    pub max_missing_essential: usize,
}

/// Two-tier penalty for a low-is-bad rating
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub low_max: f64,
    pub medium_max: f64,
    pub high_penalty: f64,
    pub medium_penalty: f64,
}

/// Menstrual-cycle constants
///
/// `delay_threshold_days` and `amenorrhea_threshold_days` are hand-tuned and
/// not clinically validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleThresholds {
    pub amenorrhea_threshold_days: f64,
    pub delay_threshold_days: f64,
    pub normal_min_days: f64,
    pub normal_max_days: f64,
    pub menstrual_days: i64,
    pub ovulation_window_days: f64,
    pub lookback_days: i64,
    pub max_events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadThresholds {
    pub ratio_overload: f64,
    pub ratio_underload: f64,
    pub acwr_warning: f64,
    pub acwr_danger: f64,
    pub acwr_low: f64,
    pub weekly_increase_percent: f64,
    pub monotony_max: f64,
}

/// Validated thresholds consumed by every component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub readiness: ReadinessThresholds,
    pub cycle: CycleThresholds,
    pub load: LoadThresholds,
    pub min_samples: usize,
    pub metric_rules: Vec<MetricRule>,
}

impl Default for Thresholds {
    fn default() -> Self {
        // The built-in table is covered by `test_default_table_is_complete`.
        Thresholds::from_table(&ThresholdTable::default())
            .expect("built-in threshold table is valid")
    }
}

/// Collects missing entries instead of stopping at the first one
struct Lookup<'a> {
    table: &'a ThresholdTable,
    missing: Vec<String>,
    invalid: Vec<(String, String)>,
}

impl<'a> Lookup<'a> {
    fn new(table: &'a ThresholdTable) -> Self {
        Lookup {
            table,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    fn value(&mut self, key: &str, name: &str) -> f64 {
        match self.table.get(key, name) {
            Some(v) if v.is_finite() && v >= 0.0 => v,
            Some(v) => {
                self.invalid
                    .push((format!("{}.{}", key, name), format!("{} is not a finite non-negative number", v)));
                0.0
            }
            None => {
                self.missing.push(format!("{}.{}", key, name));
                0.0
            }
        }
    }

    fn count(&mut self, key: &str, name: &str) -> usize {
        self.value(key, name).round() as usize
    }

    /// Day counts feed date arithmetic, so they are capped at `MAX_DAY_SPAN`
    fn days(&mut self, key: &str, name: &str) -> f64 {
        let value = self.value(key, name);
        self.at_most(key, name, value, MAX_DAY_SPAN);
        value.min(MAX_DAY_SPAN)
    }

    fn ordered(&mut self, key: &str, lower: (&str, f64), upper: (&str, f64)) {
        if lower.1 > upper.1 {
            self.invalid.push((
                format!("{}.{}", key, lower.0),
                format!("must not exceed {}.{} ({} > {})", key, upper.0, lower.1, upper.1),
            ));
        }
    }

    fn at_least(&mut self, key: &str, name: &str, value: f64, min: f64) {
        if value < min {
            self.invalid
                .push((format!("{}.{}", key, name), format!("must be at least {}", min)));
        }
    }

    fn at_most(&mut self, key: &str, name: &str, value: f64, max: f64) {
        if value > max {
            self.invalid
                .push((format!("{}.{}", key, name), format!("must be at most {}", max)));
        }
    }

    fn finish<T>(self, value: T) -> Result<T, ConfigError> {
        if !self.missing.is_empty() {
            return Err(ConfigError::MissingThresholds { keys: self.missing });
        }
        if let Some((key, reason)) = self.invalid.into_iter().next() {
            return Err(ConfigError::InvalidThreshold { key, reason });
        }
        Ok(value)
    }
}

impl Thresholds {
    /// Resolve and validate every threshold the engine consumes
    pub fn from_table(table: &ThresholdTable) -> Result<Self, ConfigError> {
        let mut lookup = Lookup::new(table);

        let r = READINESS_KEY;
        let readiness = ReadinessThresholds {
            wellness_penalty_factor: lookup.value(r, "wellness_penalty_factor"),
            hrv_moderate_drop_percent: lookup.value(r, "hrv_moderate_drop_percent"),
            hrv_moderate_penalty: lookup.value(r, "hrv_moderate_penalty"),
            hrv_severe_drop_percent: lookup.value(r, "hrv_severe_drop_percent"),
            hrv_severe_penalty: lookup.value(r, "hrv_severe_penalty"),
            hrv_baseline_days: lookup.days(r, "hrv_baseline_days").round() as u32,
            hrv_min_baseline_points: lookup.count(r, "hrv_min_baseline_points"),
            pain_penalty_factor: lookup.value(r, "pain_penalty_factor"),
            severe_pain_min: lookup.value(r, "severe_pain_min"),
            energy: TierThresholds {
                low_max: lookup.value(r, "energy_low_max"),
                medium_max: lookup.value(r, "energy_medium_max"),
                high_penalty: lookup.value(r, "energy_high_penalty"),
                medium_penalty: lookup.value(r, "energy_medium_penalty"),
            },
            leg_feel: TierThresholds {
                low_max: lookup.value(r, "leg_feel_low_max"),
                medium_max: lookup.value(r, "leg_feel_medium_max"),
                high_penalty: lookup.value(r, "leg_feel_high_penalty"),
                medium_penalty: lookup.value(r, "leg_feel_medium_penalty"),
            },
            load_ratio_overload: lookup.value(r, "load_ratio_overload"),
            overload_penalty_per_unit: lookup.value(r, "overload_penalty_per_unit"),
            green_min: lookup.value(r, "green_min"),
            yellow_min: lookup.value(r, "yellow_min"),
            orange_min: lookup.value(r, "orange_min"),
            max_missing_essential: lookup.count(r, "max_missing_essential"),
        };
        lookup.ordered(r, ("orange_min", readiness.orange_min), ("yellow_min", readiness.yellow_min));
        lookup.ordered(r, ("yellow_min", readiness.yellow_min), ("green_min", readiness.green_min));
        lookup.at_most(r, "green_min", readiness.green_min, 100.0);
        lookup.ordered(
            r,
            ("hrv_moderate_drop_percent", readiness.hrv_moderate_drop_percent),
            ("hrv_severe_drop_percent", readiness.hrv_severe_drop_percent),
        );
        lookup.ordered(
            r,
            ("energy_low_max", readiness.energy.low_max),
            ("energy_medium_max", readiness.energy.medium_max),
        );
        lookup.ordered(
            r,
            ("leg_feel_low_max", readiness.leg_feel.low_max),
            ("leg_feel_medium_max", readiness.leg_feel.medium_max),
        );

        let c = CYCLE_KEY;
        let cycle = CycleThresholds {
            amenorrhea_threshold_days: lookup.days(c, "amenorrhea_threshold_days"),
            delay_threshold_days: lookup.days(c, "delay_threshold_days"),
            normal_min_days: lookup.days(c, "normal_min_days"),
            normal_max_days: lookup.days(c, "normal_max_days"),
            menstrual_days: lookup.days(c, "menstrual_days").round() as i64,
            ovulation_window_days: lookup.days(c, "ovulation_window_days"),
            lookback_days: lookup.days(c, "lookback_days").round() as i64,
            max_events: lookup.count(c, "max_events"),
        };
        lookup.ordered(
            c,
            ("normal_min_days", cycle.normal_min_days),
            ("normal_max_days", cycle.normal_max_days),
        );
        lookup.ordered(
            c,
            ("delay_threshold_days", cycle.delay_threshold_days),
            ("amenorrhea_threshold_days", cycle.amenorrhea_threshold_days),
        );
        lookup.at_least(c, "max_events", cycle.max_events as f64, 2.0);

        let l = LOAD_KEY;
        let load = LoadThresholds {
            ratio_overload: lookup.value(l, "ratio_overload"),
            ratio_underload: lookup.value(l, "ratio_underload"),
            acwr_warning: lookup.value(l, "acwr_warning"),
            acwr_danger: lookup.value(l, "acwr_danger"),
            acwr_low: lookup.value(l, "acwr_low"),
            weekly_increase_percent: lookup.value(l, "weekly_increase_percent"),
            monotony_max: lookup.value(l, "monotony_max"),
        };
        lookup.ordered(l, ("ratio_underload", load.ratio_underload), ("ratio_overload", load.ratio_overload));
        lookup.ordered(l, ("acwr_low", load.acwr_low), ("acwr_warning", load.acwr_warning));
        lookup.ordered(l, ("acwr_warning", load.acwr_warning), ("acwr_danger", load.acwr_danger));

        let min_samples = lookup.count(GENERAL_KEY, "min_samples");
        lookup.at_least(GENERAL_KEY, "min_samples", min_samples as f64, 1.0);

        let mut metric_rules = Vec::with_capacity(GENERAL_ALERT_METRICS.len());
        for metric in GENERAL_ALERT_METRICS {
            let Some((kind, adverse_trend)) = alert_profile(metric) else {
                continue;
            };
            let key = metric.slug();
            let persistent = match kind {
                PersistentKind::High => PersistentRule::High {
                    min_7d: lookup.value(key, "persistent_high_7d_min"),
                    min_30d: lookup.value(key, "persistent_high_30d_min"),
                },
                PersistentKind::Low => PersistentRule::Low {
                    max_7d: lookup.value(key, "persistent_low_7d_max"),
                    max_30d: lookup.value(key, "persistent_low_30d_max"),
                },
                PersistentKind::BelowBaseline => PersistentRule::BelowBaseline {
                    drop_percent: lookup.value(key, "persistent_drop_percent"),
                },
            };
            metric_rules.push(MetricRule {
                metric,
                persistent,
                adverse_trend,
                trend_increase_percent: lookup.value(key, "trend_increase_percent"),
                trend_decrease_percent: lookup.value(key, "trend_decrease_percent"),
            });
        }

        lookup.finish(Thresholds {
            readiness,
            cycle,
            load,
            min_samples,
            metric_rules,
        })
    }

    pub fn metric_rule(&self, metric: MetricType) -> Option<&MetricRule> {
        self.metric_rules.iter().find(|rule| rule.metric == metric)
    }
}
