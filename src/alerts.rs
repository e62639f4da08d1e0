//! Alert Engine
//!
//! Runs a fixed battery of threshold checks grouped by category. Only the
//! requested categories run; they are independent of each other and are
//! evaluated in parallel, with the output always in category order.
//!
//! - **General**: per metric, a persistent-level rule (7-day and 30-day
//!   averages both past a bound) and a trend-magnitude rule (segmented trend
//!   over the alert window). Both can fire for the same metric. Metrics with
//!   too few samples in the window are reported once as insufficient data.
//! - **Load**: weekly load ratio against the plan, ACWR, week-over-week
//!   increase and training monotony.
//! - **Readiness**: the day's readiness level and what drove it.
//! - **Menstrual**: irregular, delayed or absent cycles.

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use tracing::debug;

use crate::cycle::{deduce_cycle_phase, CyclePhase, CyclePhaseResult, PhaseReason};
use crate::derived::{acwr, training_monotony, WeeklyLoad};
use crate::models::{
    week_start, Alert, AlertCategory, AlertSeverity, AthleteSnapshot, MetricType,
};
use crate::readiness::{compute_readiness, ReadinessLevel, ReadinessStatus};
use crate::series::DateSeries;
use crate::thresholds::{AdverseTrend, MetricRule, PersistentRule, Thresholds, GENERAL_ALERT_METRICS};
use crate::trend::metric_trend;

/// Default active window for general alerts
pub const DEFAULT_ALERT_WINDOW_DAYS: u32 = 30;

const SHORT_WINDOW_DAYS: u32 = 7;
const LONG_WINDOW_DAYS: u32 = 30;

/// Results already computed upstream in the same analysis
#[derive(Debug, Clone, Copy, Default)]
pub struct Precomputed<'a> {
    pub readiness: Option<&'a ReadinessStatus>,
    pub cycle: Option<&'a CyclePhaseResult>,
}

pub struct AlertEngine<'a> {
    thresholds: &'a Thresholds,
    window_days: u32,
}

impl<'a> AlertEngine<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        AlertEngine {
            thresholds,
            window_days: DEFAULT_ALERT_WINDOW_DAYS,
        }
    }

    pub fn with_window_days(mut self, window_days: u32) -> Self {
        self.window_days = window_days.max(1);
        self
    }

    /// Alerts for the requested categories
    pub fn evaluate(
        &self,
        snapshot: &AthleteSnapshot,
        as_of: NaiveDate,
        categories: &[AlertCategory],
    ) -> Vec<Alert> {
        self.evaluate_with(snapshot, as_of, categories, Precomputed::default())
    }

    /// Same as [`evaluate`](Self::evaluate), reusing readiness and cycle results
    pub fn evaluate_with(
        &self,
        snapshot: &AthleteSnapshot,
        as_of: NaiveDate,
        categories: &[AlertCategory],
        precomputed: Precomputed<'_>,
    ) -> Vec<Alert> {
        let mut requested = categories.to_vec();
        requested.sort();
        requested.dedup();

        let snapshot = snapshot.as_of(as_of);
        let alerts: Vec<Alert> = requested
            .par_iter()
            .map(|category| match category {
                AlertCategory::General => self.general_alerts(&snapshot, as_of),
                AlertCategory::Load => self.load_alerts(&snapshot, as_of),
                AlertCategory::Readiness => self.readiness_alerts(&snapshot, as_of, precomputed.readiness),
                AlertCategory::Menstrual => self.menstrual_alerts(&snapshot, as_of, precomputed.cycle),
            })
            .collect::<Vec<Vec<Alert>>>()
            .into_iter()
            .flatten()
            .collect();

        debug!(
            athlete = %snapshot.profile.id,
            %as_of,
            categories = requested.len(),
            alerts = alerts.len(),
            "Alerts evaluated"
        );
        alerts
    }

    /// Metrics below `min_samples` are only named in one insufficient-data
    /// info alert; metrics with enough samples still run their checks.
    fn general_alerts(&self, snapshot: &AthleteSnapshot, as_of: NaiveDate) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let mut insufficient = Vec::new();
        let mut any_data = false;

        for metric in GENERAL_ALERT_METRICS {
            let Some(rule) = self.thresholds.metric_rule(metric) else {
                continue;
            };
            let series = DateSeries::from_records(&snapshot.records, metric).up_to(as_of);
            let samples = series.window(as_of, self.window_days).len();
            if samples == 0 {
                continue;
            }
            any_data = true;
            if samples < self.thresholds.min_samples {
                insufficient.push(metric);
                continue;
            }

            alerts.extend(persistent_alert(rule, &series, as_of));
            alerts.extend(self.trend_alert(rule, snapshot, as_of));
        }

        if !any_data {
            alerts.push(Alert::new(
                AlertSeverity::Info,
                AlertCategory::General,
                format!("Insufficient data: nothing logged in the last {} days", self.window_days),
            ));
        } else if !insufficient.is_empty() {
            let names: Vec<&str> = insufficient.iter().map(|m| m.label()).collect();
            alerts.push(Alert::new(
                AlertSeverity::Info,
                AlertCategory::General,
                format!(
                    "Insufficient data (fewer than {} entries in {} days): {}",
                    self.thresholds.min_samples,
                    self.window_days,
                    names.join(", ")
                ),
            ));
        }
        alerts
    }

    fn trend_alert(&self, rule: &MetricRule, snapshot: &AthleteSnapshot, as_of: NaiveDate) -> Option<Alert> {
        let trend = metric_trend(&snapshot.records, rule.metric, Some(self.window_days), as_of);
        let change = trend.change_percent?;

        let rising = change >= rule.trend_increase_percent;
        let falling = change <= -rule.trend_decrease_percent;
        if !rising && !falling {
            return None;
        }

        let adverse = match rule.adverse_trend {
            AdverseTrend::Increase => rising,
            AdverseTrend::Decrease => falling,
            AdverseTrend::Either => true,
        };
        let direction = if rising { "up" } else { "down" };
        let (severity, verdict) = if adverse {
            (AlertSeverity::Warning, "worth watching")
        } else {
            (AlertSeverity::Success, "improving")
        };

        Some(
            Alert::new(
                severity,
                AlertCategory::General,
                format!(
                    "{} {} {:.0}% over the last {} days, {}",
                    rule.metric.label(),
                    direction,
                    change.abs(),
                    self.window_days,
                    verdict
                ),
            )
            .for_metric(rule.metric),
        )
    }

    fn load_alerts(&self, snapshot: &AthleteSnapshot, as_of: NaiveDate) -> Vec<Alert> {
        let t = &self.thresholds.load;
        let mut alerts = Vec::new();
        let load_alert = |severity, message: String| {
            Alert::new(severity, AlertCategory::Load, message).for_metric(MetricType::SessionLoad)
        };

        let weekly = WeeklyLoad::compute(snapshot, week_start(as_of));
        if weekly.load_ratio > t.ratio_overload {
            alerts.push(load_alert(
                AlertSeverity::Warning,
                format!(
                    "Load this week is {:.0}% of the plan",
                    weekly.load_ratio * 100.0
                ),
            ));
        } else if weekly.load_ratio > 0.0 && weekly.load_ratio < t.ratio_underload {
            alerts.push(load_alert(
                AlertSeverity::Info,
                format!(
                    "Load this week is only {:.0}% of the plan",
                    weekly.load_ratio * 100.0
                ),
            ));
        }

        if let Some(ratio) = acwr(&snapshot.records, as_of) {
            if ratio > t.acwr_danger {
                alerts.push(load_alert(
                    AlertSeverity::Danger,
                    format!("Acute:chronic load ratio {:.2} well above the safe range", ratio),
                ));
            } else if ratio > t.acwr_warning {
                alerts.push(load_alert(
                    AlertSeverity::Warning,
                    format!("Acute:chronic load ratio {:.2} above the safe range", ratio),
                ));
            } else if ratio < t.acwr_low {
                alerts.push(load_alert(
                    AlertSeverity::Info,
                    format!("Acute:chronic load ratio {:.2}, training load is dropping", ratio),
                ));
            }
        }

        let daily = DateSeries::from_records(&snapshot.records, MetricType::SessionLoad);
        let this_week = daily.window(as_of, SHORT_WINDOW_DAYS).sum();
        let last_week = daily
            .window(as_of - Duration::days(SHORT_WINDOW_DAYS as i64), SHORT_WINDOW_DAYS)
            .sum();
        if last_week > 0.0 {
            let increase = (this_week - last_week) / last_week * 100.0;
            if increase > t.weekly_increase_percent {
                alerts.push(load_alert(
                    AlertSeverity::Warning,
                    format!("Load up {:.0}% on the previous 7 days", increase),
                ));
            }
        }

        if let Some(monotony) = training_monotony(&snapshot.records, as_of) {
            if monotony > t.monotony_max {
                alerts.push(load_alert(
                    AlertSeverity::Warning,
                    format!("Training monotony {:.1}, vary session load", monotony),
                ));
            }
        }

        alerts
    }

    fn readiness_alerts(
        &self,
        snapshot: &AthleteSnapshot,
        as_of: NaiveDate,
        precomputed: Option<&ReadinessStatus>,
    ) -> Vec<Alert> {
        let computed;
        let status = match precomputed {
            Some(status) => status,
            None => {
                computed = compute_readiness(snapshot, as_of, &self.thresholds.readiness);
                &computed
            }
        };

        if status.level == ReadinessLevel::Neutral {
            // The not-computable message is already a contributing alert
            return status.contributing_alerts.clone();
        }

        let severity = match status.level {
            ReadinessLevel::Green => AlertSeverity::Success,
            ReadinessLevel::Yellow => AlertSeverity::Info,
            ReadinessLevel::Orange => AlertSeverity::Warning,
            ReadinessLevel::Red | ReadinessLevel::Neutral => AlertSeverity::Danger,
        };
        let mut alerts = vec![Alert::new(
            severity,
            AlertCategory::Readiness,
            format!("Readiness {} ({}): {}", status.score, status.level, status.message),
        )];
        alerts.extend(status.contributing_alerts.iter().cloned());
        alerts
    }

    fn menstrual_alerts(
        &self,
        snapshot: &AthleteSnapshot,
        as_of: NaiveDate,
        precomputed: Option<&CyclePhaseResult>,
    ) -> Vec<Alert> {
        if !snapshot.profile.tracks_menstrual_cycle() {
            return Vec::new();
        }

        let computed;
        let result = match precomputed {
            Some(result) => result,
            None => {
                computed = deduce_cycle_phase(snapshot, as_of, &self.thresholds.cycle);
                &computed
            }
        };

        let days = result.days_since_last_period.unwrap_or_default();
        let average = result.average_cycle_length_days.unwrap_or_default();
        let alert = match result.phase {
            CyclePhase::Amenorrhea => Some(Alert::new(
                AlertSeverity::Danger,
                AlertCategory::Menstrual,
                format!(
                    "No period recorded for {} days (average cycle {:.0} days); consider seeing a physician",
                    days, average
                ),
            )),
            CyclePhase::Oligomenorrhea => Some(Alert::new(
                AlertSeverity::Warning,
                AlertCategory::Menstrual,
                format!("Average cycle length {:.0} days is outside the usual range", average),
            )),
            CyclePhase::PotentialDelayOrLongCycle => Some(Alert::new(
                AlertSeverity::Warning,
                AlertCategory::Menstrual,
                format!(
                    "Period {} days after the last one, later than the {:.0}-day average",
                    days, average
                ),
            )),
            CyclePhase::Unknown if result.reason == PhaseReason::InsufficientEvents => Some(Alert::new(
                AlertSeverity::Info,
                AlertCategory::Menstrual,
                format!("Cycle phase unknown: {}", result.reason),
            )),
            CyclePhase::Menstrual
            | CyclePhase::Follicular
            | CyclePhase::Ovulatory
            | CyclePhase::Luteal
            | CyclePhase::Unknown => None,
        };

        alert
            .map(|a| a.for_metric(MetricType::FirstDayOfPeriod))
            .into_iter()
            .collect()
    }
}

fn persistent_alert(rule: &MetricRule, series: &DateSeries, as_of: NaiveDate) -> Option<Alert> {
    let short = series.window(as_of, SHORT_WINDOW_DAYS).mean()?;
    let long = series.window(as_of, LONG_WINDOW_DAYS).mean()?;
    let label = rule.metric.label();

    let message = match rule.persistent {
        PersistentRule::High { min_7d, min_30d } if short >= min_7d && long >= min_30d => format!(
            "{} persistently high: 7-day average {:.1}, 30-day average {:.1}",
            label, short, long
        ),
        PersistentRule::Low { max_7d, max_30d } if short <= max_7d && long <= max_30d => format!(
            "{} persistently low: 7-day average {:.1}, 30-day average {:.1}",
            label, short, long
        ),
        PersistentRule::BelowBaseline { drop_percent } => {
            let baseline = series.mean().filter(|b| *b > 0.0)?;
            let short_drop = (baseline - short) / baseline * 100.0;
            let long_drop = (baseline - long) / baseline * 100.0;
            if short_drop <= drop_percent || long_drop <= drop_percent {
                return None;
            }
            format!(
                "{} below its usual level: 7-day average {:.1}, 30-day average {:.1}, baseline {:.1}",
                label, short, long, baseline
            )
        }
        _ => return None,
    };

    Some(Alert::new(AlertSeverity::Warning, AlertCategory::General, message).for_metric(rule.metric))
}
