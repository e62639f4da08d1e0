//! Analytics facade
//!
//! [`AnalyticsEngine`] holds the validated thresholds and exposes the
//! functional surface used by the CLI and by embedding services. Every call
//! takes an explicit as-of date and a pre-loaded snapshot, so results are
//! reproducible and independent athletes can be analysed in parallel.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::alerts::{AlertEngine, Precomputed, DEFAULT_ALERT_WINDOW_DAYS};
use crate::cycle::{self, CyclePhaseResult};
use crate::derived::DerivedMetricCalculator;
use crate::models::{Alert, AlertCategory, AthleteSnapshot, CalculatedMetric, MetricType};
use crate::readiness::{self, ReadinessStatus};
use crate::series::{span_start, DateSeries};
use crate::thresholds::{Thresholds, GENERAL_ALERT_METRICS};
use crate::trend::{self, CorrelationResult, RollingAverageReport, TrendResult};

/// Full per-athlete analysis for one day
#[derive(Debug, Clone, Serialize)]
pub struct AthleteReport {
    pub athlete_id: String,
    pub as_of: NaiveDate,
    pub derived_metrics: Vec<CalculatedMetric>,
    pub rolling_averages: RollingAverageReport,
    pub trends: BTreeMap<MetricType, TrendResult>,
    pub readiness: ReadinessStatus,
    /// `None` when the athlete does not track a cycle
    pub cycle: Option<CyclePhaseResult>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone)]
pub struct AnalyticsEngine {
    thresholds: Thresholds,
    alert_window_days: u32,
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl AnalyticsEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        AnalyticsEngine {
            thresholds,
            alert_window_days: DEFAULT_ALERT_WINDOW_DAYS,
        }
    }

    pub fn with_alert_window_days(mut self, days: u32) -> Self {
        self.alert_window_days = days.max(1);
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Cache rows for `from..=to`
    pub fn compute_derived_metrics(
        &self,
        snapshot: &AthleteSnapshot,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Vec<CalculatedMetric> {
        DerivedMetricCalculator::compute(snapshot, from, to)
    }

    pub fn compute_trend(
        &self,
        points: &[(NaiveDate, f64)],
        window_days: Option<u32>,
        as_of: NaiveDate,
    ) -> TrendResult {
        trend::compute_trend(points, window_days, as_of)
    }

    pub fn compute_correlation(&self, a: &DateSeries, b: &DateSeries) -> CorrelationResult {
        trend::correlate(a, b)
    }

    pub fn rolling_averages(
        &self,
        snapshot: &AthleteSnapshot,
        metrics: &[MetricType],
        as_of: NaiveDate,
    ) -> RollingAverageReport {
        trend::rolling_averages(&snapshot.records, metrics, as_of)
    }

    pub fn compute_readiness(&self, snapshot: &AthleteSnapshot, as_of: NaiveDate) -> ReadinessStatus {
        readiness::compute_readiness(snapshot, as_of, &self.thresholds.readiness)
    }

    pub fn deduce_cycle_phase(&self, snapshot: &AthleteSnapshot, as_of: NaiveDate) -> CyclePhaseResult {
        cycle::deduce_cycle_phase(snapshot, as_of, &self.thresholds.cycle)
    }

    pub fn get_alerts(
        &self,
        snapshot: &AthleteSnapshot,
        as_of: NaiveDate,
        categories: &[AlertCategory],
    ) -> Vec<Alert> {
        self.alert_engine().evaluate(snapshot, as_of, categories)
    }

    fn alert_engine(&self) -> AlertEngine<'_> {
        AlertEngine::new(&self.thresholds).with_window_days(self.alert_window_days)
    }

    /// Calculator, trends, readiness, cycle and alerts, in dependency order
    pub fn analyze(
        &self,
        snapshot: &AthleteSnapshot,
        as_of: NaiveDate,
        categories: &[AlertCategory],
    ) -> AthleteReport {
        // An alert window wider than the calendar starts at the earliest record
        let from = span_start(as_of, self.alert_window_days)
            .or_else(|| snapshot.records.iter().map(|r| r.date).min())
            .unwrap_or(as_of)
            .min(as_of);
        let derived_metrics = self.compute_derived_metrics(snapshot, from, as_of);

        let numeric: Vec<MetricType> = MetricType::ALL
            .iter()
            .copied()
            .filter(|m| m.is_numeric())
            .collect();
        let rolling_averages = self.rolling_averages(snapshot, &numeric, as_of);

        let trends: BTreeMap<MetricType, TrendResult> = GENERAL_ALERT_METRICS
            .iter()
            .map(|metric| {
                (
                    *metric,
                    trend::metric_trend(&snapshot.records, *metric, Some(self.alert_window_days), as_of),
                )
            })
            .collect();

        let readiness = self.compute_readiness(snapshot, as_of);
        let cycle = snapshot
            .profile
            .tracks_menstrual_cycle()
            .then(|| self.deduce_cycle_phase(snapshot, as_of));

        let alerts = self.alert_engine().evaluate_with(
            snapshot,
            as_of,
            categories,
            Precomputed {
                readiness: Some(&readiness),
                cycle: cycle.as_ref(),
            },
        );

        info!(
            athlete = %snapshot.profile.id,
            %as_of,
            readiness = %readiness.score,
            alerts = alerts.len(),
            "Analysis completed"
        );

        AthleteReport {
            athlete_id: snapshot.profile.id.clone(),
            as_of,
            derived_metrics,
            rolling_averages,
            trends,
            readiness,
            cycle,
            alerts,
        }
    }

    /// Analyse many athletes in parallel; output follows input order
    pub fn analyze_all(
        &self,
        snapshots: &[AthleteSnapshot],
        as_of: NaiveDate,
        categories: &[AlertCategory],
    ) -> Vec<AthleteReport> {
        snapshots
            .par_iter()
            .map(|snapshot| self.analyze(snapshot, as_of, categories))
            .collect()
    }
}
