//! Menstrual Phase Deducer
//!
//! Infers the current cycle phase from sparse "first day of period" events.
//! Rules are evaluated in priority order and the first match wins:
//!
//! 1. Fewer than 2 events: `Unknown`
//! 2. Days since the last event above average + amenorrhea threshold: `Amenorrhea`
//! 3. Average cycle length outside the normal band: `Oligomenorrhea`
//! 4. Days since the last event at or above average + delay threshold:
//!    `PotentialDelayOrLongCycle`
//! 5. Position within the average cycle: menstrual, follicular, ovulatory
//!    (estimated) or luteal
//!
//! The delay and amenorrhea thresholds are configurable and have not been
//! clinically validated.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::models::{AthleteSnapshot, MetricRecord, MetricType};
use crate::thresholds::CycleThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Menstrual,
    Follicular,
    /// Estimated from the average cycle length only
    Ovulatory,
    Luteal,
    PotentialDelayOrLongCycle,
    Oligomenorrhea,
    Amenorrhea,
    Unknown,
}

impl CyclePhase {
    pub fn label(&self) -> &'static str {
        match self {
            CyclePhase::Menstrual => "Menstrual",
            CyclePhase::Follicular => "Follicular",
            CyclePhase::Ovulatory => "Ovulatory (estimated)",
            CyclePhase::Luteal => "Luteal",
            CyclePhase::PotentialDelayOrLongCycle => "Potential delay or long cycle",
            CyclePhase::Oligomenorrhea => "Oligomenorrhea",
            CyclePhase::Amenorrhea => "Amenorrhea",
            CyclePhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Why a phase was (or could not be) deduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseReason {
    /// Fewer than two period starts in the lookback
    InsufficientEvents,
    /// Profile does not track the menstrual cycle
    NotTracked,
    NoPeriodForTooLong,
    IrregularAverageLength,
    LaterThanExpected,
    PositionInCycle,
    /// Past the average length but not yet late enough to flag
    BeyondAverageLength,
}

impl fmt::Display for PhaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PhaseReason::InsufficientEvents => "need at least 2 first-day-of-period entries",
            PhaseReason::NotTracked => "menstrual tracking not enabled for this athlete",
            PhaseReason::NoPeriodForTooLong => "no period recorded for far longer than the average cycle",
            PhaseReason::IrregularAverageLength => "average cycle length outside the normal range",
            PhaseReason::LaterThanExpected => "period later than the average cycle length",
            PhaseReason::PositionInCycle => "estimated from the position in the average cycle",
            PhaseReason::BeyondAverageLength => "past the average cycle length",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclePhaseResult {
    pub phase: CyclePhase,
    pub reason: PhaseReason,
    /// 1-based day of the current cycle, when a last start is known
    pub day_in_cycle: Option<i64>,
    /// 1-based day within the current phase; `None` for anomalies and `Unknown`
    pub days_in_phase: Option<i64>,
    pub days_since_last_period: Option<i64>,
    pub average_cycle_length_days: Option<f64>,
    pub last_period_start_date: Option<NaiveDate>,
    pub events_used: usize,
}

impl CyclePhaseResult {
    fn unknown(reason: PhaseReason, events: &[NaiveDate], as_of: NaiveDate) -> Self {
        let last = events.last().copied();
        CyclePhaseResult {
            phase: CyclePhase::Unknown,
            reason,
            day_in_cycle: None,
            days_in_phase: None,
            days_since_last_period: last.map(|d| (as_of - d).num_days()),
            average_cycle_length_days: None,
            last_period_start_date: last,
            events_used: events.len(),
        }
    }
}

/// Period start dates within the lookback, oldest first, capped to the most
/// recent `max_events`
pub fn period_starts(
    records: &[MetricRecord],
    as_of: NaiveDate,
    thresholds: &CycleThresholds,
) -> Vec<NaiveDate> {
    let earliest = as_of.checked_sub_days(Days::new(thresholds.lookback_days.max(0) as u64));
    let dates: BTreeSet<NaiveDate> = records
        .iter()
        .filter(|r| r.metric_type == MetricType::FirstDayOfPeriod)
        .filter(|r| r.numeric_value().map(|v| v > 0.0).unwrap_or(false))
        .filter(|r| earliest.map_or(true, |e| r.date > e) && r.date <= as_of)
        .map(|r| r.date)
        .collect();

    let skip = dates.len().saturating_sub(thresholds.max_events);
    dates.into_iter().skip(skip).collect()
}

/// Mean gap in days between consecutive chronological events
pub fn average_cycle_length(events: &[NaiveDate]) -> Option<f64> {
    if events.len() < 2 {
        return None;
    }
    let gaps: Vec<f64> = events
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_days() as f64)
        .collect();
    Some(gaps.iter().sum::<f64>() / gaps.len() as f64)
}

/// Classify from chronological period starts
pub fn classify_phase(
    events: &[NaiveDate],
    as_of: NaiveDate,
    thresholds: &CycleThresholds,
) -> CyclePhaseResult {
    let (Some(average), Some(&last)) = (average_cycle_length(events), events.last()) else {
        return CyclePhaseResult::unknown(PhaseReason::InsufficientEvents, events, as_of);
    };

    let days_since = (as_of - last).num_days();
    let elapsed = days_since as f64;
    let day_in_cycle = days_since + 1;

    // Phases within the cycle carry the first cycle day they cover
    let (phase, reason, phase_start) = if elapsed > average + thresholds.amenorrhea_threshold_days {
        (CyclePhase::Amenorrhea, PhaseReason::NoPeriodForTooLong, None)
    } else if average < thresholds.normal_min_days || average > thresholds.normal_max_days {
        (CyclePhase::Oligomenorrhea, PhaseReason::IrregularAverageLength, None)
    } else if elapsed >= average + thresholds.delay_threshold_days {
        (CyclePhase::PotentialDelayOrLongCycle, PhaseReason::LaterThanExpected, None)
    } else {
        let day = day_in_cycle as f64;
        let half = average / 2.0;
        let ovulation_end = half + thresholds.ovulation_window_days;
        if day_in_cycle <= thresholds.menstrual_days {
            (CyclePhase::Menstrual, PhaseReason::PositionInCycle, Some(1))
        } else if day <= half {
            (
                CyclePhase::Follicular,
                PhaseReason::PositionInCycle,
                Some(thresholds.menstrual_days + 1),
            )
        } else if day <= ovulation_end {
            (CyclePhase::Ovulatory, PhaseReason::PositionInCycle, Some(half.floor() as i64 + 1))
        } else if day <= average {
            (CyclePhase::Luteal, PhaseReason::PositionInCycle, Some(ovulation_end.floor() as i64 + 1))
        } else {
            (CyclePhase::Unknown, PhaseReason::BeyondAverageLength, None)
        }
    };
    let days_in_phase = phase_start.map(|start: i64| day_in_cycle - start + 1);

    debug!(
        events = events.len(),
        average,
        days_since,
        %phase,
        "Cycle phase deduced"
    );

    CyclePhaseResult {
        phase,
        reason,
        day_in_cycle: Some(day_in_cycle),
        days_in_phase,
        days_since_last_period: Some(days_since),
        average_cycle_length_days: Some(average),
        last_period_start_date: Some(last),
        events_used: events.len(),
    }
}

/// Phase for an athlete as of a date
pub fn deduce_cycle_phase(
    snapshot: &AthleteSnapshot,
    as_of: NaiveDate,
    thresholds: &CycleThresholds,
) -> CyclePhaseResult {
    if !snapshot.profile.tracks_menstrual_cycle() {
        return CyclePhaseResult::unknown(PhaseReason::NotTracked, &[], as_of);
    }
    let events = period_starts(&snapshot.records, as_of, thresholds);
    classify_phase(&events, as_of, thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AthleteProfile, Gender};
    use crate::thresholds::Thresholds;
    use chrono::Duration;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()
    }

    fn thresholds() -> CycleThresholds {
        Thresholds::default().cycle
    }

    fn days_ago(days: &[i64]) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = days.iter().map(|d| today() - Duration::days(*d)).collect();
        dates.sort();
        dates
    }

    fn period(date: NaiveDate) -> MetricRecord {
        MetricRecord::numeric("a1", date, MetricType::FirstDayOfPeriod, 1.0)
    }

    #[test]
    fn test_delay_example() {
        let events = days_ago(&[92, 64, 34]);
        assert_eq!(average_cycle_length(&events), Some(29.0));

        let result = classify_phase(&events, today(), &thresholds());
        assert_eq!(result.phase, CyclePhase::PotentialDelayOrLongCycle);
        assert_eq!(result.days_since_last_period, Some(34));
        assert_eq!(result.days_in_phase, None);
    }

    #[test]
    fn test_phases_within_regular_cycle() {
        let t = thresholds();
        // average 28, last start 0 days ago => day 1
        let cases = [
            (0, CyclePhase::Menstrual, Some(1)),
            (4, CyclePhase::Menstrual, Some(5)),
            (5, CyclePhase::Follicular, Some(1)),
            (8, CyclePhase::Follicular, Some(4)),
            (14, CyclePhase::Ovulatory, Some(1)),
            (15, CyclePhase::Ovulatory, Some(2)),
            (16, CyclePhase::Luteal, Some(1)),
            (20, CyclePhase::Luteal, Some(5)),
            (28, CyclePhase::Unknown, None),
        ];
        for (since, expected, days_in_phase) in cases {
            let events = days_ago(&[56 + since, 28 + since, since]);
            let result = classify_phase(&events, today(), &t);
            assert_eq!(result.phase, expected, "days since {}", since);
            assert_eq!(result.days_in_phase, days_in_phase, "days since {}", since);
            assert_eq!(result.day_in_cycle, Some(since + 1));
        }
    }

    #[test]
    fn test_amenorrhea_precedes_irregular() {
        // Average 50 days (irregular) but 120 days without a period
        let events = days_ago(&[220, 170, 120]);
        let result = classify_phase(&events, today(), &thresholds());
        assert_eq!(result.phase, CyclePhase::Amenorrhea);
    }

    #[test]
    fn test_irregular_average_is_oligomenorrhea() {
        let events = days_ago(&[90, 45, 2]);
        let result = classify_phase(&events, today(), &thresholds());
        assert_eq!(result.phase, CyclePhase::Oligomenorrhea);
    }

    #[test]
    fn test_single_event_unknown() {
        let result = classify_phase(&days_ago(&[10]), today(), &thresholds());
        assert_eq!(result.phase, CyclePhase::Unknown);
        assert_eq!(result.reason, PhaseReason::InsufficientEvents);
        assert_eq!(result.last_period_start_date, Some(today() - Duration::days(10)));
    }

    #[test]
    fn test_events_outside_lookback_ignored() {
        let mut t = thresholds();
        t.lookback_days = 60;
        let records: Vec<MetricRecord> = days_ago(&[120, 90, 30]).into_iter().map(period).collect();
        assert_eq!(period_starts(&records, today(), &t).len(), 1);
    }

    #[test]
    fn test_lookback_past_calendar_keeps_every_event() {
        let mut t = thresholds();
        t.lookback_days = i64::MAX;
        let records: Vec<MetricRecord> = days_ago(&[120, 90, 30]).into_iter().map(period).collect();
        assert_eq!(period_starts(&records, today(), &t).len(), 3);
    }

    #[test]
    fn test_event_cap_keeps_most_recent() {
        let mut t = thresholds();
        t.max_events = 2;
        let records: Vec<MetricRecord> = days_ago(&[84, 56, 28]).into_iter().map(period).collect();
        let events = period_starts(&records, today(), &t);
        assert_eq!(events, days_ago(&[56, 28]));
    }

    #[test]
    fn test_untracked_profile() {
        let records: Vec<MetricRecord> = days_ago(&[56, 28]).into_iter().map(period).collect();
        let snapshot = AthleteSnapshot::new(AthleteProfile::new("a1", Gender::Male), records);
        let result = deduce_cycle_phase(&snapshot, today(), &thresholds());
        assert_eq!(result.phase, CyclePhase::Unknown);
        assert_eq!(result.reason, PhaseReason::NotTracked);
    }

    proptest! {
        #[test]
        fn prop_fewer_than_two_events_unknown(offset in proptest::option::of(0i64..700)) {
            let records: Vec<MetricRecord> = offset
                .into_iter()
                .map(|d| period(today() - Duration::days(d)))
                .collect();
            let snapshot = AthleteSnapshot::new(AthleteProfile::new("a1", Gender::Female), records);
            let result = deduce_cycle_phase(&snapshot, today(), &thresholds());
            prop_assert_eq!(result.phase, CyclePhase::Unknown);
            prop_assert_eq!(result.reason, PhaseReason::InsufficientEvents);
        }
    }
}
