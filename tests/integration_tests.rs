use chrono::{Duration, NaiveDate};
use readyrs::config::AppConfig;
use readyrs::cycle::{CyclePhase, PhaseReason};
use readyrs::import::{ImportManager, RecordValidator};
use readyrs::store::{load_snapshot, InMemoryStore, MetricStore, SqliteStore};
use readyrs::thresholds::READINESS_KEY;
use readyrs::trend::CorrelationNote;
use readyrs::{
    AlertCategory, AnalyticsEngine, AthleteProfile, CalculatedMetricType, DateSeries, Gender, MetricType,
    MetricValue, ReadyError,
};
use std::fmt::Write as _;
use tempfile::TempDir;

/// Integration tests that run the complete import, store and analysis workflow

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

fn days_ago(days: i64) -> NaiveDate {
    as_of() - Duration::days(days)
}

/// Thirty days of steady wellness plus three period starts for the female athlete
fn squad_csv() -> String {
    let mut csv = String::from("athlete_id,date,metric_type,sub_type,value,unit\n");
    for athlete in ["anna", "ben"] {
        for offset in 0..30 {
            let date = days_ago(offset);
            for (metric, value) in [
                ("sleep_quality", 8.0),
                ("general_fatigue", 3.0),
                ("pain", 2.0),
                ("mood", 7.0),
                ("hrv", 60.0),
                ("pre_session_energy", 7.0),
                ("leg_feel", 7.0),
            ] {
                writeln!(csv, "{},{},{},,{},", athlete, date, metric, value).unwrap();
            }
            writeln!(csv, "{},{},session_load,am,5,", athlete, date).unwrap();
        }
    }
    for offset in [92, 64, 34] {
        writeln!(csv, "anna,{},first_day_of_period,,1,", days_ago(offset)).unwrap();
    }
    csv
}

fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_full_pipeline_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let csv_path = write_file(&dir, "squad.csv", &squad_csv());

    let outcome = ImportManager::new(RecordValidator::rejecting_after(as_of()))
        .import_file(&csv_path)
        .unwrap();
    assert!(outcome.rejected.is_empty());

    let mut store = SqliteStore::open(dir.path().join("readyrs.db")).unwrap();
    store.upsert_profile(&AthleteProfile::new("anna", Gender::Female)).unwrap();
    store.upsert_profile(&AthleteProfile::new("ben", Gender::Male)).unwrap();
    store.upsert_records(&outcome.records).unwrap();

    let snapshots: Vec<_> = store
        .athlete_ids()
        .unwrap()
        .iter()
        .map(|id| load_snapshot(&store, id, as_of(), 730).unwrap())
        .collect();
    let engine = AnalyticsEngine::default();
    let reports = engine.analyze_all(&snapshots, as_of(), &AlertCategory::ALL);

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].athlete_id, "anna");
    assert_eq!(reports[1].athlete_id, "ben");

    for report in &reports {
        // (8 + (10-3) + (10-2) + 7) / 40 * 10
        let wellness = report
            .derived_metrics
            .iter()
            .find(|m| m.metric_type == CalculatedMetricType::WellnessIndex && m.date == as_of())
            .map(|m| m.value);
        assert!((wellness.unwrap() - 7.5).abs() < 1e-9);
        assert!(report.readiness.score.value().is_some());
        assert!(report.readiness.missing_signals.is_empty());
    }

    // Gaps of 28 and 30 days, last start 34 days ago
    let cycle = reports[0].cycle.as_ref().unwrap();
    assert_eq!(cycle.phase, CyclePhase::PotentialDelayOrLongCycle);
    assert_eq!(cycle.reason, PhaseReason::LaterThanExpected);
    assert_eq!(cycle.average_cycle_length_days, Some(29.0));
    assert!(reports[1].cycle.is_none());
    assert!(reports[0]
        .alerts
        .iter()
        .any(|a| a.category == AlertCategory::Menstrual));
    assert!(!reports[1]
        .alerts
        .iter()
        .any(|a| a.category == AlertCategory::Menstrual));
}

#[test]
fn test_reimport_keeps_latest_submission() {
    let dir = TempDir::new().unwrap();
    let first = write_file(
        &dir,
        "first.csv",
        "athlete_id,date,metric_type,sub_type,value,unit,recorded_at\n\
         anna,2024-06-30,mood,,4,,2024-06-30T07:00:00Z\n",
    );
    let second = write_file(
        &dir,
        "second.csv",
        "athlete_id,date,metric_type,sub_type,value,unit,recorded_at\n\
         anna,2024-06-30,mood,,8,,2024-06-30T09:00:00Z\n",
    );

    let manager = ImportManager::default();
    let mut store = InMemoryStore::new();
    store.upsert_profile(&AthleteProfile::new("anna", Gender::Female)).unwrap();

    // Newer first, then the stale correction arrives late
    store.upsert_records(&manager.import_file(&second).unwrap().records).unwrap();
    store.upsert_records(&manager.import_file(&first).unwrap().records).unwrap();

    let records = store.records("anna", as_of(), as_of()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, MetricValue::Numeric(8.0));
}

#[test]
fn test_invalid_rows_are_reported_not_stored() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "mixed.json",
        r#"[
            {"athlete_id": "anna", "date": "2024-06-29", "metric_type": "pain", "value": 3},
            {"athlete_id": "anna", "date": "2024-06-29", "metric_type": "pain", "value": 14},
            {"athlete_id": "anna", "date": "2024-07-05", "metric_type": "mood", "value": 6},
            {"athlete_id": "", "date": "2024-06-29", "metric_type": "mood", "value": 6}
        ]"#,
    );

    let outcome = ImportManager::new(RecordValidator::rejecting_after(as_of()))
        .import_file(&path)
        .unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.rejected.len(), 3);
}

#[test]
fn test_derived_cache_round_trip() {
    let dir = TempDir::new().unwrap();
    let csv_path = write_file(&dir, "squad.csv", &squad_csv());
    let records = ImportManager::default().import_file(&csv_path).unwrap().records;

    let mut store = SqliteStore::open(dir.path().join("cache.db")).unwrap();
    store.upsert_profile(&AthleteProfile::new("ben", Gender::Male)).unwrap();
    let ben: Vec<_> = records.into_iter().filter(|r| r.athlete_id == "ben").collect();
    store.upsert_records(&ben).unwrap();

    let from = days_ago(6);
    let snapshot = load_snapshot(&store, "ben", as_of(), 60).unwrap();
    let rows = AnalyticsEngine::default().compute_derived_metrics(&snapshot, from, as_of());
    store.save_calculated("ben", from, as_of(), &rows).unwrap();

    // Saving twice replaces instead of duplicating
    store.save_calculated("ben", from, as_of(), &rows).unwrap();
    let cached = store.calculated("ben", from, as_of()).unwrap();
    assert_eq!(cached.len(), rows.len());
    assert_eq!(
        cached
            .iter()
            .filter(|m| m.metric_type == CalculatedMetricType::WellnessIndex)
            .count(),
        7
    );
}

#[test]
fn test_correlation_needs_enough_common_dates() {
    let mut store = InMemoryStore::new();
    store.upsert_profile(&AthleteProfile::new("ben", Gender::Male)).unwrap();
    let manager = ImportManager::default();
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "few.csv",
        "athlete_id,date,metric_type,sub_type,value,unit\n\
         ben,2024-06-28,sleep_quality,,6,\n\
         ben,2024-06-29,sleep_quality,,7,\n\
         ben,2024-06-30,sleep_quality,,8,\n\
         ben,2024-06-28,mood,,5,\n\
         ben,2024-06-29,mood,,6,\n\
         ben,2024-06-30,mood,,8,\n",
    );
    store.upsert_records(&manager.import_file(&path).unwrap().records).unwrap();

    let snapshot = load_snapshot(&store, "ben", as_of(), 30).unwrap();
    let result = AnalyticsEngine::default().compute_correlation(
        &DateSeries::from_records(&snapshot.records, MetricType::SleepQuality),
        &DateSeries::from_records(&snapshot.records, MetricType::Mood),
    );
    assert_eq!(result.correlation, None);
    assert_eq!(result.common_dates, 3);
    assert_eq!(result.reason, Some(CorrelationNote::InsufficientCommonDates));
}

#[test]
fn test_incomplete_threshold_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = AppConfig::default();
    config.thresholds.remove(READINESS_KEY, "green_min");
    config.thresholds.remove(READINESS_KEY, "yellow_min");
    config.save_to_file(&path).unwrap();

    let loaded = AppConfig::load_from_file(&path).unwrap();
    let err = ReadyError::from(loaded.engine().unwrap_err());
    let message = err.user_message();
    assert!(message.contains("readiness.green_min"));
    assert!(message.contains("readiness.yellow_min"));
}

#[test]
fn test_unknown_athlete() {
    let store = InMemoryStore::new();
    let err = load_snapshot(&store, "ghost", as_of(), 30).unwrap_err();
    assert!(ReadyError::from(err).user_message().contains("ghost"));
}
