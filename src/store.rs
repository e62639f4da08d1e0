//! Metric Store Adapter
//!
//! The engine never queries storage itself: [`load_snapshot`] performs one
//! bulk load per athlete and everything downstream works on that snapshot.
//! Two backends implement [`MetricStore`]: an in-memory map for tests and
//! embedding, and SQLite for the CLI.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::series::span_start;
use crate::models::{
    week_start, AthleteProfile, AthleteSnapshot, CalculatedMetric, CalculatedMetricType, Gender,
    MetricRecord, MetricType, MetricValue, RecordKey, TrainingPlanWeek,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage operations the engine's callers rely on
pub trait MetricStore {
    fn profile(&self, athlete_id: &str) -> Result<AthleteProfile, StoreError>;

    fn upsert_profile(&mut self, profile: &AthleteProfile) -> Result<(), StoreError>;

    fn athlete_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Raw records dated `from..=to`, ordered by date
    fn records(&self, athlete_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<MetricRecord>, StoreError>;

    /// Plan weeks starting `from..=to`
    fn plan_weeks(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TrainingPlanWeek>, StoreError>;

    /// Insert or replace by `(athlete, date, metric type, sub-type)`
    fn upsert_record(&mut self, record: &MetricRecord) -> Result<(), StoreError>;

    fn upsert_records(&mut self, records: &[MetricRecord]) -> Result<usize, StoreError> {
        for record in records {
            self.upsert_record(record)?;
        }
        Ok(records.len())
    }

    fn upsert_plan_week(&mut self, week: &TrainingPlanWeek) -> Result<(), StoreError>;

    /// Replace every cached row of the athlete dated `from..=to` with `rows`
    fn save_calculated(
        &mut self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        rows: &[CalculatedMetric],
    ) -> Result<(), StoreError>;

    fn calculated(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CalculatedMetric>, StoreError>;
}

/// Bulk-load everything needed to analyse one athlete as of a date
///
/// Records cover the `lookback_days` days ending on `as_of`; plan weeks are
/// widened to the Monday of the first week so the first partial week keeps
/// its plan.
pub fn load_snapshot<S: MetricStore + ?Sized>(
    store: &S,
    athlete_id: &str,
    as_of: NaiveDate,
    lookback_days: u32,
) -> Result<AthleteSnapshot, StoreError> {
    let profile = store.profile(athlete_id)?;
    let from = span_start(as_of, lookback_days.max(1)).unwrap_or(NaiveDate::MIN);
    let records = store.records(athlete_id, from, as_of)?;
    let plan_weeks = store.plan_weeks(athlete_id, week_start(from), as_of)?;

    debug!(
        athlete = athlete_id,
        %from,
        %as_of,
        records = records.len(),
        plan_weeks = plan_weeks.len(),
        "Snapshot loaded"
    );
    Ok(AthleteSnapshot::new(profile, records).with_plan_weeks(plan_weeks))
}

/// Map-backed store
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    profiles: BTreeMap<String, AthleteProfile>,
    records: BTreeMap<RecordKey, MetricRecord>,
    plan_weeks: BTreeMap<(String, NaiveDate), TrainingPlanWeek>,
    calculated: BTreeMap<(String, NaiveDate, CalculatedMetricType), CalculatedMetric>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl MetricStore for InMemoryStore {
    fn profile(&self, athlete_id: &str) -> Result<AthleteProfile, StoreError> {
        self.profiles
            .get(athlete_id)
            .cloned()
            .ok_or_else(|| StoreError::AthleteNotFound(athlete_id.to_string()))
    }

    fn upsert_profile(&mut self, profile: &AthleteProfile) -> Result<(), StoreError> {
        self.profiles.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    fn athlete_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.profiles.keys().cloned().collect())
    }

    fn records(&self, athlete_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<MetricRecord>, StoreError> {
        let mut records: Vec<MetricRecord> = self
            .records
            .values()
            .filter(|r| r.athlete_id == athlete_id && r.date >= from && r.date <= to)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.date);
        Ok(records)
    }

    fn plan_weeks(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TrainingPlanWeek>, StoreError> {
        Ok(self
            .plan_weeks
            .values()
            .filter(|w| w.athlete_id == athlete_id && w.start_date >= from && w.start_date <= to)
            .cloned()
            .collect())
    }

    fn upsert_record(&mut self, record: &MetricRecord) -> Result<(), StoreError> {
        let key = record.key();
        let keep_existing = match (self.records.get(&key).map(|r| r.recorded_at), record.recorded_at) {
            (Some(Some(old)), Some(new)) => new < old,
            (Some(Some(_)), None) => true,
            _ => false,
        };
        if !keep_existing {
            self.records.insert(key, record.clone());
        }
        Ok(())
    }

    fn upsert_plan_week(&mut self, week: &TrainingPlanWeek) -> Result<(), StoreError> {
        self.plan_weeks
            .insert((week.athlete_id.clone(), week.start_date), week.clone());
        Ok(())
    }

    fn save_calculated(
        &mut self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        rows: &[CalculatedMetric],
    ) -> Result<(), StoreError> {
        self.calculated
            .retain(|(id, date, _), _| !(id == athlete_id && *date >= from && *date <= to));
        for row in rows {
            self.calculated
                .insert((row.athlete_id.clone(), row.date, row.metric_type), row.clone());
        }
        Ok(())
    }

    fn calculated(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CalculatedMetric>, StoreError> {
        Ok(self
            .calculated
            .values()
            .filter(|c| c.athlete_id == athlete_id && c.date >= from && c.date <= to)
            .cloned()
            .collect())
    }
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())?;
        let store = Self { conn };
        store.init_schema()?;
        info!(path = %db_path.as_ref().display(), "Metric store opened");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS athletes (
                id TEXT PRIMARY KEY,
                gender TEXT NOT NULL,
                preferences TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- sub_type is '' rather than NULL so the unique key treats it as a value
            CREATE TABLE IF NOT EXISTS metric_records (
                athlete_id TEXT NOT NULL,
                date DATE NOT NULL,
                metric_type TEXT NOT NULL,
                sub_type TEXT NOT NULL DEFAULT '',
                value_numeric REAL,
                value_text TEXT,
                unit TEXT,
                recorded_at TEXT,
                UNIQUE (athlete_id, date, metric_type, sub_type),
                FOREIGN KEY (athlete_id) REFERENCES athletes (id)
            );

            CREATE TABLE IF NOT EXISTS calculated_metrics (
                athlete_id TEXT NOT NULL,
                date DATE NOT NULL,
                metric_type TEXT NOT NULL,
                value REAL NOT NULL,
                UNIQUE (athlete_id, date, metric_type)
            );

            CREATE TABLE IF NOT EXISTS plan_weeks (
                athlete_id TEXT NOT NULL,
                start_date DATE NOT NULL,
                volume_planned REAL NOT NULL,
                intensity_planned REAL NOT NULL,
                UNIQUE (athlete_id, start_date)
            );

            CREATE INDEX IF NOT EXISTS idx_records_athlete_date ON metric_records (athlete_id, date);
            CREATE INDEX IF NOT EXISTS idx_calculated_athlete_date ON calculated_metrics (athlete_id, date);
            "#,
        )?;
        Ok(())
    }
}

fn corrupted(table: &str, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptedRow {
        table: table.to_string(),
        reason: reason.into(),
    }
}

fn parse_date(table: &str, raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| corrupted(table, format!("date '{}': {}", raw, e)))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl MetricStore for SqliteStore {
    fn profile(&self, athlete_id: &str) -> Result<AthleteProfile, StoreError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT gender, preferences FROM athletes WHERE id = ?1",
                params![athlete_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (gender, preferences) = row.ok_or_else(|| StoreError::AthleteNotFound(athlete_id.to_string()))?;
        let gender = Gender::from_str(&gender).ok_or_else(|| corrupted("athletes", format!("gender '{}'", gender)))?;
        let preferences: BTreeMap<String, String> =
            serde_json::from_str(&preferences).map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(AthleteProfile {
            id: athlete_id.to_string(),
            gender,
            preferences,
        })
    }

    fn upsert_profile(&mut self, profile: &AthleteProfile) -> Result<(), StoreError> {
        let preferences =
            serde_json::to_string(&profile.preferences).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.conn.execute(
            r#"
            INSERT INTO athletes (id, gender, preferences) VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET
                gender = excluded.gender,
                preferences = excluded.preferences,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![profile.id, profile.gender.as_str(), preferences],
        )?;
        Ok(())
    }

    fn athlete_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id FROM athletes ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn records(&self, athlete_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<MetricRecord>, StoreError> {
        type RawRecord = (String, String, String, Option<f64>, Option<String>, Option<String>, Option<String>);

        let mut stmt = self.conn.prepare(
            r#"
            SELECT date, metric_type, sub_type, value_numeric, value_text, unit, recorded_at
            FROM metric_records
            WHERE athlete_id = ?1 AND date >= ?2 AND date <= ?3
            ORDER BY date, metric_type, sub_type
            "#,
        )?;
        let rows: Vec<RawRecord> = stmt
            .query_map(
                params![
                    athlete_id,
                    from.format(DATE_FORMAT).to_string(),
                    to.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let table = "metric_records";
        rows.into_iter()
            .map(|(date, metric, sub_type, numeric, text, unit, recorded_at)| {
                let metric_type = MetricType::from_slug(&metric)
                    .ok_or_else(|| corrupted(table, format!("metric type '{}'", metric)))?;
                let value = match (numeric, text) {
                    (Some(v), _) => MetricValue::Numeric(v),
                    (None, Some(t)) => MetricValue::Text(t),
                    (None, None) => return Err(corrupted(table, "record without a value")),
                };
                let recorded_at = recorded_at
                    .map(|ts| {
                        DateTime::parse_from_rfc3339(&ts)
                            .map(|dt| dt.with_timezone(&Utc))
                            .map_err(|e| corrupted(table, format!("recorded_at '{}': {}", ts, e)))
                    })
                    .transpose()?;

                Ok(MetricRecord {
                    athlete_id: athlete_id.to_string(),
                    date: parse_date(table, &date)?,
                    metric_type,
                    sub_type: Some(sub_type).filter(|s| !s.is_empty()),
                    value,
                    unit,
                    recorded_at,
                })
            })
            .collect()
    }

    fn plan_weeks(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TrainingPlanWeek>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT start_date, volume_planned, intensity_planned
            FROM plan_weeks
            WHERE athlete_id = ?1 AND start_date >= ?2 AND start_date <= ?3
            ORDER BY start_date
            "#,
        )?;
        let rows: Vec<(String, f64, f64)> = stmt
            .query_map(
                params![
                    athlete_id,
                    from.format(DATE_FORMAT).to_string(),
                    to.format(DATE_FORMAT).to_string()
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(start, volume_planned, intensity_planned)| {
                Ok(TrainingPlanWeek {
                    athlete_id: athlete_id.to_string(),
                    start_date: parse_date("plan_weeks", &start)?,
                    volume_planned,
                    intensity_planned,
                })
            })
            .collect()
    }

    fn upsert_record(&mut self, record: &MetricRecord) -> Result<(), StoreError> {
        let (numeric, text) = match &record.value {
            MetricValue::Numeric(v) => (Some(*v), None),
            MetricValue::Text(t) => (None, Some(t.as_str())),
        };

        // Same-day corrections: an older submission never replaces a newer one
        self.conn.execute(
            r#"
            INSERT INTO metric_records (
                athlete_id, date, metric_type, sub_type, value_numeric, value_text, unit, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (athlete_id, date, metric_type, sub_type) DO UPDATE SET
                value_numeric = excluded.value_numeric,
                value_text = excluded.value_text,
                unit = excluded.unit,
                recorded_at = excluded.recorded_at
            WHERE metric_records.recorded_at IS NULL
               OR (excluded.recorded_at IS NOT NULL AND excluded.recorded_at >= metric_records.recorded_at)
            "#,
            params![
                record.athlete_id,
                record.date.format(DATE_FORMAT).to_string(),
                record.metric_type.slug(),
                record.sub_type.as_deref().unwrap_or(""),
                numeric,
                text,
                record.unit,
                record.recorded_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    fn upsert_records(&mut self, records: &[MetricRecord]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO metric_records (
                    athlete_id, date, metric_type, sub_type, value_numeric, value_text, unit, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (athlete_id, date, metric_type, sub_type) DO UPDATE SET
                    value_numeric = excluded.value_numeric,
                    value_text = excluded.value_text,
                    unit = excluded.unit,
                    recorded_at = excluded.recorded_at
                WHERE metric_records.recorded_at IS NULL
                   OR (excluded.recorded_at IS NOT NULL AND excluded.recorded_at >= metric_records.recorded_at)
                "#,
            )?;
            for record in records {
                let (numeric, text) = match &record.value {
                    MetricValue::Numeric(v) => (Some(*v), None),
                    MetricValue::Text(t) => (None, Some(t.as_str())),
                };
                stmt.execute(params![
                    record.athlete_id,
                    record.date.format(DATE_FORMAT).to_string(),
                    record.metric_type.slug(),
                    record.sub_type.as_deref().unwrap_or(""),
                    numeric,
                    text,
                    record.unit,
                    record.recorded_at.map(format_timestamp),
                ])?;
            }
        }
        tx.commit()?;
        debug!(records = records.len(), "Records upserted");
        Ok(records.len())
    }

    fn upsert_plan_week(&mut self, week: &TrainingPlanWeek) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO plan_weeks (athlete_id, start_date, volume_planned, intensity_planned)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (athlete_id, start_date) DO UPDATE SET
                volume_planned = excluded.volume_planned,
                intensity_planned = excluded.intensity_planned
            "#,
            params![
                week.athlete_id,
                week.start_date.format(DATE_FORMAT).to_string(),
                week.volume_planned,
                week.intensity_planned
            ],
        )?;
        Ok(())
    }

    fn save_calculated(
        &mut self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        rows: &[CalculatedMetric],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM calculated_metrics WHERE athlete_id = ?1 AND date >= ?2 AND date <= ?3",
            params![
                athlete_id,
                from.format(DATE_FORMAT).to_string(),
                to.format(DATE_FORMAT).to_string()
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO calculated_metrics (athlete_id, date, metric_type, value)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    row.athlete_id,
                    row.date.format(DATE_FORMAT).to_string(),
                    row.metric_type.slug(),
                    row.value
                ])?;
            }
        }
        tx.commit()?;
        debug!(athlete = athlete_id, rows = rows.len(), "Calculated metrics saved");
        Ok(())
    }

    fn calculated(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CalculatedMetric>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT date, metric_type, value FROM calculated_metrics
            WHERE athlete_id = ?1 AND date >= ?2 AND date <= ?3
            ORDER BY date, metric_type
            "#,
        )?;
        let rows: Vec<(String, String, f64)> = stmt
            .query_map(
                params![
                    athlete_id,
                    from.format(DATE_FORMAT).to_string(),
                    to.format(DATE_FORMAT).to_string()
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, metric, value)| {
                Ok(CalculatedMetric {
                    athlete_id: athlete_id.to_string(),
                    date: parse_date("calculated_metrics", &date)?,
                    metric_type: CalculatedMetricType::from_slug(&metric)
                        .ok_or_else(|| corrupted("calculated_metrics", format!("metric type '{}'", metric)))?,
                    value,
                })
            })
            .collect()
    }
}
