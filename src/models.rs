use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Self-reported or measured daily signal types
///
/// Closed set: adding a variant forces every accessor below to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Subjective sleep quality (0 = terrible, 10 = excellent)
    SleepQuality,
    /// Sleep duration in hours
    SleepDuration,
    /// General fatigue (0 = fresh, 10 = exhausted)
    GeneralFatigue,
    /// Pain / soreness (0 = none, 10 = severe)
    Pain,
    /// Mood (0 = very low, 10 = excellent)
    Mood,
    /// Morning heart-rate variability (RMSSD, ms)
    Hrv,
    /// Resting heart rate in bpm
    RestingHeartRate,
    /// Energy felt before the session (0 = empty, 10 = full)
    PreSessionEnergy,
    /// Leg feel before the session (0 = heavy, 10 = light)
    LegFeel,
    /// Session RPE load (0-10), one record per session via `sub_type`
    SessionLoad,
    /// How the session felt performance-wise (0-10)
    PerformanceFeel,
    /// Body weight in kilograms
    BodyWeight,
    /// Marker for the first day of a menstrual period
    FirstDayOfPeriod,
    /// Free-text injury note
    InjuryNote,
    /// Free-text daily comment
    Comment,
}

impl MetricType {
    pub const ALL: [MetricType; 15] = [
        MetricType::SleepQuality,
        MetricType::SleepDuration,
        MetricType::GeneralFatigue,
        MetricType::Pain,
        MetricType::Mood,
        MetricType::Hrv,
        MetricType::RestingHeartRate,
        MetricType::PreSessionEnergy,
        MetricType::LegFeel,
        MetricType::SessionLoad,
        MetricType::PerformanceFeel,
        MetricType::BodyWeight,
        MetricType::FirstDayOfPeriod,
        MetricType::InjuryNote,
        MetricType::Comment,
    ];

    /// Stable identifier used in storage, CSV files and threshold tables
    pub fn slug(&self) -> &'static str {
        match self {
            MetricType::SleepQuality => "sleep_quality",
            MetricType::SleepDuration => "sleep_duration",
            MetricType::GeneralFatigue => "general_fatigue",
            MetricType::Pain => "pain",
            MetricType::Mood => "mood",
            MetricType::Hrv => "hrv",
            MetricType::RestingHeartRate => "resting_heart_rate",
            MetricType::PreSessionEnergy => "pre_session_energy",
            MetricType::LegFeel => "leg_feel",
            MetricType::SessionLoad => "session_load",
            MetricType::PerformanceFeel => "performance_feel",
            MetricType::BodyWeight => "body_weight",
            MetricType::FirstDayOfPeriod => "first_day_of_period",
            MetricType::InjuryNote => "injury_note",
            MetricType::Comment => "comment",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        let normalized = slug.trim().to_lowercase().replace([' ', '-'], "_");
        MetricType::ALL
            .iter()
            .copied()
            .find(|metric| metric.slug() == normalized)
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            MetricType::SleepQuality => "Sleep quality",
            MetricType::SleepDuration => "Sleep duration",
            MetricType::GeneralFatigue => "General fatigue",
            MetricType::Pain => "Pain",
            MetricType::Mood => "Mood",
            MetricType::Hrv => "HRV",
            MetricType::RestingHeartRate => "Resting heart rate",
            MetricType::PreSessionEnergy => "Pre-session energy",
            MetricType::LegFeel => "Leg feel",
            MetricType::SessionLoad => "Session load",
            MetricType::PerformanceFeel => "Performance feel",
            MetricType::BodyWeight => "Body weight",
            MetricType::FirstDayOfPeriod => "First day of period",
            MetricType::InjuryNote => "Injury note",
            MetricType::Comment => "Comment",
        }
    }

    /// Default unit for the metric
    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::SleepQuality
            | MetricType::GeneralFatigue
            | MetricType::Pain
            | MetricType::Mood
            | MetricType::PreSessionEnergy
            | MetricType::LegFeel
            | MetricType::SessionLoad
            | MetricType::PerformanceFeel => "/10",
            MetricType::SleepDuration => "h",
            MetricType::Hrv => "ms",
            MetricType::RestingHeartRate => "bpm",
            MetricType::BodyWeight => "kg",
            MetricType::FirstDayOfPeriod => "flag",
            MetricType::InjuryNote | MetricType::Comment => "",
        }
    }

    /// Bounded rating scale, if the metric is collected on one
    pub fn scale(&self) -> Option<(f64, f64)> {
        match self {
            MetricType::SleepQuality
            | MetricType::GeneralFatigue
            | MetricType::Pain
            | MetricType::Mood
            | MetricType::PreSessionEnergy
            | MetricType::LegFeel
            | MetricType::SessionLoad
            | MetricType::PerformanceFeel => Some((0.0, 10.0)),
            MetricType::FirstDayOfPeriod => Some((0.0, 1.0)),
            MetricType::SleepDuration
            | MetricType::Hrv
            | MetricType::RestingHeartRate
            | MetricType::BodyWeight
            | MetricType::InjuryNote
            | MetricType::Comment => None,
        }
    }

    /// Whether values can be averaged
    pub fn is_numeric(&self) -> bool {
        !matches!(self, MetricType::InjuryNote | MetricType::Comment)
    }

    /// Whether several same-day entries add up (sessions) instead of averaging
    pub fn is_additive(&self) -> bool {
        matches!(self, MetricType::SessionLoad)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Raw value of a record: numeric for ratings and measurements, text for notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Numeric(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Numeric(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }
}

/// One self-reported data point for one athlete on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub athlete_id: String,

    /// Day the value refers to
    pub date: NaiveDate,

    pub metric_type: MetricType,

    /// Distinguishes several entries of the same type on one day (e.g. session 2)
    #[serde(default)]
    pub sub_type: Option<String>,

    pub value: MetricValue,

    #[serde(default)]
    pub unit: Option<String>,

    /// Submission time, used to resolve same-day corrections
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl MetricRecord {
    pub fn numeric(
        athlete_id: impl Into<String>,
        date: NaiveDate,
        metric_type: MetricType,
        value: f64,
    ) -> Self {
        MetricRecord {
            athlete_id: athlete_id.into(),
            date,
            metric_type,
            sub_type: None,
            value: MetricValue::Numeric(value),
            unit: Some(metric_type.unit().to_string()),
            recorded_at: None,
        }
    }

    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Identity under upsert semantics
    pub fn key(&self) -> RecordKey {
        RecordKey {
            athlete_id: self.athlete_id.clone(),
            date: self.date,
            metric_type: self.metric_type,
            sub_type: self.sub_type.clone(),
        }
    }
}

/// `(athlete, date, metric type, sub-type)` uniqueness key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub athlete_id: String,
    pub date: NaiveDate,
    pub metric_type: MetricType,
    pub sub_type: Option<String>,
}

/// Types of derived values cached by the calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculatedMetricType {
    WellnessIndex,
    InternalLoad,
    NormalizedInternalLoad,
    PlannedLoad,
    LoadRatio,
    Acwr,
}

impl CalculatedMetricType {
    pub fn slug(&self) -> &'static str {
        match self {
            CalculatedMetricType::WellnessIndex => "wellness_index",
            CalculatedMetricType::InternalLoad => "internal_load",
            CalculatedMetricType::NormalizedInternalLoad => "normalized_internal_load",
            CalculatedMetricType::PlannedLoad => "planned_load",
            CalculatedMetricType::LoadRatio => "load_ratio",
            CalculatedMetricType::Acwr => "acwr",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "wellness_index" => Some(CalculatedMetricType::WellnessIndex),
            "internal_load" => Some(CalculatedMetricType::InternalLoad),
            "normalized_internal_load" => Some(CalculatedMetricType::NormalizedInternalLoad),
            "planned_load" => Some(CalculatedMetricType::PlannedLoad),
            "load_ratio" => Some(CalculatedMetricType::LoadRatio),
            "acwr" => Some(CalculatedMetricType::Acwr),
            _ => None,
        }
    }
}

impl fmt::Display for CalculatedMetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Derived value; a cache row that can always be regenerated from records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedMetric {
    pub athlete_id: String,
    pub date: NaiveDate,
    pub metric_type: CalculatedMetricType,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    Other,
}

impl Gender {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "female" | "f" => Some(Gender::Female),
            "male" | "m" => Some(Gender::Male),
            "other" | "x" => Some(Gender::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Other => "other",
        }
    }
}

/// Read-only athlete profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteProfile {
    pub id: String,
    pub gender: Gender,

    /// Free-form preferences (e.g. `menstrual_tracking = "off"`)
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
}

impl AthleteProfile {
    pub fn new(id: impl Into<String>, gender: Gender) -> Self {
        AthleteProfile {
            id: id.into(),
            gender,
            preferences: BTreeMap::new(),
        }
    }

    /// Menstrual analysis only applies to female athletes who have not opted out
    pub fn tracks_menstrual_cycle(&self) -> bool {
        self.gender == Gender::Female
            && self
                .preferences
                .get("menstrual_tracking")
                .map(|v| v != "off")
                .unwrap_or(true)
    }
}

/// Coach-planned week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlanWeek {
    pub athlete_id: String,

    /// First day of the planned week
    pub start_date: NaiveDate,

    /// Planned volume (0-10)
    pub volume_planned: f64,

    /// Planned intensity (0-100)
    pub intensity_planned: f64,
}

impl TrainingPlanWeek {
    /// A plan applies to the whole Monday-Sunday week containing its start date
    pub fn covers(&self, date: NaiveDate) -> bool {
        week_start(self.start_date) == week_start(date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Success,
    Info,
    Warning,
    Danger,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Success => write!(f, "success"),
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Danger => write!(f, "danger"),
        }
    }
}

/// Groups of alert checks that callers can request independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    General,
    Load,
    Readiness,
    Menstrual,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 4] = [
        AlertCategory::General,
        AlertCategory::Load,
        AlertCategory::Readiness,
        AlertCategory::Menstrual,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "general" | "trend" => Some(AlertCategory::General),
            "load" | "charge" => Some(AlertCategory::Load),
            "readiness" => Some(AlertCategory::Readiness),
            "menstrual" | "cycle" => Some(AlertCategory::Menstrual),
            _ => None,
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::General => write!(f, "general"),
            AlertCategory::Load => write!(f, "load"),
            AlertCategory::Readiness => write!(f, "readiness"),
            AlertCategory::Menstrual => write!(f, "menstrual"),
        }
    }
}

/// Output-only notification, recomputed on every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub category: AlertCategory,

    /// Metric the alert is about, when there is a single one
    pub metric: Option<MetricType>,

    pub message: String,
}

impl Alert {
    pub fn new(severity: AlertSeverity, category: AlertCategory, message: impl Into<String>) -> Self {
        Alert {
            severity,
            category,
            metric: None,
            message: message.into(),
        }
    }

    pub fn for_metric(mut self, metric: MetricType) -> Self {
        self.metric = Some(metric);
        self
    }
}

/// Everything the engine needs for one athlete, loaded in a single batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteSnapshot {
    pub profile: AthleteProfile,
    pub records: Vec<MetricRecord>,
    #[serde(default)]
    pub plan_weeks: Vec<TrainingPlanWeek>,
}

impl AthleteSnapshot {
    pub fn new(profile: AthleteProfile, records: Vec<MetricRecord>) -> Self {
        AthleteSnapshot {
            profile,
            records,
            plan_weeks: Vec::new(),
        }
    }

    pub fn with_plan_weeks(mut self, plan_weeks: Vec<TrainingPlanWeek>) -> Self {
        self.plan_weeks = plan_weeks;
        self
    }

    /// Copy restricted to records dated on or before `as_of`
    pub fn as_of(&self, as_of: NaiveDate) -> AthleteSnapshot {
        AthleteSnapshot {
            profile: self.profile.clone(),
            records: self
                .records
                .iter()
                .filter(|r| r.date <= as_of)
                .cloned()
                .collect(),
            plan_weeks: self.plan_weeks.clone(),
        }
    }

    /// Plan week covering `date`; the latest start date wins on overlap
    pub fn plan_week_for(&self, date: NaiveDate) -> Option<&TrainingPlanWeek> {
        self.plan_weeks
            .iter()
            .filter(|week| week.covers(date))
            .max_by_key(|week| week.start_date)
    }
}

/// Monday of the ISO week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(date.weekday().num_days_from_monday() as u64))
        .unwrap_or(NaiveDate::MIN)
}
