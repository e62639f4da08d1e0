use csv::{ReaderBuilder, Trim};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ImportError;
use crate::import::validation::{RawPlanWeek, RawRecord, RecordValidator};
use crate::import::{has_extension, ImportFormat, ImportOutcome};
use crate::models::TrainingPlanWeek;

/// CSV importer accepting common header spellings
///
/// Canonical columns: `athlete_id,date,metric_type,sub_type,value,unit`,
/// optionally `recorded_at`.
pub struct CsvImporter {
    column_mapping: HashMap<String, &'static str>,
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvImporter {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        Self::add_mapping(&mut column_mapping, "athlete_id", &["athlete_id", "athlete", "user_id", "user"]);
        Self::add_mapping(&mut column_mapping, "date", &["date", "day"]);
        Self::add_mapping(&mut column_mapping, "metric_type", &["metric_type", "metric", "type"]);
        Self::add_mapping(&mut column_mapping, "sub_type", &["sub_type", "subtype", "session"]);
        Self::add_mapping(&mut column_mapping, "value", &["value", "score"]);
        Self::add_mapping(&mut column_mapping, "unit", &["unit", "units"]);
        Self::add_mapping(&mut column_mapping, "recorded_at", &["recorded_at", "submitted_at", "timestamp"]);

        Self { column_mapping }
    }

    fn add_mapping(mapping: &mut HashMap<String, &'static str>, standard: &'static str, variations: &[&str]) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), standard);
        }
    }

    /// Parse CSV text; row numbers are file line numbers (header is line 1)
    pub fn parse_str(&self, content: &str, validator: &RecordValidator) -> Result<ImportOutcome, ImportError> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers = reader.headers()?.clone();
        let columns: Vec<Option<&'static str>> = headers
            .iter()
            .map(|h| self.column_mapping.get(&h.to_lowercase()).copied())
            .collect();

        let mut outcome = ImportOutcome::default();
        for (index, row) in reader.records().enumerate() {
            let line = index + 2;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    outcome.rejected.push(ImportError::Csv(e));
                    continue;
                }
            };

            let mut raw = RawRecord::default();
            for (column, field) in columns.iter().zip(row.iter()) {
                let field = field.to_string();
                match column {
                    Some("athlete_id") => raw.athlete_id = field,
                    Some("date") => raw.date = field,
                    Some("metric_type") => raw.metric_type = field,
                    Some("sub_type") => raw.sub_type = Some(field),
                    Some("value") => raw.value = field,
                    Some("unit") => raw.unit = Some(field),
                    Some("recorded_at") => raw.recorded_at = Some(field),
                    _ => {}
                }
            }

            match validator.validate(line, raw) {
                Ok(record) => outcome.records.push(record),
                Err(e) => outcome.rejected.push(e),
            }
        }
        Ok(outcome)
    }
}

impl ImportFormat for CsvImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "csv")
    }

    fn import_file(&self, file_path: &Path, validator: &RecordValidator) -> Result<ImportOutcome, ImportError> {
        let content = std::fs::read_to_string(file_path)?;
        self.parse_str(&content, validator)
    }

    fn format_name(&self) -> &'static str {
        "CSV"
    }
}

/// Read `athlete_id,start_date,volume_planned,intensity_planned` rows
pub fn read_plan_weeks(
    file_path: &Path,
    validator: &RecordValidator,
) -> Result<(Vec<TrainingPlanWeek>, Vec<ImportError>), ImportError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_path(file_path)?;
    let mut weeks = Vec::new();
    let mut rejected = Vec::new();

    for (index, row) in reader.deserialize::<RawPlanWeek>().enumerate() {
        match row {
            Ok(raw) => match validator.validate_plan_week(index + 2, raw) {
                Ok(week) => weeks.push(week),
                Err(e) => rejected.push(e),
            },
            Err(e) => rejected.push(ImportError::Csv(e)),
        }
    }
    Ok((weeks, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricType;

    #[test]
    fn test_parse_with_header_aliases() {
        let content = "\
athlete,day,metric,session,score,unit
a1,2024-05-10,session_load,am,6,
a1,2024-05-10,session_load,pm,4,
a1,2024-05-10,Sleep Quality,,8,/10
";
        let outcome = CsvImporter::new()
            .parse_str(content, &RecordValidator::new())
            .unwrap();

        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.records[0].sub_type.as_deref(), Some("am"));
        assert_eq!(outcome.records[2].metric_type, MetricType::SleepQuality);
    }

    #[test]
    fn test_bad_rows_collected_with_line_numbers() {
        let content = "\
athlete_id,date,metric_type,sub_type,value,unit
a1,2024-05-10,mood,,7,
a1,2024-13-01,mood,,7,
a1,2024-05-11,readiness_vibes,,7,
";
        let outcome = CsvImporter::new()
            .parse_str(content, &RecordValidator::new())
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert!(matches!(outcome.rejected[0], ImportError::InvalidDate { row: 3, .. }));
        assert!(matches!(outcome.rejected[1], ImportError::UnknownMetricType { row: 4, .. }));
    }

    #[test]
    fn test_read_plan_weeks() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plan.csv");
        std::fs::write(
            &path,
            "athlete_id,start_date,volume_planned,intensity_planned\na1,2024-05-13,4,70\na1,2024-05-20,12,70\n",
        )
        .unwrap();

        let (weeks, rejected) = read_plan_weeks(&path, &RecordValidator::new()).unwrap();
        assert_eq!(weeks.len(), 1);
        assert_eq!(rejected.len(), 1);
    }
}
