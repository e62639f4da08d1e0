use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::error::ImportError;
use crate::import::validation::{RawRecord, RecordValidator};
use crate::import::{has_extension, ImportFormat, ImportOutcome};

/// Same shape as a CSV row, with a JSON number or string as value
#[derive(Debug, Deserialize)]
struct JsonRecord {
    athlete_id: String,
    date: String,
    metric_type: String,
    #[serde(default)]
    sub_type: Option<String>,
    value: Value,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    recorded_at: Option<String>,
}

impl From<JsonRecord> for RawRecord {
    fn from(record: JsonRecord) -> Self {
        let value = match record.value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        RawRecord {
            athlete_id: record.athlete_id,
            date: record.date,
            metric_type: record.metric_type,
            sub_type: record.sub_type,
            value,
            unit: record.unit,
            recorded_at: record.recorded_at,
        }
    }
}

/// JSON array of records; row numbers are 1-based array positions
pub struct JsonImporter;

impl JsonImporter {
    pub fn parse_str(&self, content: &str, validator: &RecordValidator) -> Result<ImportOutcome, ImportError> {
        let records: Vec<JsonRecord> = serde_json::from_str(content)?;
        let mut outcome = ImportOutcome::default();
        for (index, record) in records.into_iter().enumerate() {
            match validator.validate(index + 1, record.into()) {
                Ok(record) => outcome.records.push(record),
                Err(e) => outcome.rejected.push(e),
            }
        }
        Ok(outcome)
    }
}

impl ImportFormat for JsonImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "json")
    }

    fn import_file(&self, file_path: &Path, validator: &RecordValidator) -> Result<ImportOutcome, ImportError> {
        let content = std::fs::read_to_string(file_path)?;
        self.parse_str(&content, validator)
    }

    fn format_name(&self) -> &'static str {
        "JSON"
    }
}
