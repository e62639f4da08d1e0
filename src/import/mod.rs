use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ImportError;
use crate::models::{MetricRecord, TrainingPlanWeek};

pub mod csv;
pub mod json;
pub mod validation;

pub use validation::{RawPlanWeek, RawRecord, RecordValidator};

/// Records accepted from one source plus every rejected row
#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub records: Vec<MetricRecord>,
    pub rejected: Vec<ImportError>,
}

impl ImportOutcome {
    fn merge(&mut self, other: ImportOutcome) {
        self.records.extend(other.records);
        self.rejected.extend(other.rejected);
    }
}

/// Trait for importing metric records from different file formats
pub trait ImportFormat {
    /// Check if this importer can handle the given file
    fn can_import(&self, file_path: &Path) -> bool;

    /// Parse and validate every record in the file
    ///
    /// Unreadable files fail; invalid rows are collected in the outcome.
    fn import_file(&self, file_path: &Path, validator: &RecordValidator) -> Result<ImportOutcome, ImportError>;

    fn format_name(&self) -> &'static str;
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Picks an importer by file extension
pub struct ImportManager {
    importers: Vec<Box<dyn ImportFormat>>,
    validator: RecordValidator,
}

impl Default for ImportManager {
    fn default() -> Self {
        Self::new(RecordValidator::new())
    }
}

impl ImportManager {
    pub fn new(validator: RecordValidator) -> Self {
        let importers: Vec<Box<dyn ImportFormat>> =
            vec![Box::new(csv::CsvImporter::new()), Box::new(json::JsonImporter)];
        Self { importers, validator }
    }

    pub fn import_file(&self, file_path: &Path) -> Result<ImportOutcome, ImportError> {
        let importer = self
            .importers
            .iter()
            .find(|importer| importer.can_import(file_path))
            .ok_or_else(|| ImportError::UnsupportedFormat(file_path.display().to_string()))?;

        let outcome = importer.import_file(file_path, &self.validator)?;
        info!(
            file = %file_path.display(),
            format = importer.format_name(),
            accepted = outcome.records.len(),
            rejected = outcome.rejected.len(),
            "File imported"
        );
        for error in &outcome.rejected {
            warn!(file = %file_path.display(), "{}", error);
        }
        Ok(outcome)
    }

    /// Import every supported file in a directory, sorted by name
    pub fn import_directory(&self, dir_path: &Path) -> Result<ImportOutcome, ImportError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir_path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && self.importers.iter().any(|i| i.can_import(path)))
            .collect();
        files.sort();

        let mut outcome = ImportOutcome::default();
        for file in files {
            outcome.merge(self.import_file(&file)?);
        }
        Ok(outcome)
    }

    /// Import planned weeks from a CSV file
    pub fn import_plan_file(&self, file_path: &Path) -> Result<(Vec<TrainingPlanWeek>, Vec<ImportError>), ImportError> {
        csv::read_plan_weeks(file_path, &self.validator)
    }
}
