//! Append-only CSV log of validation runs.
//!
//! One row per run, no header. Existing rows are never rewritten.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::Result;
use crate::lo::MeasurementRecord;

/// The results log file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record, creating the file if needed.
    pub fn append(&self, record: &MeasurementRecord) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        writer.write_record(record.to_row())?;
        writer.flush()?;
        info!("appended result to {}", self.path.display());
        Ok(())
    }

    /// Reads back every row in file order. A missing file has no rows.
    pub fn rows(&self) -> Result<Vec<Vec<String>>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;
        let mut rows = Vec::new();
        for row in reader.records() {
            rows.push(row?.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }
}
