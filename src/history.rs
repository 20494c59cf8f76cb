// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Identification history, one JSON record per line

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::orchestrator::{AnalysisRecord, ResultSink};
use crate::{Result, VerdantError};

/// User-settable flags on a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFlag {
    Favorite,
    Incorrect,
}

/// Append-only store of analysis records
pub struct History {
    path: PathBuf,
}

impl History {
    /// Create a new history manager
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a record to the history
    pub fn append(&self, record: &AnalysisRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all records, oldest first
    pub fn read_all(&self) -> Result<Vec<AnalysisRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Failed to parse history record: {}", e);
                }
            }
        }

        Ok(records)
    }

    /// Get the most recent N records (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<AnalysisRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(count);
        Ok(records)
    }

    pub fn find(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        Ok(self.read_all()?.into_iter().find(|r| r.id == id))
    }

    /// Set a flag on a record. Fails if the id is unknown.
    pub fn set_flag(&self, id: &str, flag: RecordFlag, value: bool) -> Result<()> {
        let mut records = self.read_all()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| VerdantError::History(format!("no record with id {}", id)))?;

        match flag {
            RecordFlag::Favorite => record.is_favorite = value,
            RecordFlag::Incorrect => record.is_incorrect = value,
        }

        self.rewrite(&records)
    }

    /// Flip a flag and return its new value
    pub fn toggle_flag(&self, id: &str, flag: RecordFlag) -> Result<bool> {
        let record = self
            .find(id)?
            .ok_or_else(|| VerdantError::History(format!("no record with id {}", id)))?;
        let value = match flag {
            RecordFlag::Favorite => !record.is_favorite,
            RecordFlag::Incorrect => !record.is_incorrect,
        };
        self.set_flag(id, flag, value)?;
        Ok(value)
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.read_all()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.rewrite(&records)?;
        Ok(true)
    }

    /// Write every record to a pretty JSON array. Returns the count.
    pub fn export(&self, output: &Path) -> Result<usize> {
        let records = self.read_all()?;
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(output, json)?;
        Ok(records.len())
    }

    /// Clear all history
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Get history file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rewrite(&self, records: &[AnalysisRecord]) -> Result<()> {
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);

        for record in records {
            let json = serde_json::to_string(record)?;
            writeln!(writer, "{}", json)?;
        }
        writer.flush()?;

        Ok(())
    }
}

impl ResultSink for History {
    fn accept(&self, record: AnalysisRecord) {
        if let Err(e) = self.append(&record) {
            error!("Failed to save record {} to {:?}: {}", record.id, self.path, e);
        }
    }
}
