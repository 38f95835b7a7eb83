//! Append-only log of branch updates.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// A journal entry recording one ref update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    /// Unix timestamp when the operation occurred.
    pub timestamp: i64,
    /// Operation type ("commit" or "delete").
    pub operation: String,
    /// Commit the ref pointed at after (or, for deletes, before) the update.
    pub checksum: Checksum,
    /// Branch name.
    pub target: String,
    /// Additional metadata (e.g., "parent=none,previous=none").
    pub metadata: String,
}

impl JournalEntry {
    /// Create a new journal entry.
    pub fn new(
        timestamp: i64,
        operation: String,
        checksum: Checksum,
        target: String,
        metadata: String,
    ) -> Self {
        Self {
            timestamp,
            operation,
            checksum,
            target,
            metadata,
        }
    }

    /// Serialize the entry to a pipe-delimited line.
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.timestamp, self.operation, self.checksum, self.target, self.metadata
        )
    }

    /// Parse a journal entry from a pipe-delimited line.
    pub fn from_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.splitn(5, '|').collect();
        if parts.len() != 5 {
            return Err(Error::invalid_store(
                "journal",
                format!(
                    "Invalid journal entry format: expected 5 fields, got {}",
                    parts.len()
                ),
            ));
        }

        let timestamp = parts[0].parse::<i64>().map_err(|_| {
            Error::invalid_store(
                "journal",
                format!("Invalid timestamp in journal entry: {}", parts[0]),
            )
        })?;

        let checksum = Checksum::from_hex(parts[2]).map_err(|_| {
            Error::invalid_store(
                "journal",
                format!("Invalid checksum in journal entry: {}", parts[2]),
            )
        })?;

        Ok(Self {
            timestamp,
            operation: parts[1].to_string(),
            checksum,
            target: parts[3].to_string(),
            metadata: parts[4].to_string(),
        })
    }
}

/// Journal of ref updates.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Open or create a journal at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            File::create(&path).map_err(|e| Error::file_io(&path, e))?;
        }

        Ok(Self { path })
    }

    /// Append an entry to the journal.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::file_io(&self.path, e))?;
        writeln!(file, "{}", entry.to_line())?;
        file.sync_data()?;
        Ok(())
    }

    /// Read every parseable entry, oldest first. Malformed lines are skipped.
    fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).map_err(|e| Error::file_io(&self.path, e))?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Ok(entry) = JournalEntry::from_line(line) {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    /// Read the most recent N entries, oldest first.
    pub fn read_recent(&self, count: usize) -> Result<Vec<JournalEntry>> {
        let entries = self.read_all()?;
        let skip = entries.len().saturating_sub(count);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// All entries for one branch, oldest first.
    pub fn for_target(&self, target: &str) -> Result<Vec<JournalEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|entry| entry.target == target)
            .collect())
    }
}
