//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use arbor_core::{Checksum, Commit, JournalEntry, TransactionStats, TreeEntry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Check if JSON mode is enabled.
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write output using the configured format.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub algorithm: String,
}

/// Output for `commit` command.
#[derive(Debug, Serialize)]
pub struct CommitOutput {
    pub success: bool,
    pub result_code: u8,
    pub commit: Checksum,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Checksum>,
    pub stats: TransactionStats,
}

/// One commit in `log` and `show` output.
#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub checksum: Checksum,
    pub tree: Checksum,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Checksum>,
    pub timestamp: String,
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CommitInfo {
    pub fn new(checksum: Checksum, commit: Commit) -> Self {
        Self {
            checksum,
            tree: commit.tree,
            parent: commit.parent,
            timestamp: commit.timestamp.to_rfc3339(),
            subject: commit.subject,
            body: commit.body,
            metadata: commit.metadata,
        }
    }
}

/// Output for `log` command.
#[derive(Debug, Serialize)]
pub struct LogOutput {
    pub success: bool,
    pub result_code: u8,
    pub commits: Vec<CommitInfo>,
}

/// Output for `show` command.
#[derive(Debug, Serialize)]
pub struct ShowOutput {
    pub success: bool,
    pub result_code: u8,
    #[serde(flatten)]
    pub commit: CommitInfo,
}

/// Tree entry information for `ls` command.
#[derive(Debug, Clone, Serialize)]
pub struct TreeEntryInfo {
    pub path: String,
    pub entry_type: String,
    pub mode: String,
    pub checksum: Checksum,
}

impl TreeEntryInfo {
    pub fn new(path: String, entry: &TreeEntry) -> Self {
        Self {
            path,
            entry_type: entry.entry_type.as_str().to_string(),
            mode: format!("{:06o}", entry.mode),
            checksum: entry.checksum,
        }
    }
}

/// Output for `ls` command.
#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub success: bool,
    pub result_code: u8,
    pub tree: Checksum,
    pub entries: Vec<TreeEntryInfo>,
}

/// Output for `checkout` command.
#[derive(Debug, Serialize)]
pub struct CheckoutOutput {
    pub success: bool,
    pub result_code: u8,
    pub checksum: Checksum,
    pub destination: String,
}

/// Output for `rev-parse` command.
#[derive(Debug, Serialize)]
pub struct RevParseOutput {
    pub success: bool,
    pub result_code: u8,
    pub rev: String,
    pub checksum: Checksum,
}

/// Reference information for `refs list`.
#[derive(Debug, Clone, Serialize)]
pub struct RefInfo {
    pub name: String,
    pub checksum: Checksum,
}

/// Output for `refs list` command.
#[derive(Debug, Serialize)]
pub struct RefsListOutput {
    pub success: bool,
    pub result_code: u8,
    pub refs: Vec<RefInfo>,
}

/// Output for `refs rm` command.
#[derive(Debug, Serialize)]
pub struct RefsRmOutput {
    pub success: bool,
    pub result_code: u8,
    pub name: String,
}

/// Journal entry information.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntryInfo {
    pub timestamp: i64,
    pub timestamp_human: String,
    pub operation: String,
    pub checksum: Checksum,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl From<JournalEntry> for JournalEntryInfo {
    fn from(entry: JournalEntry) -> Self {
        let timestamp_human = chrono::DateTime::from_timestamp(entry.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| entry.timestamp.to_string());

        Self {
            timestamp: entry.timestamp,
            timestamp_human,
            operation: entry.operation,
            checksum: entry.checksum,
            branch: entry.target,
            metadata: (!entry.metadata.is_empty()).then_some(entry.metadata),
        }
    }
}

/// Output for `reflog` command.
#[derive(Debug, Serialize)]
pub struct ReflogOutput {
    pub success: bool,
    pub result_code: u8,
    pub entries: Vec<JournalEntryInfo>,
}
