// src/summary/mod.rs
//
// Append-only structured run log, one JSON object per line per run.
// Callers must check `status` before trusting generated tables: an aborted
// run leaves partial output behind, and this field is how it is flagged.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Per-file merge accounting.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileSummary {
    pub file: String,
    pub capture_date: String,
    pub rows_old: usize,
    pub rows_new: usize,
    pub rows_combined: usize,
}

/// Per-extract-type accounting for one run.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractSummary {
    pub extract_type: String,
    pub files_found: usize,
    pub files_processed: usize,
    pub files_removed: usize,
    pub files: Vec<FileSummary>,
    pub errors: Vec<String>,
}

impl ExtractSummary {
    pub fn new(extract_type: &str, files_found: usize) -> Self {
        ExtractSummary {
            extract_type: extract_type.to_string(),
            files_found,
            files_processed: 0,
            files_removed: 0,
            files: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Column-count telemetry per normalized table.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransformSummary {
    pub table: String,
    pub columns_in: usize,
    pub columns_out: usize,
    pub rows: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub extracts: Vec<ExtractSummary>,
    pub transforms: Vec<TransformSummary>,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn start() -> Self {
        RunSummary {
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Succeeded,
            extracts: Vec::new(),
            transforms: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record a run-fatal error; the status sticks at failed.
    pub fn fail(&mut self, err: impl ToString) {
        self.status = RunStatus::Failed;
        self.errors.push(err.to_string());
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Append one run record to the summary log.
pub fn append(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating runs dir {}", parent.display()))?;
    }
    let line = serde_json::to_string(summary).context("serializing run summary")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening run summary {}", path.display()))?;
    writeln!(file, "{}", line).with_context(|| format!("appending to {}", path.display()))?;
    info!(path = %path.display(), status = ?summary.status, "run summary appended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn runs_append_as_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs/summary.log");

        let mut first = RunSummary::start();
        first.extracts.push(ExtractSummary::new("sections", 2));
        first.finish();
        append(&path, &first).unwrap();

        let mut second = RunSummary::start();
        second.fail("merge failed: missing required column `TERM`");
        second.finish();
        append(&path, &second).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let replayed: RunSummary = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(replayed.status, RunStatus::Succeeded);
        assert_eq!(replayed.extracts[0].files_found, 2);

        let replayed: RunSummary = serde_json::from_str(lines[1]).unwrap();
        assert!(replayed.is_failed());
        assert_eq!(replayed.errors.len(), 1);
    }
}
