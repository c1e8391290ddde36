// src/ingest/mod.rs
//
// Turns one raw extract file into a typed in-memory table plus metadata.
// Files are matched by a signature substring in the filename, not by exact
// name, and carry an 8-digit capture date somewhere in the name. The
// delimited text itself comes from an external conversion tool; a missing
// or zero-byte file means that tool failed and is a hard failure for the
// file (the batch continues).

use crate::error::PipelineError;
use crate::table;
use anyhow::{Context, Result};
use arrow::csv::{reader::Format as CsvFormat, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use glob::glob;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

/// The period column every extract type reports on.
pub const PERIOD_COLUMN: &str = "TERM";

/// Rows to sample when inferring column types from a delimited file.
const INFERENCE_SAMPLE: usize = 1024;

/// The five extract types delivered by the reporting source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExtractType {
    Sections,
    Enrollments,
    Programs,
    Awards,
    Staff,
}

impl ExtractType {
    pub const ALL: [ExtractType; 5] = [
        ExtractType::Sections,
        ExtractType::Enrollments,
        ExtractType::Programs,
        ExtractType::Awards,
        ExtractType::Staff,
    ];

    /// Signature substring that identifies this type in a filename.
    pub fn signature(self) -> &'static str {
        match self {
            ExtractType::Sections => "COURSE_SECTIONS",
            ExtractType::Enrollments => "STUDENT_ENROLLMENTS",
            ExtractType::Programs => "PROGRAM_ENROLLMENTS",
            ExtractType::Awards => "DEGREES_AWARDED",
            ExtractType::Staff => "STAFF_ASSIGNMENTS",
        }
    }

    /// Short lowercase name used in store filenames and the run summary.
    pub fn name(self) -> &'static str {
        match self {
            ExtractType::Sections => "sections",
            ExtractType::Enrollments => "enrollments",
            ExtractType::Programs => "programs",
            ExtractType::Awards => "awards",
            ExtractType::Staff => "staff",
        }
    }

    /// Sensitive identifier columns hashed before rows enter the store.
    pub fn id_columns(self) -> &'static [&'static str] {
        match self {
            ExtractType::Sections => &[],
            ExtractType::Enrollments => &["STUDENT_ID"],
            ExtractType::Programs => &["STUDENT_ID"],
            ExtractType::Awards => &["STUDENT_ID"],
            ExtractType::Staff => &["STAFF_ID"],
        }
    }
}

/// One ingested extract file: typed table plus extract-level metadata.
/// Ephemeral, discarded after the merge.
#[derive(Debug)]
pub struct RawExtract {
    pub extract_type: ExtractType,
    pub capture_date: NaiveDate,
    /// Distinct period values present in the extract.
    pub periods: BTreeSet<i64>,
    pub batch: RecordBatch,
}

/// Scan `extracts_dir` for files carrying a known signature and a capture
/// date, grouped by type and sorted oldest capture first so later extracts
/// supersede earlier ones.
pub fn discover(extracts_dir: &Path) -> Result<BTreeMap<ExtractType, Vec<PathBuf>>> {
    let mut found: BTreeMap<ExtractType, Vec<(NaiveDate, PathBuf)>> = BTreeMap::new();
    let pattern = format!("{}/*", extracts_dir.display());

    for entry in glob(&pattern).context("globbing extracts dir")? {
        let path = match entry {
            Ok(p) if p.is_file() => p,
            _ => continue,
        };
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        let ty = match ExtractType::ALL
            .into_iter()
            .find(|t| name.contains(t.signature()))
        {
            Some(t) => t,
            None => continue,
        };
        match capture_date_from_filename(name) {
            Some(date) => found.entry(ty).or_default().push((date, path)),
            None => debug!(name, "signature matched but no capture date, skipping"),
        }
    }

    let mut result = BTreeMap::new();
    for (ty, mut files) in found {
        files.sort();
        info!(extract_type = ty.name(), files = files.len(), "discovered extracts");
        result.insert(ty, files.into_iter().map(|(_, p)| p).collect());
    }
    Ok(result)
}

/// Find an 8-digit `YYYYMMDD` run anywhere in `filename`.
pub fn capture_date_from_filename(filename: &str) -> Option<NaiveDate> {
    let chars: Vec<char> = filename.chars().collect();
    for i in 0..=chars.len().saturating_sub(8) {
        let slice = &chars[i..i + 8];
        if !slice.iter().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let s: String = slice.iter().collect();
        let (y, m, d) = (
            s[0..4].parse::<i32>().ok()?,
            s[4..6].parse::<u32>().ok()?,
            s[6..8].parse::<u32>().ok()?,
        );
        if (2000..=2035).contains(&y) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                return Some(date);
            }
        }
    }
    None
}

fn unreadable(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::SourceFileUnreadable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Read one delimited extract file into a `RawExtract`.
///
/// Read and conversion failures come back as `SourceFileUnreadable` (the
/// batch continues past them); a missing period column comes back as
/// `MissingRequiredColumn` (structural, aborts the run).
#[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn read_extract(path: impl AsRef<Path>, ty: ExtractType) -> Result<RawExtract> {
    let path = path.as_ref();

    let meta = fs::metadata(path).map_err(|e| unreadable(path, e))?;
    if meta.len() == 0 {
        return Err(unreadable(path, "file is empty").into());
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| unreadable(path, "filename is not valid UTF-8"))?;
    let capture_date = capture_date_from_filename(name)
        .ok_or_else(|| unreadable(path, "no 8-digit capture date in filename"))?;

    let batch = read_delimited(path)?;

    let period_idx = table::require_column(&batch, PERIOD_COLUMN)?;
    let period_col = table::as_i64(&batch, period_idx)?;
    let periods: BTreeSet<i64> = period_col.iter().flatten().collect();

    info!(
        extract_type = ty.name(),
        rows = batch.num_rows(),
        periods = periods.len(),
        %capture_date,
        "ingested extract"
    );

    Ok(RawExtract {
        extract_type: ty,
        capture_date,
        periods,
        batch,
    })
}

/// Parse a delimited text file with sampled type inference.
fn read_delimited(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path).map_err(|e| unreadable(path, e))?;
    let (schema, _) = CsvFormat::default()
        .with_header(true)
        .infer_schema(file, Some(INFERENCE_SAMPLE))
        .map_err(|e| unreadable(path, e))?;
    let schema = Arc::new(schema);

    let file = File::open(path).map_err(|e| unreadable(path, e))?;
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)
        .map_err(|e| unreadable(path, e))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| unreadable(path, e))?;

    table::concat(&schema, &batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        write!(f, "{}", contents).unwrap();
        path
    }

    #[test]
    fn capture_date_found_anywhere_in_name() {
        let d = capture_date_from_filename("weekly_COURSE_SECTIONS_20250901.txt").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert!(capture_date_from_filename("COURSE_SECTIONS.txt").is_none());
        // 99999999 is eight digits but not a plausible date
        assert!(capture_date_from_filename("x_99999999.txt").is_none());
    }

    #[test]
    fn discover_groups_by_signature_and_sorts_by_capture() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "b_COURSE_SECTIONS_20250908.txt", "TERM\n202280\n");
        write_file(dir.path(), "a_COURSE_SECTIONS_20250901.txt", "TERM\n202280\n");
        write_file(dir.path(), "DEGREES_AWARDED_20250901.txt", "TERM\n202280\n");
        write_file(dir.path(), "unrelated.txt", "TERM\n202280\n");

        let found = discover(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        let sections = &found[&ExtractType::Sections];
        assert_eq!(sections.len(), 2);
        assert!(sections[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("20250901"));
    }

    #[test]
    fn read_extract_infers_types_and_periods() {
        let dir = tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "COURSE_SECTIONS_20250901.txt",
            "TERM,SUBJECT,ENROLLED\n202280,BIOL,25\n202280,CHEM,30\n202310,BIOL,12\n",
        );

        let raw = read_extract(&path, ExtractType::Sections).unwrap();
        assert_eq!(raw.batch.num_rows(), 3);
        assert_eq!(
            raw.periods.iter().copied().collect::<Vec<_>>(),
            vec![202280, 202310]
        );
        assert_eq!(
            raw.capture_date,
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
        );
    }

    #[test]
    fn zero_byte_file_is_unreadable() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "COURSE_SECTIONS_20250901.txt", "");

        let err = read_extract(&path, ExtractType::Sections).unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::SourceFileUnreadable { .. }));
    }

    #[test]
    fn missing_period_column_is_structural() {
        let dir = tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "COURSE_SECTIONS_20250901.txt",
            "SUBJECT,ENROLLED\nBIOL,25\n",
        );

        let err = read_extract(&path, ExtractType::Sections).unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        match err {
            PipelineError::MissingRequiredColumn { column, available } => {
                assert_eq!(column, "TERM");
                assert!(available.contains(&"SUBJECT".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
