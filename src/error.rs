//! Error taxonomy for the extract pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by ingestion, merging, transformation and querying.
///
/// Structural and configuration errors are never swallowed. I/O failures for
/// a single extract file are caught by the batch driver, recorded in the run
/// summary, and do not abort the batch; merge or transform failures for a
/// required table abort the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A column the operation cannot proceed without is absent.
    #[error("missing required column `{column}` (available: {available:?})")]
    MissingRequiredColumn {
        column: String,
        available: Vec<String>,
    },

    /// Two deliveries disagree on a column's type. Resolved by coercing both
    /// sides to text; surfaced so the coercion is visible in run logs.
    #[error("schema mismatch on `{column}`: {left} vs {right}, coercing to text")]
    SchemaMismatch {
        column: String,
        left: String,
        right: String,
    },

    /// The extract file could not be read or was empty.
    #[error("source file unreadable `{path}`: {reason}")]
    SourceFileUnreadable { path: PathBuf, reason: String },

    /// The caller supplied an option name no filter spec rule covers.
    #[error("unknown filter option `{option}`")]
    UnknownFilterOption { option: String },

    /// A filter or aggregation referenced a column the table does not carry.
    #[error("unknown column `{column}` (available: {available:?})")]
    UnknownColumn {
        column: String,
        available: Vec<String>,
    },

    /// Cross-list resolution accepts only `home` or `exclude`.
    #[error("unknown cross-list mode `{mode}` (expected `home` or `exclude`)")]
    UnknownCrossListMode { mode: String },

    /// No hashing salt was configured. The pipeline degrades to a built-in
    /// default rather than blocking the batch, but flags it loudly.
    #[error("hashing salt not configured, falling back to built-in default")]
    SecretMaterialMissing,
}
