// src/store/mod.rs
//
// One file per table, Parquet preferred, CSV as the universal fallback.
// Loading substitutes the fallback extension when the preferred file is
// absent; when nothing exists the caller gets the canonical empty table,
// so "no data yet" needs no special handling downstream.

use crate::table;
use anyhow::{Context, Result};
use arrow::csv::{reader::Format as CsvFormat, ReaderBuilder, WriterBuilder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

/// Filename prefix for per-extract-type historical tables.
pub const HIST_PREFIX: &str = "hist_";
/// Filename prefix for normalized tables.
pub const NORM_PREFIX: &str = "norm_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Parquet,
    Csv,
}

impl Format {
    fn extension(self) -> &'static str {
        match self {
            Format::Parquet => "parquet",
            Format::Csv => "csv",
        }
    }

    /// Preferred-first probe order for a given preference flag.
    fn order(prefer_parquet: bool) -> [Format; 2] {
        if prefer_parquet {
            [Format::Parquet, Format::Csv]
        } else {
            [Format::Csv, Format::Parquet]
        }
    }
}

fn path_for(dir: &Path, stem: &str, format: Format) -> PathBuf {
    dir.join(format!("{}.{}", stem, format.extension()))
}

/// Persist `batch` as `<dir>/<stem>.<ext>` in the preferred format.
/// Writes to a temporary path first, then renames into place.
pub fn save(batch: &RecordBatch, dir: &Path, stem: &str, prefer_parquet: bool) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating store dir {}", dir.display()))?;

    let format = Format::order(prefer_parquet)[0];
    let final_path = path_for(dir, stem, format);
    let tmp_path = final_path.with_extension(format!("{}.tmp", format.extension()));

    match format {
        Format::Parquet => {
            let file = File::create(&tmp_path)
                .with_context(|| format!("creating {}", tmp_path.display()))?;
            let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), None)
                .context("creating Parquet writer")?;
            writer.write(batch).context("writing Parquet batch")?;
            writer.close().context("closing Parquet writer")?;
        }
        Format::Csv => {
            let file = File::create(&tmp_path)
                .with_context(|| format!("creating {}", tmp_path.display()))?;
            let mut writer = WriterBuilder::new().with_header(true).build(file);
            writer.write(batch).context("writing CSV batch")?;
        }
    }

    fs::rename(&tmp_path, &final_path).with_context(|| {
        format!(
            "renaming {} to {}",
            tmp_path.display(),
            final_path.display()
        )
    })?;

    info!(path = %final_path.display(), rows = batch.num_rows(), "saved table");
    Ok(final_path)
}

/// Load `<dir>/<stem>` trying the preferred format first, then the fallback
/// extension. Nothing on disk yields the canonical empty table.
pub fn load(dir: &Path, stem: &str, prefer_parquet: bool) -> Result<RecordBatch> {
    for format in Format::order(prefer_parquet) {
        let path = path_for(dir, stem, format);
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "loading table");
        return match format {
            Format::Parquet => read_parquet(&path),
            Format::Csv => read_csv(&path),
        };
    }

    debug!(stem, dir = %dir.display(), "no store file, returning empty table");
    Ok(table::empty())
}

fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading Parquet metadata of {}", path.display()))?;
    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(8192)
        .build()
        .with_context(|| format!("building Parquet reader for {}", path.display()))?;

    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("decoding {}", path.display()))?;
    table::concat(&schema, &batches)
}

fn read_csv(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let (schema, _) = CsvFormat::default()
        .with_header(true)
        .infer_schema(file, None)
        .with_context(|| format!("inferring schema of {}", path.display()))?;
    let schema = Arc::new(schema);

    let file = File::open(path).with_context(|| format!("reopening {}", path.display()))?;
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)
        .with_context(|| format!("building CSV reader for {}", path.display()))?;

    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("decoding {}", path.display()))?;
    table::concat(&schema, &batches)
}
