use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use sispipe::{
    config::Config,
    error::PipelineError,
    ingest::{self, ExtractType},
    lookup,
    merge::{self, hashing},
    store, summary, table, transform,
};
use std::{collections::BTreeMap, fs, path::PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();
    info!("startup");

    // ─── 2) configuration & dirs ─────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sispipe.yaml".to_string());
    let cfg = Config::load(&config_path)?;
    for d in [&cfg.data_dir, &cfg.extracts_dir, &cfg.runs_dir] {
        fs::create_dir_all(d).with_context(|| format!("creating {}", d.display()))?;
    }

    // ─── 3) hashing salt ─────────────────────────────────────────────
    let salt = match &cfg.hash_salt {
        Some(salt) => salt.clone(),
        None => {
            warn!("{}", PipelineError::SecretMaterialMissing);
            hashing::DEFAULT_SALT.to_string()
        }
    };

    let mut run = summary::RunSummary::start();

    // ─── 4) ingest & merge, one extract type at a time ───────────────
    let discovered = ingest::discover(&cfg.extracts_dir)?;
    let mut historical: BTreeMap<ExtractType, RecordBatch> = BTreeMap::new();

    for ty in ExtractType::ALL {
        let files = discovered.get(&ty).cloned().unwrap_or_default();
        let mut extract_summary = summary::ExtractSummary::new(ty.name(), files.len());

        match process_type(&cfg, ty, &files, &salt, &mut extract_summary) {
            Ok(hist) => {
                historical.insert(ty, hist);
            }
            Err(err) => {
                // Merge failure for a required table: the run aborts.
                error!(extract_type = ty.name(), "aborting run: {:#}", err);
                extract_summary.errors.push(format!("{:#}", err));
                run.fail(format!("{}: {:#}", ty.name(), err));
            }
        }
        run.extracts.push(extract_summary);
        if run.is_failed() {
            break;
        }
    }

    // ─── 5) transform & lookups ──────────────────────────────────────
    if !run.is_failed() {
        if let Err(err) = transform_stage(&cfg, &historical, &mut run) {
            error!("aborting run: {:#}", err);
            run.fail(format!("{:#}", err));
        }
    }

    // ─── 6) finalize ─────────────────────────────────────────────────
    run.finish();
    summary::append(&cfg.runs_dir.join("summary.log"), &run)?;
    if run.is_failed() {
        anyhow::bail!("run failed; see run summary");
    }
    info!("run complete");
    Ok(())
}

/// Process every discovered file for one extract type: ingest, merge into
/// the historical table, delete the consumed file, persist the result.
///
/// Unreadable source files are recorded and skipped; structural errors
/// propagate and abort the run.
fn process_type(
    cfg: &Config,
    ty: ExtractType,
    files: &[PathBuf],
    salt: &str,
    extract_summary: &mut summary::ExtractSummary,
) -> Result<RecordBatch> {
    let stem = format!("{}{}", store::HIST_PREFIX, ty.name());
    let mut hist = store::load(&cfg.data_dir, &stem, cfg.prefer_parquet)?;

    for path in files {
        let raw = match ingest::read_extract(path, ty) {
            Ok(raw) => raw,
            Err(err) => {
                if matches!(
                    err.downcast_ref::<PipelineError>(),
                    Some(PipelineError::SourceFileUnreadable { .. })
                ) {
                    error!(file = %path.display(), "skipping extract: {:#}", err);
                    extract_summary.errors.push(format!("{:#}", err));
                    continue;
                }
                return Err(err);
            }
        };

        let rows_old = hist.num_rows();
        let combined = merge::merge(&hist, &raw, salt)?;
        extract_summary.files.push(summary::FileSummary {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            capture_date: raw.capture_date.to_string(),
            rows_old,
            rows_new: raw.batch.num_rows(),
            rows_combined: combined.num_rows(),
        });
        hist = combined;
        extract_summary.files_processed += 1;

        // Consumed extracts are removed; a leftover file would just be
        // superseded again on the next run.
        match fs::remove_file(path) {
            Ok(()) => extract_summary.files_removed += 1,
            Err(err) => warn!(file = %path.display(), "could not remove extract: {}", err),
        }
    }

    if !table::is_empty(&hist) {
        store::save(&hist, &cfg.data_dir, &stem, cfg.prefer_parquet)?;
    }
    Ok(hist)
}

/// Regenerate every normalized table and rebuild the lookup collection.
fn transform_stage(
    cfg: &Config,
    historical: &BTreeMap<ExtractType, RecordBatch>,
    run: &mut summary::RunSummary,
) -> Result<()> {
    let normalized = transform::transform_all(historical)?;

    for (name, norm) in &normalized {
        let stem = format!("{}{}", store::NORM_PREFIX, name);
        store::save(&norm.batch, &cfg.data_dir, &stem, cfg.prefer_parquet)?;
        run.transforms.push(summary::TransformSummary {
            table: name.to_string(),
            columns_in: norm.columns_in,
            columns_out: norm.columns_out,
            rows: norm.batch.num_rows(),
        });
    }

    let authoritative = lookup::load_authoritative(cfg.authoritative_programs.as_deref())?;
    let mut collection = lookup::LookupCollection::new();
    if let Some(programs) = normalized.get("programs") {
        collection.insert(
            "program_code".to_string(),
            lookup::build_lookup(&programs.batch, "program", "program_code", &authoritative)?,
        );
    }
    if let Some(sections) = normalized.get("sections") {
        collection.insert(
            "subject_department".to_string(),
            lookup::build_lookup(
                &sections.batch,
                "subject",
                "department",
                &lookup::LookupTable::new(),
            )?,
        );
    }
    if !collection.is_empty() {
        lookup::save_collection(&cfg.data_dir.join("lookups.json"), &collection)?;
    }

    Ok(())
}
