// src/merge/mod.rs
//
// Combines a new extract with the existing historical table for its type.
// The governing rule is period supersession: the new extract is
// authoritative for every period it reports on, so all prior rows for those
// periods are dropped before the new rows are appended. This is not an
// upsert by key; a row the new extract omits for a covered period
// disappears.

pub mod hashing;

use crate::ingest::{RawExtract, PERIOD_COLUMN};
use crate::table;
use anyhow::Result;
use arrow::{array::BooleanArray, record_batch::RecordBatch};
use std::sync::Arc;
use tracing::info;

/// Merge `extract` into `historical`, returning the combined table.
///
/// Identifier columns declared for the extract type are hashed on the
/// extract side only; rows already in the store are assumed hashed (and the
/// fixed-length heuristic in `hashing` keeps an accidental re-merge from
/// double-hashing). Column sets are reconciled by union, with nulls filling
/// either side's gaps and a coerce-to-text policy on type conflicts.
pub fn merge(historical: &RecordBatch, extract: &RawExtract, salt: &str) -> Result<RecordBatch> {
    // 1) Fail fast on structure: the period column and every declared
    //    identifier column must be present in the extract.
    let mut incoming = extract.batch.clone();
    table::require_column(&incoming, PERIOD_COLUMN)?;
    for col in extract.extract_type.id_columns() {
        let idx = table::require_column(&incoming, col)?;
        incoming = hashing::hash_column(&incoming, idx, salt)?;
    }

    // 2) Supersession: drop every historical row whose period the extract
    //    covers. Rows with a null period predate no-one and are kept.
    let survivors = if table::is_empty(historical) {
        historical.clone()
    } else {
        let idx = table::require_column(historical, PERIOD_COLUMN)?;
        let periods = table::as_i64(historical, idx)?;
        let mask: BooleanArray = periods
            .iter()
            .map(|p| Some(!p.map_or(false, |v| extract.periods.contains(&v))))
            .collect();
        table::filter_rows(historical, &mask)?
    };

    // 3) Reconcile columns and concatenate.
    let combined = if table::is_empty(&survivors) {
        incoming
    } else {
        let schema = Arc::new(table::union_schema(
            survivors.schema().as_ref(),
            incoming.schema().as_ref(),
        ));
        let old = table::align_to(&survivors, &schema)?;
        let new = table::align_to(&incoming, &schema)?;
        table::concat(&schema, &[old, new])?
    };

    info!(
        extract_type = extract.extract_type.name(),
        rows_old = historical.num_rows(),
        rows_new = extract.batch.num_rows(),
        rows_combined = combined.num_rows(),
        "merged extract"
    );
    Ok(combined)
}
