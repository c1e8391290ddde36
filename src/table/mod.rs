// src/table/mod.rs
//
// In-memory tables are Arrow RecordBatches. Everything here is the small
// set of schema/column plumbing the rest of the pipeline shares: typed
// column access, union-of-columns reconciliation, null-filled alignment,
// row masking and concatenation.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use arrow::{
    array::{new_null_array, Array, ArrayRef, BooleanArray, Int64Array, StringArray},
    compute,
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::warn;

/// The canonical "no data yet" table: zero columns, zero rows.
pub fn empty() -> RecordBatch {
    RecordBatch::new_empty(Arc::new(Schema::empty()))
}

/// True for the canonical empty table.
pub fn is_empty(batch: &RecordBatch) -> bool {
    batch.num_columns() == 0
}

/// All column names of a batch, for error payloads.
pub fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

/// Index of `name`, or `None` if the batch does not carry it.
pub fn index_of(batch: &RecordBatch, name: &str) -> Option<usize> {
    batch.schema().column_with_name(name).map(|(i, _)| i)
}

/// Index of `name`, failing with the structural-validation error.
pub fn require_column(batch: &RecordBatch, name: &str) -> Result<usize, PipelineError> {
    index_of(batch, name).ok_or_else(|| PipelineError::MissingRequiredColumn {
        column: name.to_string(),
        available: column_names(batch),
    })
}

/// Column `idx` as a string array, casting whatever type it has to text.
pub fn as_string(batch: &RecordBatch, idx: usize) -> Result<StringArray> {
    let arr = compute::cast(batch.column(idx).as_ref(), &DataType::Utf8)
        .with_context(|| format!("casting column {} to text", idx))?;
    Ok(arr
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("cast to Utf8 yields StringArray")
        .clone())
}

/// Column `idx` as an Int64 array. Unparseable text becomes null.
pub fn as_i64(batch: &RecordBatch, idx: usize) -> Result<Int64Array> {
    let arr = compute::cast(batch.column(idx).as_ref(), &DataType::Int64)
        .with_context(|| format!("casting column {} to int64", idx))?;
    Ok(arr
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("cast to Int64 yields Int64Array")
        .clone())
}

/// Union of two schemas by column name, left columns first.
///
/// When the two sides disagree on a column's type, both are coerced to text
/// rather than dropping either side's data. That coercion is a documented
/// policy of the merge store, so it is logged loudly every time it fires.
pub fn union_schema(left: &Schema, right: &Schema) -> Schema {
    let mut fields: Vec<Field> = Vec::with_capacity(left.fields().len() + right.fields().len());

    for lf in left.fields() {
        let dt = match right.column_with_name(lf.name()) {
            Some((_, rf)) if rf.data_type() != lf.data_type() => {
                warn!(
                    "{}",
                    PipelineError::SchemaMismatch {
                        column: lf.name().clone(),
                        left: lf.data_type().to_string(),
                        right: rf.data_type().to_string(),
                    }
                );
                DataType::Utf8
            }
            _ => lf.data_type().clone(),
        };
        fields.push(Field::new(lf.name(), dt, true));
    }

    for rf in right.fields() {
        if left.column_with_name(rf.name()).is_none() {
            fields.push(Field::new(rf.name(), rf.data_type().clone(), true));
        }
    }

    Schema::new(fields)
}

/// Rebuild `batch` against `target`: columns the batch lacks are filled with
/// nulls, columns whose type differs are cast.
pub fn align_to(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
    let n = batch.num_rows();
    let mut cols: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());

    for field in target.fields() {
        let col = match index_of(batch, field.name()) {
            Some(idx) => {
                let src = batch.column(idx);
                if src.data_type() == field.data_type() {
                    src.clone()
                } else {
                    compute::cast(src.as_ref(), field.data_type())
                        .with_context(|| format!("coercing column `{}`", field.name()))?
                }
            }
            None => new_null_array(field.data_type(), n),
        };
        cols.push(col);
    }

    RecordBatch::try_new(target.clone(), cols).context("rebuilding batch against union schema")
}

/// Keep only rows where `mask` is true.
pub fn filter_rows(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    compute::filter_record_batch(batch, mask).context("applying row mask")
}

/// Concatenate batches that already share `schema`.
pub fn concat(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    compute::concat_batches(schema, batches).context("concatenating batches")
}
