// src/transform/unpivot.rs
//
// The program-enrollment extract is delivered wide: parallel slot columns
// for the primary/secondary major and first/second minor. Each non-empty
// slot becomes one output row tagged with the slot's program-type label;
// empty slots produce nothing. A join-free unpivot, not a filter.

use crate::table;
use anyhow::{Context, Result};
use arrow::{
    array::{new_null_array, Array, ArrayRef, StringArray, UInt32Array},
    compute,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::sync::Arc;

pub struct SlotSpec {
    pub name_column: &'static str,
    pub code_column: Option<&'static str>,
    pub label: &'static str,
}

/// Program slots in delivery order. The label becomes the `PROGRAM_TYPE`
/// value on every row the slot emits.
pub const PROGRAM_SLOTS: [SlotSpec; 4] = [
    SlotSpec {
        name_column: "MAJOR_1",
        code_column: Some("MAJOR_1_CODE"),
        label: "primary_major",
    },
    SlotSpec {
        name_column: "MAJOR_2",
        code_column: Some("MAJOR_2_CODE"),
        label: "secondary_major",
    },
    SlotSpec {
        name_column: "MINOR_1",
        code_column: None,
        label: "first_minor",
    },
    SlotSpec {
        name_column: "MINOR_2",
        code_column: None,
        label: "second_minor",
    },
];

/// Identifying columns carried onto every emitted row.
const CARRIED: [&str; 2] = ["TERM", "STUDENT_ID"];

fn long_schema(batch: &RecordBatch) -> Arc<Schema> {
    let mut fields = Vec::with_capacity(CARRIED.len() + 3);
    for name in CARRIED {
        let dt = table::index_of(batch, name)
            .map(|i| batch.schema().field(i).data_type().clone())
            .unwrap_or(DataType::Utf8);
        fields.push(Field::new(name, dt, true));
    }
    fields.push(Field::new("PROGRAM", DataType::Utf8, true));
    fields.push(Field::new("PROGRAM_CODE", DataType::Utf8, true));
    fields.push(Field::new("PROGRAM_TYPE", DataType::Utf8, true));
    Arc::new(Schema::new(fields))
}

/// Expand the wide program extract into one row per non-empty slot.
pub fn unpivot_programs(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = long_schema(batch);
    let mut slot_batches: Vec<RecordBatch> = Vec::new();

    for slot in &PROGRAM_SLOTS {
        let name_idx = match table::index_of(batch, slot.name_column) {
            Some(i) => i,
            // A delivery without this slot column simply has no rows for it.
            None => continue,
        };
        let names = table::as_string(batch, name_idx)?;

        let indices: Vec<u32> = (0..batch.num_rows())
            .filter(|&i| !names.is_null(i) && !names.value(i).trim().is_empty())
            .map(|i| i as u32)
            .collect();
        if indices.is_empty() {
            continue;
        }
        let indices = UInt32Array::from(indices);
        let n = indices.len();

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for name in CARRIED {
            let col = match table::index_of(batch, name) {
                Some(i) => compute::take(batch.column(i).as_ref(), &indices, None)
                    .with_context(|| format!("carrying column `{}`", name))?,
                None => new_null_array(&DataType::Utf8, n),
            };
            columns.push(col);
        }

        let taken_names = compute::take(&names, &indices, None).context("taking slot names")?;
        columns.push(taken_names);

        let codes: ArrayRef = match slot.code_column.and_then(|c| table::index_of(batch, c)) {
            Some(i) => {
                let as_text = table::as_string(batch, i)?;
                compute::take(&as_text, &indices, None).context("taking slot codes")?
            }
            None => new_null_array(&DataType::Utf8, n),
        };
        columns.push(codes);

        let labels: ArrayRef = Arc::new(StringArray::from(vec![slot.label; n]));
        columns.push(labels);

        slot_batches.push(
            RecordBatch::try_new(schema.clone(), columns).context("building slot batch")?,
        );
    }

    if slot_batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    table::concat(&schema, &slot_batches)
}
