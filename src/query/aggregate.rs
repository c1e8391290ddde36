// src/query/aggregate.rs
//
// Grouped aggregation over a filtered normalized table: summed measures,
// distinct-section counts and the derived average section size. Groups
// come out in first-seen row order.

use crate::error::PipelineError;
use crate::table;
use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Builder, Int64Array, Int64Builder, StringArray, UInt32Array},
    compute,
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Preferred default grouping; the effective default is its intersection
/// with the columns the table actually carries.
pub const DEFAULT_GROUP_COLUMNS: [&str; 3] = ["term", "subject", "level"];

struct Acc {
    first_row: u32,
    enrolled: i64,
    available: i64,
    waitlist: i64,
    sections: HashSet<String>,
}

fn require(batch: &RecordBatch, column: &str) -> Result<usize, PipelineError> {
    table::index_of(batch, column).ok_or_else(|| PipelineError::MissingRequiredColumn {
        column: column.to_string(),
        available: table::column_names(batch),
    })
}

/// Aggregate `batch` by `group_by` (or the per-report default). Computes
/// summed enrolled/available/waitlist, distinct section counts, and
/// `avg_section_size` = enrolled / sections.
pub fn aggregate(batch: &RecordBatch, group_by: Option<&[&str]>) -> Result<RecordBatch> {
    // 1) Resolve grouping. An explicit list must resolve exactly; the
    //    default list quietly narrows to present columns.
    let group_columns: Vec<&str> = match group_by {
        Some(cols) => {
            for col in cols {
                if table::index_of(batch, col).is_none() {
                    return Err(PipelineError::UnknownColumn {
                        column: col.to_string(),
                        available: table::column_names(batch),
                    }
                    .into());
                }
            }
            cols.to_vec()
        }
        None => DEFAULT_GROUP_COLUMNS
            .iter()
            .copied()
            .filter(|c| table::index_of(batch, c).is_some())
            .collect(),
    };

    // 2) Measures. Enrolled and the section identifier are load-bearing;
    //    available/waitlist are summed only when the table carries them.
    let enrolled = table::as_i64(batch, require(batch, "enrolled")?)?;
    let section_ids = table::as_string(batch, require(batch, "section_id")?)?;
    let available = match table::index_of(batch, "available") {
        Some(idx) => Some(table::as_i64(batch, idx)?),
        None => None,
    };
    let waitlist = match table::index_of(batch, "waitlist") {
        Some(idx) => Some(table::as_i64(batch, idx)?),
        None => None,
    };

    let group_keys: Vec<StringArray> = group_columns
        .iter()
        .map(|c| table::as_string(batch, table::index_of(batch, c).expect("resolved above")))
        .collect::<Result<_>>()?;

    // 3) Accumulate per group, first-seen order.
    let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    let mut groups: Vec<Acc> = Vec::new();

    let sum = |acc: &mut i64, arr: &Option<Int64Array>, row: usize| {
        if let Some(arr) = arr {
            if arr.is_valid(row) {
                *acc += arr.value(row);
            }
        }
    };

    for row in 0..batch.num_rows() {
        let key: Vec<Option<String>> = group_keys
            .iter()
            .map(|col| col.is_valid(row).then(|| col.value(row).to_string()))
            .collect();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Acc {
                first_row: row as u32,
                enrolled: 0,
                available: 0,
                waitlist: 0,
                sections: HashSet::new(),
            });
            groups.len() - 1
        });
        let acc = &mut groups[slot];

        if enrolled.is_valid(row) {
            acc.enrolled += enrolled.value(row);
        }
        sum(&mut acc.available, &available, row);
        sum(&mut acc.waitlist, &waitlist, row);
        if section_ids.is_valid(row) {
            acc.sections.insert(section_ids.value(row).to_string());
        }
    }

    // 4) Assemble output: group columns keep their source types via take.
    let first_rows = UInt32Array::from(
        groups.iter().map(|g| g.first_row).collect::<Vec<_>>(),
    );

    let mut fields: Vec<Field> = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();
    for col in &group_columns {
        let idx = table::index_of(batch, col).expect("resolved above");
        let field = batch.schema().field(idx).clone().with_nullable(true);
        let taken = compute::take(batch.column(idx).as_ref(), &first_rows, None)
            .with_context(|| format!("carrying group column `{}`", col))?;
        fields.push(field);
        columns.push(taken);
    }

    let mut sections_builder = Int64Builder::new();
    let mut enrolled_builder = Int64Builder::new();
    let mut available_builder = Int64Builder::new();
    let mut waitlist_builder = Int64Builder::new();
    let mut avg_builder = Float64Builder::new();
    for acc in &groups {
        let section_count = acc.sections.len() as i64;
        sections_builder.append_value(section_count);
        enrolled_builder.append_value(acc.enrolled);
        available_builder.append_value(acc.available);
        waitlist_builder.append_value(acc.waitlist);
        if section_count > 0 {
            avg_builder.append_value(acc.enrolled as f64 / section_count as f64);
        } else {
            avg_builder.append_null();
        }
    }

    fields.push(Field::new("sections", arrow::datatypes::DataType::Int64, true));
    columns.push(Arc::new(sections_builder.finish()));
    fields.push(Field::new("enrolled", arrow::datatypes::DataType::Int64, true));
    columns.push(Arc::new(enrolled_builder.finish()));
    if available.is_some() {
        fields.push(Field::new("available", arrow::datatypes::DataType::Int64, true));
        columns.push(Arc::new(available_builder.finish()));
    }
    if waitlist.is_some() {
        fields.push(Field::new("waitlist", arrow::datatypes::DataType::Int64, true));
        columns.push(Arc::new(waitlist_builder.finish()));
    }
    fields.push(Field::new(
        "avg_section_size",
        arrow::datatypes::DataType::Float64,
        true,
    ));
    columns.push(Arc::new(avg_builder.finish()));

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("assembling aggregated table")
}
