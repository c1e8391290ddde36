// src/transform/mod.rs
//
// Projects each historical table into its normalized, analysis-ready form:
// ordered column projections with lowercase renames, derived columns
// materialized at transform time, and the wide-to-long expansion for the
// program extract. Normalized tables are regenerated wholesale on every
// run; they have no incremental path.

pub mod derive;
pub mod unpivot;

use crate::ingest::{ExtractType, PERIOD_COLUMN};
use crate::table;
use anyhow::{Context, Result};
use arrow::{
    array::{new_null_array, ArrayRef, Int64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::info;

/// One projection step: a source column or derived expression, and the
/// normalized column it lands in.
pub enum Expr {
    /// Take a source column as-is (renamed).
    Col(&'static str),
    /// Course level tier from a numeric course-number column.
    CourseLevel(&'static str),
    /// Term-type label from the period column.
    TermType(&'static str),
    /// Lab-section flag from a trailing letter on the course identifier.
    LabFlag(&'static str),
    /// Open seats: the direct column when present, else capacity − enrolled.
    Availability {
        direct: &'static str,
        capacity: &'static str,
        enrolled: &'static str,
    },
}

pub struct Projection {
    pub source: Expr,
    pub target: &'static str,
}

fn p(source: Expr, target: &'static str) -> Projection {
    Projection { source, target }
}

fn sections_projections() -> Vec<Projection> {
    vec![
        p(Expr::Col("TERM"), "term"),
        p(Expr::TermType("TERM"), "term_type"),
        p(Expr::Col("SUBJECT"), "subject"),
        p(Expr::Col("CRSE_NUM"), "course_number"),
        p(Expr::CourseLevel("CRSE_NUM"), "level"),
        p(Expr::Col("COURSE_ID"), "course_id"),
        p(Expr::Col("SECTION_ID"), "section_id"),
        p(Expr::Col("TITLE"), "title"),
        p(Expr::LabFlag("COURSE_ID"), "is_lab"),
        p(Expr::Col("DEPARTMENT"), "department"),
        p(Expr::Col("CAPACITY"), "capacity"),
        p(Expr::Col("ENROLLED"), "enrolled"),
        p(Expr::Col("WAITLIST"), "waitlist"),
        p(
            Expr::Availability {
                direct: "AVAILABLE",
                capacity: "CAPACITY",
                enrolled: "ENROLLED",
            },
            "available",
        ),
        p(Expr::Col("XLIST_GROUP"), "xlist_group"),
        p(Expr::Col("XLIST_PRIMARY"), "xlist_primary"),
    ]
}

fn enrollments_projections() -> Vec<Projection> {
    vec![
        p(Expr::Col("TERM"), "term"),
        p(Expr::TermType("TERM"), "term_type"),
        p(Expr::Col("STUDENT_ID"), "student_id"),
        p(Expr::Col("SUBJECT"), "subject"),
        p(Expr::Col("CRSE_NUM"), "course_number"),
        p(Expr::CourseLevel("CRSE_NUM"), "level"),
        p(Expr::Col("COURSE_ID"), "course_id"),
        p(Expr::Col("SECTION_ID"), "section_id"),
        p(Expr::Col("CREDITS"), "credits"),
        p(Expr::Col("GRADE"), "grade"),
    ]
}

fn programs_projections() -> Vec<Projection> {
    vec![
        p(Expr::Col("TERM"), "term"),
        p(Expr::TermType("TERM"), "term_type"),
        p(Expr::Col("STUDENT_ID"), "student_id"),
        p(Expr::Col("PROGRAM"), "program"),
        p(Expr::Col("PROGRAM_CODE"), "program_code"),
        p(Expr::Col("PROGRAM_TYPE"), "program_type"),
    ]
}

fn awards_projections() -> Vec<Projection> {
    vec![
        p(Expr::Col("TERM"), "term"),
        p(Expr::TermType("TERM"), "term_type"),
        p(Expr::Col("STUDENT_ID"), "student_id"),
        p(Expr::Col("DEGREE"), "degree"),
        p(Expr::Col("PROGRAM"), "program"),
        p(Expr::Col("PROG_CODE"), "program_code"),
        p(Expr::Col("HONORS"), "honors"),
    ]
}

fn staff_projections() -> Vec<Projection> {
    vec![
        p(Expr::Col("TERM"), "term"),
        p(Expr::TermType("TERM"), "term_type"),
        p(Expr::Col("STAFF_ID"), "staff_id"),
        p(Expr::Col("COURSE_ID"), "course_id"),
        p(Expr::Col("SECTION_ID"), "section_id"),
        p(Expr::Col("ROLE"), "role"),
        p(Expr::Col("DEPARTMENT"), "department"),
    ]
}

/// A normalized table plus the column-count telemetry for the run summary.
#[derive(Debug)]
pub struct NormalizedTable {
    pub batch: RecordBatch,
    pub columns_in: usize,
    pub columns_out: usize,
}

/// A source column as text, all-null when the historical table lacks it.
fn str_or_null(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    match table::index_of(batch, name) {
        Some(idx) => table::as_string(batch, idx),
        None => {
            let arr = new_null_array(&DataType::Utf8, batch.num_rows());
            Ok(arr
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("null Utf8 array")
                .clone())
        }
    }
}

fn i64_or_null(batch: &RecordBatch, name: &str) -> Result<Int64Array> {
    match table::index_of(batch, name) {
        Some(idx) => table::as_i64(batch, idx),
        None => {
            let arr = new_null_array(&DataType::Int64, batch.num_rows());
            Ok(arr
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("null Int64 array")
                .clone())
        }
    }
}

fn eval(batch: &RecordBatch, expr: &Expr) -> Result<(ArrayRef, DataType)> {
    Ok(match expr {
        Expr::Col(name) => match table::index_of(batch, name) {
            Some(idx) => (
                batch.column(idx).clone(),
                batch.schema().field(idx).data_type().clone(),
            ),
            // Absent optional source column: a typed missing value.
            None => (
                new_null_array(&DataType::Utf8, batch.num_rows()),
                DataType::Utf8,
            ),
        },
        Expr::CourseLevel(src) => {
            let nums = i64_or_null(batch, src)?;
            (Arc::new(derive::course_level(&nums)), DataType::Utf8)
        }
        Expr::TermType(src) => {
            let periods = i64_or_null(batch, src)?;
            (Arc::new(derive::term_type(&periods)), DataType::Utf8)
        }
        Expr::LabFlag(src) => {
            let ids = str_or_null(batch, src)?;
            (Arc::new(derive::lab_flag(&ids)), DataType::Boolean)
        }
        Expr::Availability {
            direct,
            capacity,
            enrolled,
        } => {
            let direct_col = match table::index_of(batch, direct) {
                Some(_) => Some(i64_or_null(batch, direct)?),
                None => None,
            };
            let cap = i64_or_null(batch, capacity)?;
            let enr = i64_or_null(batch, enrolled)?;
            (
                Arc::new(derive::availability(direct_col.as_ref(), &cap, &enr)),
                DataType::Int64,
            )
        }
    })
}

/// Apply an ordered projection list to one historical table.
///
/// The period column is structurally required; everything else degrades to
/// typed missing values when absent.
fn project(batch: &RecordBatch, projections: &[Projection]) -> Result<RecordBatch> {
    table::require_column(batch, PERIOD_COLUMN)?;

    let mut fields = Vec::with_capacity(projections.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(projections.len());
    for proj in projections {
        let (col, dt) = eval(batch, &proj.source)?;
        fields.push(Field::new(proj.target, dt, true));
        columns.push(col);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("assembling normalized table")
}

fn projections_for(ty: ExtractType) -> Vec<Projection> {
    match ty {
        ExtractType::Sections => sections_projections(),
        ExtractType::Enrollments => enrollments_projections(),
        ExtractType::Programs => programs_projections(),
        ExtractType::Awards => awards_projections(),
        ExtractType::Staff => staff_projections(),
    }
}

/// Transform one historical table into its normalized form.
pub fn transform_one(ty: ExtractType, historical: &RecordBatch) -> Result<NormalizedTable> {
    let source = match ty {
        ExtractType::Programs => {
            // Wide program slots become long rows before projection.
            table::require_column(historical, PERIOD_COLUMN)?;
            unpivot::unpivot_programs(historical)?
        }
        _ => historical.clone(),
    };

    let batch = project(&source, &projections_for(ty))?;
    let normalized = NormalizedTable {
        columns_in: historical.num_columns(),
        columns_out: batch.num_columns(),
        batch,
    };
    info!(
        table = ty.name(),
        columns_in = normalized.columns_in,
        columns_out = normalized.columns_out,
        rows = normalized.batch.num_rows(),
        "normalized table"
    );
    Ok(normalized)
}

/// Transform every non-empty historical table. Types with no history yet
/// are skipped; a structural failure in any table aborts the whole
/// transform.
pub fn transform_all(
    historical: &BTreeMap<ExtractType, RecordBatch>,
) -> Result<BTreeMap<&'static str, NormalizedTable>> {
    let mut out = BTreeMap::new();
    for (&ty, batch) in historical {
        if table::is_empty(batch) {
            continue;
        }
        let normalized = transform_one(ty, batch)
            .with_context(|| format!("transforming `{}`", ty.name()))?;
        out.insert(ty.name(), normalized);
    }
    Ok(out)
}
