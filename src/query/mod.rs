// src/query/mod.rs
//
// The option-driven filter engine every report queries through. Callers
// hand in a loosely-typed options bag; each requested option is parsed
// exactly once into the typed payload its rule kind expects, target
// columns are resolved up front, and the masks compose sequentially in
// spec order. Independent option filters commute.

pub mod aggregate;
pub mod spec;

pub use spec::{FilterKind, FilterRule, FilterSpec};

use crate::error::PipelineError;
use crate::table;
use crate::transform::derive;
use anyhow::{Context, Result};
use arrow::{
    array::{Array, BooleanArray},
    record_batch::RecordBatch,
};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
};

/// Requested filter values, keyed by public option name. Values may be
/// scalars, comma lists, or dash range shorthand; the engine parses each
/// exactly once.
pub type OptionsBag = BTreeMap<String, String>;

/// Per-call engine context: the separately maintained course exclusion
/// list, when one exists.
#[derive(Debug, Default)]
pub struct FilterContext {
    pub exclusions: Option<HashSet<String>>,
}

impl FilterContext {
    /// Context backed by the configured exclusion-list file, or an empty
    /// context when none is configured.
    pub fn load(exclusion_list: Option<&Path>) -> Result<FilterContext> {
        Ok(FilterContext {
            exclusions: exclusion_list.map(load_exclusions).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossListMode {
    Home,
    Exclude,
}

/// A rule's option value after boundary parsing. Internal code never
/// re-inspects the raw string.
#[derive(Debug)]
enum Payload {
    Members(Vec<String>),
    Terms(Vec<i64>),
    Season(i64),
    Range { lo: Option<i64>, hi: Option<i64> },
    Bound(i64),
    Mode(CrossListMode),
    Toggle(bool),
}

fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

fn parse_range_bound(raw: &str) -> Result<Option<i64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<i64>()
        .map(Some)
        .with_context(|| format!("invalid period bound `{}`", raw))
}

fn parse_payload(rule: &FilterRule, raw: &str) -> Result<Payload> {
    let payload = match rule.kind {
        FilterKind::Membership => Payload::Members(
            raw.split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
        ),
        FilterKind::Verbatim => Payload::Members(vec![raw.trim().to_string()]),
        FilterKind::Term => {
            let value = raw.trim();
            match value.to_ascii_lowercase().as_str() {
                "spring" => Payload::Season(derive::SPRING_CODE),
                "summer" => Payload::Season(derive::SUMMER_CODE),
                "fall" => Payload::Season(derive::FALL_CODE),
                _ if value.contains('-') && !value.contains(',') => {
                    let (lo, hi) = value.split_once('-').expect("dash checked above");
                    Payload::Range {
                        lo: parse_range_bound(lo)?,
                        hi: parse_range_bound(hi)?,
                    }
                }
                _ => Payload::Terms(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(|v| {
                            v.parse::<i64>()
                                .with_context(|| format!("invalid period value `{}`", v))
                        })
                        .collect::<Result<_>>()?,
                ),
            }
        }
        FilterKind::MinBound | FilterKind::MaxBound => Payload::Bound(
            raw.trim()
                .parse::<i64>()
                .with_context(|| format!("invalid numeric bound `{}` for `{}`", raw, rule.option))?,
        ),
        FilterKind::CrossList { .. } => match raw.trim().to_ascii_lowercase().as_str() {
            "home" => Payload::Mode(CrossListMode::Home),
            "exclude" => Payload::Mode(CrossListMode::Exclude),
            other => {
                return Err(PipelineError::UnknownCrossListMode {
                    mode: other.to_string(),
                }
                .into())
            }
        },
        FilterKind::Exclusion => Payload::Toggle(truthy(raw)),
    };
    Ok(payload)
}

/// Case-fold and squeeze whitespace, the form course identifiers take in
/// the exclusion list.
pub fn normalize_course_id(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Load the exclusion list: one course identifier per line, `#` comments
/// and blank lines ignored.
pub fn load_exclusions(path: &Path) -> Result<HashSet<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading exclusion list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(normalize_course_id)
        .collect())
}

fn resolve(batch: &RecordBatch, column: &str) -> Result<usize, PipelineError> {
    table::index_of(batch, column).ok_or_else(|| PipelineError::UnknownColumn {
        column: column.to_string(),
        available: table::column_names(batch),
    })
}

/// Apply every option in `options` that `spec` covers, in spec order.
///
/// Unknown option names and unknown target columns are caller errors and
/// fail before any row is touched.
pub fn filter(
    batch: &RecordBatch,
    options: &OptionsBag,
    spec: &FilterSpec,
    ctx: &FilterContext,
) -> Result<RecordBatch> {
    for option in options.keys() {
        if spec.rule(option).is_none() {
            return Err(PipelineError::UnknownFilterOption {
                option: option.clone(),
            }
            .into());
        }
    }

    let mut steps: Vec<(&FilterRule, Payload)> = Vec::new();
    for rule in spec.rules() {
        let raw = match options.get(rule.option) {
            Some(raw) => raw,
            None => continue,
        };
        resolve(batch, rule.column)?;
        if let FilterKind::CrossList { primary_column } = rule.kind {
            resolve(batch, primary_column)?;
        }
        steps.push((rule, parse_payload(rule, raw)?));
    }

    let mut current = batch.clone();
    for (rule, payload) in steps {
        let mask = build_mask(&current, rule, &payload, ctx)?;
        current = table::filter_rows(&current, &mask)?;
    }
    Ok(current)
}

fn all_true(n: usize) -> BooleanArray {
    BooleanArray::from(vec![true; n])
}

fn build_mask(
    batch: &RecordBatch,
    rule: &FilterRule,
    payload: &Payload,
    ctx: &FilterContext,
) -> Result<BooleanArray> {
    let idx = resolve(batch, rule.column)?;

    let mask = match payload {
        Payload::Members(values) => {
            let col = table::as_string(batch, idx)?;
            col.iter()
                .map(|cell| Some(cell.map_or(false, |v| values.iter().any(|m| m == v.trim()))))
                .collect()
        }
        Payload::Terms(terms) => {
            let col = table::as_i64(batch, idx)?;
            col.iter()
                .map(|cell| Some(cell.map_or(false, |v| terms.contains(&v))))
                .collect()
        }
        Payload::Season(code) => {
            let col = table::as_i64(batch, idx)?;
            col.iter()
                .map(|cell| Some(cell.map_or(false, |v| derive::term_code(v) == *code)))
                .collect()
        }
        Payload::Range { lo, hi } => {
            let col = table::as_i64(batch, idx)?;
            col.iter()
                .map(|cell| {
                    Some(cell.map_or(false, |v| {
                        lo.map_or(true, |b| v >= b) && hi.map_or(true, |b| v <= b)
                    }))
                })
                .collect()
        }
        Payload::Bound(bound) => {
            let col = table::as_i64(batch, idx)?;
            col.iter()
                .map(|cell| {
                    Some(cell.map_or(false, |v| match rule.kind {
                        FilterKind::MaxBound => v <= *bound,
                        _ => v >= *bound,
                    }))
                })
                .collect()
        }
        Payload::Mode(mode) => {
            let primary_column = match rule.kind {
                FilterKind::CrossList { primary_column } => primary_column,
                _ => unreachable!("cross-list payload only parses for cross-list rules"),
            };
            let groups = table::as_string(batch, idx)?;
            let primary = table::as_string(batch, resolve(batch, primary_column)?)?;
            (0..batch.num_rows())
                .map(|i| {
                    let ungrouped = !groups.is_valid(i) || groups.value(i).trim().is_empty();
                    let keep = match mode {
                        CrossListMode::Home => {
                            ungrouped || (primary.is_valid(i) && truthy(primary.value(i)))
                        }
                        CrossListMode::Exclude => ungrouped,
                    };
                    Some(keep)
                })
                .collect()
        }
        Payload::Toggle(enabled) => {
            let listed = match (*enabled, &ctx.exclusions) {
                (true, Some(set)) => set,
                // Option off, or no list maintained: a no-op.
                _ => return Ok(all_true(batch.num_rows())),
            };
            let col = table::as_string(batch, idx)?;
            col.iter()
                .map(|cell| Some(cell.map_or(true, |v| !listed.contains(&normalize_course_id(v)))))
                .collect()
        }
    };
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn bag(pairs: &[(&str, &str)]) -> OptionsBag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("term", DataType::Int64, true),
            Field::new("subject", DataType::Utf8, true),
            Field::new("level", DataType::Utf8, true),
            Field::new("title", DataType::Utf8, true),
            Field::new("enrolled", DataType::Int64, true),
            Field::new("course_id", DataType::Utf8, true),
            Field::new("section_id", DataType::Utf8, true),
            Field::new("xlist_group", DataType::Utf8, true),
            Field::new("xlist_primary", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![202180, 202280, 202280, 202380, 202360])),
                Arc::new(StringArray::from(vec!["BIOL", "CHEM", "CHEM", "HIST", "BIOL"])),
                Arc::new(StringArray::from(vec![
                    "lower", "upper", "upper", "lower", "graduate",
                ])),
                Arc::new(StringArray::from(vec![
                    "Intro Biology",
                    "Organic Chemistry",
                    "Organic Chemistry",
                    "World History, 1500-Present",
                    "Advanced Topics",
                ])),
                Arc::new(Int64Array::from(vec![25, 30, 35, 28, 40])),
                Arc::new(StringArray::from(vec![
                    "BIOL1010", "CHEM3010", "CHEM3011", "HIST1100", "BIOL6100",
                ])),
                Arc::new(StringArray::from(vec!["s1", "s2", "s3", "s4", "s5"])),
                Arc::new(StringArray::from(vec![
                    None,
                    Some("X1"),
                    Some("X1"),
                    None,
                    None,
                ])),
                Arc::new(StringArray::from(vec![
                    None,
                    Some("Y"),
                    Some("N"),
                    None,
                    None,
                ])),
            ],
        )
        .unwrap()
    }

    fn no_ctx() -> FilterContext {
        FilterContext::default()
    }

    fn terms_of(batch: &RecordBatch) -> Vec<i64> {
        table::as_i64(batch, table::index_of(batch, "term").unwrap())
            .unwrap()
            .iter()
            .flatten()
            .collect()
    }

    #[test]
    fn open_ended_term_range() {
        let schema = Arc::new(Schema::new(vec![Field::new("term", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![202180, 202280, 202380]))],
        )
        .unwrap();

        let out = filter(
            &batch,
            &bag(&[("term", "202280-")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        assert_eq!(terms_of(&out), vec![202280, 202380]);
    }

    #[test]
    fn closed_term_range_and_season() {
        let batch = sample();

        let ranged = filter(
            &batch,
            &bag(&[("term", "202280-202360")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        assert_eq!(terms_of(&ranged), vec![202280, 202280, 202360]);

        let fall = filter(
            &batch,
            &bag(&[("term", "fall")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        assert_eq!(terms_of(&fall), vec![202180, 202280, 202280, 202380]);
    }

    #[test]
    fn membership_splits_commas_but_verbatim_does_not() {
        let batch = sample();

        let members = filter(
            &batch,
            &bag(&[("subject", "BIOL,HIST")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        assert_eq!(members.num_rows(), 3);

        // The title contains a comma; the verbatim rule matches it whole.
        let titled = filter(
            &batch,
            &bag(&[("title", "World History, 1500-Present")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        assert_eq!(titled.num_rows(), 1);
    }

    #[test]
    fn independent_filters_commute() {
        let batch = sample();
        let ab = filter(
            &batch,
            &bag(&[("subject", "BIOL,CHEM"), ("min_enrolled", "30")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();

        // Same pair applied one at a time, in both orders.
        let a_then_b = filter(
            &filter(
                &batch,
                &bag(&[("subject", "BIOL,CHEM")]),
                FilterSpec::sections(),
                &no_ctx(),
            )
            .unwrap(),
            &bag(&[("min_enrolled", "30")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        let b_then_a = filter(
            &filter(
                &batch,
                &bag(&[("min_enrolled", "30")]),
                FilterSpec::sections(),
                &no_ctx(),
            )
            .unwrap(),
            &bag(&[("subject", "BIOL,CHEM")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();

        assert_eq!(ab, a_then_b);
        assert_eq!(ab, b_then_a);
    }

    #[test]
    fn min_and_max_bounds_compose() {
        let batch = sample();
        let bounded = filter(
            &batch,
            &bag(&[("min_enrolled", "28"), ("max_enrolled", "35")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        let enrolled: Vec<i64> = table::as_i64(
            &bounded,
            table::index_of(&bounded, "enrolled").unwrap(),
        )
        .unwrap()
        .iter()
        .flatten()
        .collect();
        assert_eq!(enrolled, vec![30, 35, 28]);
    }

    #[test]
    fn cross_list_home_keeps_primary_and_ungrouped() {
        let batch = sample();

        let home = filter(
            &batch,
            &bag(&[("xlist", "home")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        // Three ungrouped rows plus the primary of group X1.
        assert_eq!(home.num_rows(), 4);

        let excluded = filter(
            &batch,
            &bag(&[("xlist", "exclude")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        assert_eq!(excluded.num_rows(), 3);

        let err = filter(
            &batch,
            &bag(&[("xlist", "both")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::UnknownCrossListMode { mode } if mode == "both"));
    }

    #[test]
    fn exclusion_list_matches_normalized_ids() {
        let batch = sample();
        let ctx = FilterContext {
            exclusions: Some(
                ["  BIOL   1010  ", "chem3011"]
                    .iter()
                    .map(|s| normalize_course_id(s))
                    .collect(),
            ),
        };

        let out = filter(
            &batch,
            &bag(&[("exclude_courses", "true")]),
            FilterSpec::sections(),
            &ctx,
        )
        .unwrap();
        // "BIOL1010" does not squeeze to "biol 1010"; only CHEM3011 drops.
        assert_eq!(out.num_rows(), 4);

        // No list maintained: the option is a no-op.
        let untouched = filter(
            &batch,
            &bag(&[("exclude_courses", "true")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap();
        assert_eq!(untouched.num_rows(), 5);
    }

    #[test]
    fn exclusion_list_loads_normalized() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("excluded.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# retired offerings\nBIOL  1010\n\nchem3011").unwrap();

        let ctx = FilterContext::load(Some(&path)).unwrap();
        let set = ctx.exclusions.unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("biol 1010"));
        assert!(set.contains("chem3011"));

        assert!(FilterContext::load(None).unwrap().exclusions.is_none());
    }

    #[test]
    fn unknown_option_and_column_are_caller_errors() {
        let batch = sample();

        let err = filter(
            &batch,
            &bag(&[("campus", "north")]),
            FilterSpec::sections(),
            &no_ctx(),
        )
        .unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::UnknownFilterOption { option } if option == "campus"));

        // The enrollments spec targets a `grade` column this table lacks.
        let err = filter(
            &batch,
            &bag(&[("grade", "A")]),
            FilterSpec::enrollments(),
            &no_ctx(),
        )
        .unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::UnknownColumn { column, .. } if column == "grade"));
    }
}
