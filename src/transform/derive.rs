// src/transform/derive.rs
//
// Derived-column computations shared by the projections. The period code
// convention (six digits, last two = term kind) is also what the query
// engine's season filter keys on, so the codes live here.

use arrow::array::{Array, BooleanArray, Int64Array, Int64Builder, StringArray};
use once_cell::sync::Lazy;
use regex::Regex;

pub const SPRING_CODE: i64 = 10;
pub const SUMMER_CODE: i64 = 60;
pub const FALL_CODE: i64 = 80;

/// Last two digits of a six-digit period code.
pub fn term_code(period: i64) -> i64 {
    period.rem_euclid(100)
}

/// Term-type label for a period code: 10 → spring, 60 → summer, 80 → fall,
/// anything else → unknown.
pub fn term_type_label(period: i64) -> &'static str {
    match term_code(period) {
        SPRING_CODE => "spring",
        SUMMER_CODE => "summer",
        FALL_CODE => "fall",
        _ => "unknown",
    }
}

pub fn term_type(periods: &Int64Array) -> StringArray {
    periods
        .iter()
        .map(|p| p.map(term_type_label))
        .collect()
}

/// Course level tier from the numeric course number: below 300 → lower,
/// 300–499 → upper, 500 and above → graduate.
pub fn course_level(numbers: &Int64Array) -> StringArray {
    numbers
        .iter()
        .map(|n| {
            n.map(|v| {
                if v < 300 {
                    "lower"
                } else if v < 500 {
                    "upper"
                } else {
                    "graduate"
                }
            })
        })
        .collect()
}

// Lab sections carry a trailing letter after the course number, e.g.
// BIOL1010L.
static LAB_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9][A-Za-z]$").expect("valid lab suffix pattern"));

pub fn lab_flag(course_ids: &StringArray) -> BooleanArray {
    course_ids
        .iter()
        .map(|id| id.map(|v| LAB_SUFFIX.is_match(v.trim())))
        .collect()
}

/// Seats still open: the direct column when the extract carries one,
/// otherwise capacity minus enrolled. Nulls propagate.
pub fn availability(
    direct: Option<&Int64Array>,
    capacity: &Int64Array,
    enrolled: &Int64Array,
) -> Int64Array {
    if let Some(direct) = direct {
        return direct.clone();
    }
    let mut builder = Int64Builder::new();
    for i in 0..capacity.len() {
        if capacity.is_null(i) || enrolled.is_null(i) {
            builder.append_null();
        } else {
            builder.append_value(capacity.value(i) - enrolled.value(i));
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn level_thresholds() {
        let nums = Int64Array::from(vec![Some(299), Some(300), Some(499), Some(500), None]);
        let levels = course_level(&nums);
        assert_eq!(levels.value(0), "lower");
        assert_eq!(levels.value(1), "upper");
        assert_eq!(levels.value(2), "upper");
        assert_eq!(levels.value(3), "graduate");
        assert!(levels.is_null(4));
    }

    #[test]
    fn term_type_by_last_two_digits() {
        let periods = Int64Array::from(vec![Some(202310), Some(202360), Some(202280), Some(202399)]);
        let labels = term_type(&periods);
        assert_eq!(labels.value(0), "spring");
        assert_eq!(labels.value(1), "summer");
        assert_eq!(labels.value(2), "fall");
        assert_eq!(labels.value(3), "unknown");
    }

    #[test]
    fn lab_flag_requires_trailing_letter_after_digit() {
        let ids = StringArray::from(vec![Some("BIOL1010L"), Some("BIOL1010"), Some("CHEM20b"), None]);
        let flags = lab_flag(&ids);
        assert!(flags.value(0));
        assert!(!flags.value(1));
        assert!(flags.value(2));
        assert!(flags.is_null(3));
    }

    #[test]
    fn availability_prefers_direct_then_computes() {
        let capacity = Int64Array::from(vec![Some(30), Some(30), None]);
        let enrolled = Int64Array::from(vec![Some(25), None, Some(10)]);

        let computed = availability(None, &capacity, &enrolled);
        assert_eq!(computed.value(0), 5);
        assert!(computed.is_null(1));
        assert!(computed.is_null(2));

        let direct = Int64Array::from(vec![Some(7), Some(8), Some(9)]);
        let taken = availability(Some(&direct), &capacity, &enrolled);
        assert_eq!(taken.value(1), 8);
    }
}
