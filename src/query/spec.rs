// src/query/spec.rs
//
// Declarative filter specs. Each rule binds a public option name to a
// target column and a filter kind; the kind is a closed enum resolved by
// exhaustive match, so a special-cased option differs from a default
// membership filter only in which kind its rule carries.

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Default: comma-split the value, keep rows whose column is a member.
    Membership,
    /// The target column legitimately contains commas (free-text titles);
    /// the raw value is matched whole.
    Verbatim,
    /// Period codes: dash ranges, open bounds, and season names.
    Term,
    /// Integer lower bound (inclusive).
    MinBound,
    /// Integer upper bound (inclusive).
    MaxBound,
    /// Cross-listing resolution; needs the primary-flag column too.
    CrossList { primary_column: &'static str },
    /// When truthy, drop rows on the maintained course exclusion list.
    Exclusion,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterRule {
    pub option: &'static str,
    pub column: &'static str,
    pub kind: FilterKind,
}

const fn rule(option: &'static str, column: &'static str, kind: FilterKind) -> FilterRule {
    FilterRule {
        option,
        column,
        kind,
    }
}

/// An ordered set of filter rules for one record type.
pub struct FilterSpec {
    rules: Vec<FilterRule>,
}

impl FilterSpec {
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn rule(&self, option: &str) -> Option<&FilterRule> {
        self.rules.iter().find(|r| r.option == option)
    }

    /// Rules for section-level tables.
    pub fn sections() -> &'static FilterSpec {
        &SECTIONS
    }

    /// Rules for enrollment-level tables.
    pub fn enrollments() -> &'static FilterSpec {
        &ENROLLMENTS
    }
}

static SECTIONS: Lazy<FilterSpec> = Lazy::new(|| FilterSpec {
    rules: vec![
        rule("term", "term", FilterKind::Term),
        rule("subject", "subject", FilterKind::Membership),
        rule("level", "level", FilterKind::Membership),
        rule("department", "department", FilterKind::Membership),
        rule("title", "title", FilterKind::Verbatim),
        rule("min_enrolled", "enrolled", FilterKind::MinBound),
        rule("max_enrolled", "enrolled", FilterKind::MaxBound),
        rule(
            "xlist",
            "xlist_group",
            FilterKind::CrossList {
                primary_column: "xlist_primary",
            },
        ),
        rule("exclude_courses", "course_id", FilterKind::Exclusion),
    ],
});

static ENROLLMENTS: Lazy<FilterSpec> = Lazy::new(|| FilterSpec {
    rules: vec![
        rule("term", "term", FilterKind::Term),
        rule("subject", "subject", FilterKind::Membership),
        rule("level", "level", FilterKind::Membership),
        rule("grade", "grade", FilterKind::Membership),
        rule("student", "student_id", FilterKind::Membership),
        rule("min_credits", "credits", FilterKind::MinBound),
        rule("max_credits", "credits", FilterKind::MaxBound),
        rule("exclude_courses", "course_id", FilterKind::Exclusion),
    ],
});
