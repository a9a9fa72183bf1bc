//! Typed predicates evaluated per record.

use std::cmp::Ordering;

/// Disjunctive comparison over one operand type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RangePredicate<T> {
    pub(crate) lower: Option<(T, bool)>,
    pub(crate) upper: Option<(T, bool)>,
    pub(crate) between: Option<(T, T)>,
}

impl<T> RangePredicate<T> {
    /// `cmp(bound)` orders the record against `bound`; `None` never matches.
    #[inline]
    pub(crate) fn matches_with<C>(&self, cmp: &C) -> bool
    where
        C: Fn(&T) -> Option<Ordering>,
    {
        if let Some((bound, inclusive)) = &self.lower {
            match cmp(bound) {
                Some(Ordering::Greater) => return true,
                Some(Ordering::Equal) if *inclusive => return true,
                _ => {}
            }
        }
        if let Some((bound, inclusive)) = &self.upper {
            match cmp(bound) {
                Some(Ordering::Less) => return true,
                Some(Ordering::Equal) if *inclusive => return true,
                _ => {}
            }
        }
        if let Some((lo, hi)) = &self.between {
            return matches!(cmp(lo), Some(Ordering::Greater | Ordering::Equal))
                && matches!(cmp(hi), Some(Ordering::Less | Ordering::Equal));
        }
        false
    }
}

/// Compiled predicate over one operand type. Null handling is the caller's.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate<T> {
    Eq(T),
    In(Vec<T>),
    NotIn(Vec<T>),
    Range(RangePredicate<T>),
    Not(Box<Predicate<T>>),
    NotNull,
}

impl<T> Predicate<T> {
    #[inline]
    pub(crate) fn matches_with<E, C>(&self, eq: &E, cmp: &C) -> bool
    where
        E: Fn(&T) -> bool,
        C: Fn(&T) -> Option<Ordering>,
    {
        match self {
            Self::Eq(target) => eq(target),
            Self::In(set) => set.iter().any(eq),
            Self::NotIn(set) => !set.iter().any(eq),
            Self::Range(range) => range.matches_with(cmp),
            Self::Not(inner) => !inner.matches_with(eq, cmp),
            Self::NotNull => true,
        }
    }
}

impl Predicate<i64> {
    #[inline]
    pub(crate) fn matches(&self, v: i64) -> bool {
        self.matches_with(&|t: &i64| (v ^ *t) == 0, &|t: &i64| Some(v.cmp(t)))
    }
}

impl Predicate<f64> {
    #[inline]
    #[allow(clippy::float_cmp)]
    pub(crate) fn matches(&self, v: f64) -> bool {
        self.matches_with(&|t: &f64| v == *t, &|t: &f64| v.partial_cmp(t))
    }
}

impl Predicate<Vec<u8>> {
    /// `v` is the non-empty payload of a text record.
    #[inline]
    pub(crate) fn matches(&self, v: &[u8]) -> bool {
        self.matches_with(&|t: &Vec<u8>| text_eq(v, t), &|t: &Vec<u8>| {
            Some(v.cmp(t.as_slice()))
        })
    }
}

/// Byte equality with a length, first-byte and last-byte short circuit.
///
/// Both slices must be non-empty.
#[inline]
pub(crate) fn text_eq(record: &[u8], target: &[u8]) -> bool {
    let n = record.len();
    n == target.len() && record[0] == target[0] && record[n - 1] == target[n - 1] && record == target
}

/// Predicate compiled for one encoding family.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypedPredicate {
    Int(Predicate<i64>),
    Float(Predicate<f64>),
    Text(Predicate<Vec<u8>>),
}
