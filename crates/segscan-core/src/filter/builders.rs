//! Builder methods for creating filters and comparisons.

use super::{Bound, Comparison, Filter};
use crate::storage::Value;

impl Filter {
    /// Single-value equality.
    #[must_use]
    pub fn eq(value: impl Into<Value>) -> Self {
        Self::In(vec![value.into()])
    }

    /// Membership in a set.
    #[must_use]
    pub fn in_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(values.into_iter().map(Into::into).collect())
    }

    /// Exclusion from a set.
    #[must_use]
    pub fn not_in<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::NotIn(values.into_iter().map(Into::into).collect())
    }

    /// Wraps a comparison.
    #[must_use]
    pub fn compare(comparison: Comparison) -> Self {
        Self::Compare(comparison)
    }

    /// `x > value`.
    #[must_use]
    pub fn gt(value: impl Into<Value>) -> Self {
        Self::Compare(Comparison::gt(value))
    }

    /// `x >= value`.
    #[must_use]
    pub fn gte(value: impl Into<Value>) -> Self {
        Self::Compare(Comparison::gte(value))
    }

    /// `x < value`.
    #[must_use]
    pub fn lt(value: impl Into<Value>) -> Self {
        Self::Compare(Comparison::lt(value))
    }

    /// `x <= value`.
    #[must_use]
    pub fn lte(value: impl Into<Value>) -> Self {
        Self::Compare(Comparison::lte(value))
    }

    /// `lo <= x <= hi`.
    #[must_use]
    pub fn between(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self::Compare(Comparison::between(lo, hi))
    }

    /// Every non-null record.
    #[must_use]
    pub const fn not_null() -> Self {
        Self::NotNull
    }

    /// Complement over non-null records.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl Comparison {
    /// `x > value`.
    #[must_use]
    pub fn gt(value: impl Into<Value>) -> Self {
        Self::default().or_gt(value)
    }

    /// `x >= value`.
    #[must_use]
    pub fn gte(value: impl Into<Value>) -> Self {
        Self::default().or_gte(value)
    }

    /// `x < value`.
    #[must_use]
    pub fn lt(value: impl Into<Value>) -> Self {
        Self::default().or_lt(value)
    }

    /// `x <= value`.
    #[must_use]
    pub fn lte(value: impl Into<Value>) -> Self {
        Self::default().or_lte(value)
    }

    /// `lo <= x <= hi`.
    #[must_use]
    pub fn between(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self::default().or_between(lo, hi)
    }

    /// Adds (or replaces) the lower bound as `> value`.
    #[must_use]
    pub fn or_gt(mut self, value: impl Into<Value>) -> Self {
        self.lower = Some(Bound {
            value: value.into(),
            inclusive: false,
        });
        self
    }

    /// Adds (or replaces) the lower bound as `>= value`.
    #[must_use]
    pub fn or_gte(mut self, value: impl Into<Value>) -> Self {
        self.lower = Some(Bound {
            value: value.into(),
            inclusive: true,
        });
        self
    }

    /// Adds (or replaces) the upper bound as `< value`.
    #[must_use]
    pub fn or_lt(mut self, value: impl Into<Value>) -> Self {
        self.upper = Some(Bound {
            value: value.into(),
            inclusive: false,
        });
        self
    }

    /// Adds (or replaces) the upper bound as `<= value`.
    #[must_use]
    pub fn or_lte(mut self, value: impl Into<Value>) -> Self {
        self.upper = Some(Bound {
            value: value.into(),
            inclusive: true,
        });
        self
    }

    /// Adds (or replaces) the inclusive range.
    #[must_use]
    pub fn or_between(mut self, lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        self.between = Some((lo.into(), hi.into()));
        self
    }

    /// True when no component is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lower.is_none() && self.upper.is_none() && self.between.is_none()
    }
}

impl From<Comparison> for Filter {
    fn from(comparison: Comparison) -> Self {
        Self::Compare(comparison)
    }
}
