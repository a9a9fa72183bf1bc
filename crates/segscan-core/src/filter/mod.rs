//! Column predicates.
//!
//! A [`Filter`] is written against [`Value`]s and is independent of any
//! column. Binding it to an [`Encoding`](crate::storage::Encoding) type-checks every operand once and
//! compiles it into a [`BoundFilter`] whose typed predicate the scanner runs
//! per record.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segscan_core::filter::{Comparison, Filter};
//!
//! let f = Filter::in_values([3, 7]);
//! let g = Filter::compare(Comparison::gt(100).or_lt(10).or_between(40, 50));
//! let bound = g.bind(segscan_core::storage::Encoding::Int)?;
//! ```
//!
//! Null records never match a filter, including `NotIn` and `Not`.

mod binding;
mod builders;
mod predicate;

pub use binding::BoundFilter;
pub(crate) use predicate::{text_eq, Predicate, TypedPredicate};

use serde::{Deserialize, Serialize};

use crate::storage::Value;

/// A one-sided comparison bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    /// Operand.
    pub value: Value,
    /// Whether equality satisfies the bound.
    pub inclusive: bool,
}

/// Disjunction of up to three comparison forms.
///
/// A record matches when it is above `lower`, below `upper`, or inside
/// `between` (inclusive). At least one component must be present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Comparison {
    /// `> v` or `>= v`.
    pub lower: Option<Bound>,
    /// `< v` or `<= v`.
    pub upper: Option<Bound>,
    /// `lo <= x <= hi`.
    pub between: Option<(Value, Value)>,
}

/// A predicate over one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Record equals one of the values.
    In(Vec<Value>),
    /// Record equals none of the values.
    NotIn(Vec<Value>),
    /// Disjunctive comparison.
    Compare(Comparison),
    /// Complement of the inner filter, over non-null records.
    Not(Box<Filter>),
    /// Every non-null record.
    NotNull,
}
