//! Type-checking a `Filter` against a column encoding.

use super::predicate::{Predicate, RangePredicate, TypedPredicate};
use super::{Comparison, Filter};
use crate::error::{Error, Result};
use crate::storage::{Encoding, EncodingFamily, Value, MAX_ALPHANUMERIC_LEN};

/// A filter whose operands were checked against one encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundFilter {
    encoding: Encoding,
    predicate: TypedPredicate,
}

impl Filter {
    /// Type-checks the filter for `encoding` and compiles it.
    ///
    /// Single-element `In` sets compile to an equality test and duplicate set
    /// members are dropped. Float operands for 4-byte columns are narrowed to
    /// the stored precision.
    ///
    /// # Errors
    ///
    /// - `Error::TypeMismatch` if an operand belongs to another family.
    /// - `Error::InvalidValue` for null, NaN, out-of-range, empty or
    ///   over-long operands.
    /// - `Error::InvalidArgument` for empty sets, empty comparisons and
    ///   inverted `between` bounds.
    pub fn bind(&self, encoding: Encoding) -> Result<BoundFilter> {
        let predicate = match encoding.family() {
            EncodingFamily::Integer => {
                TypedPredicate::Int(compile(self, &|v: &Value| int_operand(v, encoding))?)
            }
            EncodingFamily::Float => {
                TypedPredicate::Float(compile(self, &|v: &Value| float_operand(v, encoding))?)
            }
            EncodingFamily::Text => TypedPredicate::Text(compile(self, &text_operand)?),
        };
        Ok(BoundFilter {
            encoding,
            predicate,
        })
    }
}

impl BoundFilter {
    /// Encoding the filter was bound to.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// True for the plain not-null scan.
    #[must_use]
    pub fn is_not_null(&self) -> bool {
        matches!(
            self.predicate,
            TypedPredicate::Int(Predicate::NotNull)
                | TypedPredicate::Float(Predicate::NotNull)
                | TypedPredicate::Text(Predicate::NotNull)
        )
    }

    pub(crate) const fn predicate(&self) -> &TypedPredicate {
        &self.predicate
    }

    /// Evaluates the filter against a decoded value.
    ///
    /// Null and values of another family never match.
    #[must_use]
    pub fn matches_value(&self, value: &Value) -> bool {
        match (&self.predicate, value) {
            (TypedPredicate::Int(p), Value::Int(v)) => p.matches(*v),
            (TypedPredicate::Float(p), Value::Float(v)) if !v.is_nan() => {
                let stored = if self.encoding == Encoding::Float {
                    f64::from(*v as f32)
                } else {
                    *v
                };
                p.matches(stored)
            }
            (TypedPredicate::Text(p), Value::Text(s)) if !s.is_empty() => p.matches(s.as_bytes()),
            _ => false,
        }
    }
}

fn compile<T, F>(filter: &Filter, operand: &F) -> Result<Predicate<T>>
where
    T: PartialOrd,
    F: Fn(&Value) -> Result<T>,
{
    match filter {
        Filter::In(values) => {
            let mut set = operand_set(values, operand)?;
            if set.len() == 1 {
                Ok(Predicate::Eq(set.remove(0)))
            } else {
                Ok(Predicate::In(set))
            }
        }
        Filter::NotIn(values) => Ok(Predicate::NotIn(operand_set(values, operand)?)),
        Filter::Compare(comparison) => Ok(Predicate::Range(compile_range(comparison, operand)?)),
        Filter::Not(inner) => Ok(Predicate::Not(Box::new(compile(inner, operand)?))),
        Filter::NotNull => Ok(Predicate::NotNull),
    }
}

fn operand_set<T, F>(values: &[Value], operand: &F) -> Result<Vec<T>>
where
    T: PartialEq,
    F: Fn(&Value) -> Result<T>,
{
    if values.is_empty() {
        return Err(Error::InvalidArgument(
            "membership filter needs at least one value".to_string(),
        ));
    }
    let mut set = Vec::with_capacity(values.len());
    for value in values {
        let v = operand(value)?;
        if !set.contains(&v) {
            set.push(v);
        }
    }
    Ok(set)
}

fn compile_range<T, F>(comparison: &Comparison, operand: &F) -> Result<RangePredicate<T>>
where
    T: PartialOrd,
    F: Fn(&Value) -> Result<T>,
{
    if comparison.is_empty() {
        return Err(Error::InvalidArgument(
            "comparison filter has no bounds".to_string(),
        ));
    }

    let lower = comparison
        .lower
        .as_ref()
        .map(|b| operand(&b.value).map(|v| (v, b.inclusive)))
        .transpose()?;
    let upper = comparison
        .upper
        .as_ref()
        .map(|b| operand(&b.value).map(|v| (v, b.inclusive)))
        .transpose()?;
    let between = match &comparison.between {
        Some((lo, hi)) => {
            let lo_v = operand(lo)?;
            let hi_v = operand(hi)?;
            if lo_v > hi_v {
                return Err(Error::InvalidArgument(format!(
                    "between bounds are inverted: {lo} > {hi}"
                )));
            }
            Some((lo_v, hi_v))
        }
        None => None,
    };

    Ok(RangePredicate {
        lower,
        upper,
        between,
    })
}

fn null_operand() -> Error {
    Error::InvalidValue("null cannot be a filter operand, use NotNull".to_string())
}

fn int_operand(value: &Value, encoding: Encoding) -> Result<i64> {
    match value {
        Value::Int(v) => {
            let (lo, hi) = encoding.int_range().unwrap_or((i64::MIN, i64::MAX));
            if (lo..=hi).contains(v) {
                Ok(*v)
            } else {
                Err(Error::InvalidValue(format!(
                    "operand {v} is outside the {encoding:?} range [{lo}, {hi}]"
                )))
            }
        }
        Value::Null => Err(null_operand()),
        other => Err(Error::type_mismatch("integer", other.type_name())),
    }
}

fn float_operand(value: &Value, encoding: Encoding) -> Result<f64> {
    match value {
        Value::Float(v) if v.is_nan() => {
            Err(Error::InvalidValue("NaN is not a valid operand".to_string()))
        }
        Value::Float(v) if encoding == Encoding::Float => {
            let narrowed = *v as f32;
            if v.is_finite() && !narrowed.is_finite() {
                return Err(Error::InvalidValue(format!(
                    "operand {v} overflows a 4-byte float"
                )));
            }
            Ok(f64::from(narrowed))
        }
        Value::Float(v) => Ok(*v),
        Value::Null => Err(null_operand()),
        other => Err(Error::type_mismatch("float", other.type_name())),
    }
}

fn text_operand(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Text(s) if s.is_empty() => Err(Error::InvalidValue(
            "empty text is reserved for null".to_string(),
        )),
        Value::Text(s) if s.len() > MAX_ALPHANUMERIC_LEN => Err(Error::InvalidValue(format!(
            "operand of {} bytes exceeds {MAX_ALPHANUMERIC_LEN}",
            s.len()
        ))),
        Value::Text(s) => Ok(s.as_bytes().to_vec()),
        Value::Null => Err(null_operand()),
        other => Err(Error::type_mismatch("text", other.type_name())),
    }
}
