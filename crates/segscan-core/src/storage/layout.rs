//! Slot codec: how one `Value` maps onto `element_width` bytes.

use super::format::{Encoding, EncodingFamily, SegmentKind, SegmentSpec};
use super::value::{NullSentinels, Value};
use crate::error::{Error, Result};

/// Physical layout of one column, resolved against the configured sentinels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnLayout {
    /// Column role.
    pub kind: SegmentKind,
    /// Record encoding.
    pub encoding: Encoding,
    /// Bytes per slot.
    pub width: usize,
    /// Decimal scale for scaled integer facts.
    pub decimal_scale: u16,
    null_int: i64,
    null_float: f64,
}

impl ColumnLayout {
    /// Resolves the layout of a validated spec.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configured dimension sentinel does not
    /// fit the column's integer width.
    pub fn new(spec: &SegmentSpec, nulls: &NullSentinels) -> Result<Self> {
        let (null_int, null_float) = match (spec.kind, spec.encoding) {
            (SegmentKind::Dimension, encoding) => {
                let (lo, hi) = encoding.int_range().unwrap_or((i64::MIN, i64::MAX));
                if !(lo..=hi).contains(&nulls.dimension) {
                    return Err(Error::Config(format!(
                        "dimension null sentinel {} does not fit {encoding:?}",
                        nulls.dimension
                    )));
                }
                (nulls.dimension, 0.0)
            }
            (SegmentKind::Fact, Encoding::Byte) => (i64::from(nulls.byte), 0.0),
            (SegmentKind::Fact, Encoding::Short) => (i64::from(nulls.short), 0.0),
            (SegmentKind::Fact, Encoding::Int) => (i64::from(nulls.int), 0.0),
            (SegmentKind::Fact, Encoding::Long) => (nulls.long, 0.0),
            (SegmentKind::Fact, Encoding::Float) => (0, f64::from(nulls.float)),
            (SegmentKind::Fact, Encoding::Double) => (0, nulls.double),
            (SegmentKind::Fact, Encoding::Alphanumeric) => (0, 0.0),
        };

        Ok(Self {
            kind: spec.kind,
            encoding: spec.encoding,
            width: spec.element_width as usize,
            decimal_scale: spec.decimal_scale,
            null_int,
            null_float,
        })
    }

    /// Integer null sentinel (integer encodings only).
    #[must_use]
    pub const fn null_int(&self) -> i64 {
        self.null_int
    }

    /// Float null sentinel (float encodings only).
    #[must_use]
    pub const fn null_float(&self) -> f64 {
        self.null_float
    }

    /// Writes the null representation into `slot`.
    pub fn write_null(&self, slot: &mut [u8]) {
        match self.encoding {
            Encoding::Alphanumeric => slot.fill(0),
            Encoding::Float => write_f32(slot, self.null_float as f32),
            Encoding::Double => write_f64(slot, self.null_float),
            _ => write_int(slot, self.null_int, self.width),
        }
    }

    /// True when freshly allocated zero bytes would not already read as null.
    #[must_use]
    pub fn null_is_nonzero(&self) -> bool {
        let mut slot = vec![0u8; self.width];
        self.write_null(&mut slot);
        slot.iter().any(|&b| b != 0)
    }

    /// A whole slot filled with the null representation.
    #[must_use]
    pub fn null_slot(&self) -> Vec<u8> {
        let mut slot = vec![0u8; self.width];
        self.write_null(&mut slot);
        slot
    }

    /// Decodes one slot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` when an alphanumeric prefix overruns the slot
    /// or the payload is not UTF-8.
    pub fn decode(&self, slot: &[u8]) -> Result<Value> {
        match self.encoding.family() {
            EncodingFamily::Integer => {
                let v = read_int(slot, self.width);
                Ok(if v == self.null_int {
                    Value::Null
                } else {
                    Value::Int(v)
                })
            }
            EncodingFamily::Float => {
                let v = if self.encoding == Encoding::Float {
                    f64::from(read_f32(slot))
                } else {
                    read_f64(slot)
                };
                Ok(if v.to_bits() == self.null_float.to_bits() {
                    Value::Null
                } else {
                    Value::Float(v)
                })
            }
            EncodingFamily::Text => {
                let len = usize::from(slot[0]);
                if len == 0 {
                    return Ok(Value::Null);
                }
                let payload = slot.get(1..=len).ok_or_else(|| {
                    Error::Format(format!(
                        "alphanumeric length {len} overruns slot width {}",
                        self.width
                    ))
                })?;
                let text = std::str::from_utf8(payload)
                    .map_err(|e| Error::Format(format!("alphanumeric payload: {e}")))?;
                Ok(Value::Text(text.to_string()))
            }
        }
    }

    /// Validates and encodes `value` into `slot`.
    ///
    /// # Errors
    ///
    /// See [`ColumnLayout::check_value`].
    pub fn encode(&self, value: &Value, slot: &mut [u8]) -> Result<()> {
        self.check_value(value)?;
        match value {
            Value::Null => self.write_null(slot),
            Value::Int(v) => write_int(slot, *v, self.width),
            Value::Float(v) => {
                if self.encoding == Encoding::Float {
                    write_f32(slot, *v as f32);
                } else {
                    write_f64(slot, *v);
                }
            }
            Value::Text(text) => {
                slot.fill(0);
                slot[0] = text.len() as u8;
                slot[1..=text.len()].copy_from_slice(text.as_bytes());
            }
        }
        Ok(())
    }

    /// Checks that `value` can be stored as an explicit value.
    ///
    /// # Errors
    ///
    /// - `Error::TypeMismatch` when the value family differs from the column.
    /// - `Error::InvalidValue` when the value is out of range, equals the null
    ///   sentinel, is NaN, or is text that is empty or longer than the slot.
    pub fn check_value(&self, value: &Value) -> Result<()> {
        let family = self.encoding.family();
        match (family, value) {
            (_, Value::Null) => Ok(()),
            (EncodingFamily::Integer, Value::Int(v)) => {
                let (lo, hi) = self.encoding.int_range().unwrap_or((i64::MIN, i64::MAX));
                if !(lo..=hi).contains(v) {
                    return Err(Error::InvalidValue(format!(
                        "{v} is outside the {:?} range [{lo}, {hi}]",
                        self.encoding
                    )));
                }
                if *v == self.null_int {
                    return Err(Error::InvalidValue(format!(
                        "{v} is the null sentinel of this column"
                    )));
                }
                Ok(())
            }
            (EncodingFamily::Float, Value::Float(v)) => {
                if v.is_nan() {
                    return Err(Error::InvalidValue("NaN cannot be stored".to_string()));
                }
                let stored = if self.encoding == Encoding::Float {
                    let narrowed = *v as f32;
                    if v.is_finite() && !narrowed.is_finite() {
                        return Err(Error::InvalidValue(format!(
                            "{v} overflows a 4-byte float"
                        )));
                    }
                    f64::from(narrowed)
                } else {
                    *v
                };
                if stored.to_bits() == self.null_float.to_bits() {
                    return Err(Error::InvalidValue(format!(
                        "{v} is the null sentinel of this column"
                    )));
                }
                Ok(())
            }
            (EncodingFamily::Text, Value::Text(text)) => {
                if text.is_empty() {
                    return Err(Error::InvalidValue(
                        "empty text is reserved for null".to_string(),
                    ));
                }
                if text.len() > self.width - 1 {
                    return Err(Error::InvalidValue(format!(
                        "text of {} bytes exceeds slot capacity {}",
                        text.len(),
                        self.width - 1
                    )));
                }
                Ok(())
            }
            (family, other) => Err(Error::type_mismatch(family.to_string(), other.type_name())),
        }
    }
}

/// Converts a decimal to its scaled integer representation.
///
/// # Errors
///
/// Returns `Error::InvalidValue` for non-finite input or when the scaled
/// result does not fit in `i64`.
pub fn scale_decimal(value: f64, scale: u16) -> Result<i64> {
    if !value.is_finite() {
        return Err(Error::InvalidValue(format!("{value} is not a finite decimal")));
    }
    let scaled = (value * 10f64.powi(i32::from(scale))).round();
    if scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
        return Err(Error::InvalidValue(format!(
            "{value} at scale {scale} overflows i64"
        )));
    }
    Ok(scaled as i64)
}

/// Converts a scaled integer back to its decimal value.
#[must_use]
pub fn unscale_decimal(value: i64, scale: u16) -> f64 {
    value as f64 / 10f64.powi(i32::from(scale))
}

// Little-endian slot primitives shared with the scanner.

#[inline]
pub(crate) fn read_int(slot: &[u8], width: usize) -> i64 {
    match width {
        1 => i64::from(slot[0] as i8),
        2 => i64::from(i16::from_le_bytes([slot[0], slot[1]])),
        4 => i64::from(i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])),
        _ => i64::from_le_bytes([
            slot[0], slot[1], slot[2], slot[3], slot[4], slot[5], slot[6], slot[7],
        ]),
    }
}

#[inline]
pub(crate) fn write_int(slot: &mut [u8], v: i64, width: usize) {
    slot[..width].copy_from_slice(&v.to_le_bytes()[..width]);
}

#[inline]
pub(crate) fn read_f32(slot: &[u8]) -> f32 {
    f32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])
}

#[inline]
pub(crate) fn read_f64(slot: &[u8]) -> f64 {
    f64::from_le_bytes([
        slot[0], slot[1], slot[2], slot[3], slot[4], slot[5], slot[6], slot[7],
    ])
}

#[inline]
fn write_f32(slot: &mut [u8], v: f32) {
    slot[..4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn write_f64(slot: &mut [u8], v: f64) {
    slot[..8].copy_from_slice(&v.to_le_bytes());
}

/// Fixed-width integer slot reader, monomorphized per width by the scanner.
pub(crate) trait IntRecord {
    const WIDTH: usize;
    fn read(slot: &[u8]) -> i64;
}

/// Fixed-width float slot reader.
pub(crate) trait FloatRecord {
    const WIDTH: usize;
    fn read(slot: &[u8]) -> f64;
}

pub(crate) struct I8;
pub(crate) struct I16;
pub(crate) struct I32;
pub(crate) struct I64;
pub(crate) struct F32;
pub(crate) struct F64;

impl IntRecord for I8 {
    const WIDTH: usize = 1;
    #[inline(always)]
    fn read(slot: &[u8]) -> i64 {
        i64::from(slot[0] as i8)
    }
}

impl IntRecord for I16 {
    const WIDTH: usize = 2;
    #[inline(always)]
    fn read(slot: &[u8]) -> i64 {
        i64::from(i16::from_le_bytes([slot[0], slot[1]]))
    }
}

impl IntRecord for I32 {
    const WIDTH: usize = 4;
    #[inline(always)]
    fn read(slot: &[u8]) -> i64 {
        i64::from(i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]))
    }
}

impl IntRecord for I64 {
    const WIDTH: usize = 8;
    #[inline(always)]
    fn read(slot: &[u8]) -> i64 {
        read_int(slot, 8)
    }
}

impl FloatRecord for F32 {
    const WIDTH: usize = 4;
    #[inline(always)]
    fn read(slot: &[u8]) -> f64 {
        f64::from(read_f32(slot))
    }
}

impl FloatRecord for F64 {
    const WIDTH: usize = 8;
    #[inline(always)]
    fn read(slot: &[u8]) -> f64 {
        read_f64(slot)
    }
}
