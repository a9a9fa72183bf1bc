//! Column scanner: evaluates a bound filter over a record range of one
//! segment and sets one bit per matching position.
//!
//! The range is mapped read-only and walked once. Each encoding gets its own
//! monomorphized loop, and single-value equality gets a dedicated loop
//! before the general predicate path. Scans into a shared [`BitVector`] only
//! touch the bits of their own range, so partitioned scans of one column
//! need no coordination beyond joining.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::bitvec::BitVector;
use crate::error::{Error, Result};
use crate::filter::{text_eq, BoundFilter, Predicate, TypedPredicate};
use crate::metrics::EngineMetrics;
use crate::storage::{
    Encoding, FloatRecord, IntRecord, Segment, F32, F64, I16, I32, I64, I8,
};
use crate::writer::DatasetLocks;

/// Inclusive range of 1-based record positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordRange {
    /// First position.
    pub low: u32,
    /// Last position.
    pub high: u32,
}

impl RecordRange {
    /// Range `low..=high`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` unless `1 <= low <= high`.
    pub fn new(low: u32, high: u32) -> Result<Self> {
        if low == 0 || low > high {
            return Err(Error::Range(format!(
                "invalid record range [{low}, {high}]"
            )));
        }
        Ok(Self { low, high })
    }

    /// Range `1..=records`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` for an empty segment.
    pub fn all(records: u32) -> Result<Self> {
        Self::new(1, records)
    }

    /// Number of positions; zero for an inverted range.
    #[must_use]
    pub const fn len(&self) -> u32 {
        if self.high < self.low {
            0
        } else {
            (self.high - self.low).saturating_add(1)
        }
    }

    /// False for any range built by `new` or `all`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.high < self.low
    }

    /// True if `position` lies in the range.
    #[must_use]
    pub const fn contains(&self, position: u32) -> bool {
        self.low <= position && position <= self.high
    }

    /// Caps `high` at `records`.
    ///
    /// Rejects ranges that break the `1 <= low <= high` rule of
    /// [`RecordRange::new`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` for an invalid range or when `low` is past the
    /// last record.
    pub fn clamp(self, records: u32) -> Result<Self> {
        Self::new(self.low, self.high)?;
        if self.low > records {
            return Err(Error::Range(format!(
                "range starts at {} but the segment holds {records} records",
                self.low
            )));
        }
        Ok(Self {
            low: self.low,
            high: self.high.min(records),
        })
    }
}

/// What one scan did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    /// Range actually scanned, after clamping.
    pub range: RecordRange,
    /// Records visited.
    pub records: u64,
    /// Bits this scan turned on; bits already set in `out` are not counted.
    pub matches: u64,
    /// Wall time.
    pub elapsed: Duration,
}

/// Scanner over one segment.
#[derive(Debug, Clone, Copy)]
pub struct ColumnScanner<'a> {
    segment: &'a Segment,
    overlay: Option<&'a DatasetLocks>,
    metrics: Option<&'a EngineMetrics>,
}

impl<'a> ColumnScanner<'a> {
    /// Scanner reading committed bytes only.
    #[must_use]
    pub const fn new(segment: &'a Segment) -> Self {
        Self {
            segment,
            overlay: None,
            metrics: None,
        }
    }

    /// Overlays uncommitted values staged in `locks` onto every result.
    #[must_use]
    pub const fn with_overlay(mut self, locks: &'a DatasetLocks) -> Self {
        self.overlay = Some(locks);
        self
    }

    /// Counts scans into `metrics`.
    #[must_use]
    pub const fn with_metrics(mut self, metrics: &'a EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Segment being scanned.
    #[must_use]
    pub const fn segment(&self) -> &'a Segment {
        self.segment
    }

    /// Scans `range` into a fresh vector whose origin is the clamped `low`.
    ///
    /// # Errors
    ///
    /// See [`ColumnScanner::scan_into`].
    pub fn scan(&self, range: RecordRange, filter: &BoundFilter) -> Result<BitVector> {
        let range = range.clamp(self.segment.record_count()?)?;
        let out = BitVector::for_range(range.low, range.high);
        self.scan_into(range, filter, &out)?;
        Ok(out)
    }

    /// Scans `range` into `out`, which may be shared with concurrent scans
    /// of other ranges. Bits are addressed by position, so `out` must cover
    /// the clamped range.
    ///
    /// Bits of non-matching records are left as they are, except where the
    /// overlay turns a match off because of a pending non-null value.
    ///
    /// # Errors
    ///
    /// - `Error::TypeMismatch` if `filter` was bound to another encoding.
    /// - `Error::Range` for an inverted range or one starting past the last
    ///   record.
    /// - `Error::InvalidArgument` if `out` does not cover the range.
    /// - `Error::Io` if the range cannot be mapped.
    /// - `Error::Format` for a corrupt alphanumeric record.
    pub fn scan_into(
        &self,
        range: RecordRange,
        filter: &BoundFilter,
        out: &BitVector,
    ) -> Result<ScanStats> {
        let start = Instant::now();
        let layout = self.segment.layout();
        if filter.encoding() != layout.encoding {
            return Err(Error::type_mismatch(
                format!("{:?}", layout.encoding),
                format!("{:?}", filter.encoding()),
            ));
        }

        let range = range.clamp(self.segment.record_count()?)?;
        if !out.covers(range.low, range.high) {
            return Err(Error::InvalidArgument(format!(
                "bit vector [{}, {}] does not cover [{}, {}]",
                out.origin(),
                out.end(),
                range.low,
                range.high
            )));
        }

        let window = self.segment.map_records(range.low, range.high)?;
        let bytes = window.bytes();
        let base = (range.low - out.origin()) as usize;
        let null_int = layout.null_int();
        let null_bits = layout.null_float().to_bits();

        let mut matches = match (filter.predicate(), layout.encoding) {
            (TypedPredicate::Int(p), Encoding::Byte) => scan_int::<I8>(bytes, base, null_int, p, out),
            (TypedPredicate::Int(p), Encoding::Short) => {
                scan_int::<I16>(bytes, base, null_int, p, out)
            }
            (TypedPredicate::Int(p), Encoding::Int) => scan_int::<I32>(bytes, base, null_int, p, out),
            (TypedPredicate::Int(p), Encoding::Long) => {
                scan_int::<I64>(bytes, base, null_int, p, out)
            }
            (TypedPredicate::Float(p), Encoding::Float) => {
                scan_float::<F32>(bytes, base, null_bits, p, out)
            }
            (TypedPredicate::Float(p), Encoding::Double) => {
                scan_float::<F64>(bytes, base, null_bits, p, out)
            }
            (TypedPredicate::Text(p), Encoding::Alphanumeric) => {
                scan_text(bytes, window.width(), base, p, out)?
            }
            (_, encoding) => {
                return Err(Error::Internal(format!(
                    "predicate family does not fit {encoding:?}"
                )))
            }
        };

        if let Some(locks) = self.overlay {
            matches = apply_overlay(locks, range, filter, out, matches);
        }

        let records = window.len() as u64;
        let elapsed = start.elapsed();
        if let Some(metrics) = self.metrics {
            metrics.record_scan(records);
        }
        debug!(
            dataset = %self.segment.dataset(),
            low = range.low,
            high = range.high,
            matches,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "Scan complete"
        );

        Ok(ScanStats {
            range,
            records,
            matches,
            elapsed,
        })
    }
}

/// Forces bits of locked positions to the verdict on their pending value.
/// Staged deletes leave the committed verdict in place.
fn apply_overlay(
    locks: &DatasetLocks,
    range: RecordRange,
    filter: &BoundFilter,
    out: &BitVector,
    mut matches: u64,
) -> u64 {
    for (position, pending) in locks.pending_in_range(range.low, range.high) {
        if pending.is_null() {
            continue;
        }
        let Some(index) = out.index_of(position) else {
            continue;
        };
        if filter.matches_value(&pending) {
            if !out.set(index) {
                matches += 1;
            }
        } else if out.clear(index) {
            matches = matches.saturating_sub(1);
        }
    }
    matches
}

#[inline]
fn mark(out: &BitVector, index: usize) -> u64 {
    u64::from(!out.set(index))
}

fn scan_int<R: IntRecord>(
    bytes: &[u8],
    base: usize,
    null: i64,
    predicate: &Predicate<i64>,
    out: &BitVector,
) -> u64 {
    let slots = bytes.chunks_exact(R::WIDTH);
    let mut matches = 0;
    match predicate {
        Predicate::Eq(target) => {
            let target = *target;
            if target == null {
                return 0;
            }
            for (i, slot) in slots.enumerate() {
                if (R::read(slot) ^ target) == 0 {
                    matches += mark(out, base + i);
                }
            }
        }
        Predicate::NotNull => {
            for (i, slot) in slots.enumerate() {
                if R::read(slot) != null {
                    matches += mark(out, base + i);
                }
            }
        }
        _ => {
            for (i, slot) in slots.enumerate() {
                let v = R::read(slot);
                if v != null && predicate.matches(v) {
                    matches += mark(out, base + i);
                }
            }
        }
    }
    matches
}

fn scan_float<R: FloatRecord>(
    bytes: &[u8],
    base: usize,
    null_bits: u64,
    predicate: &Predicate<f64>,
    out: &BitVector,
) -> u64 {
    let slots = bytes.chunks_exact(R::WIDTH);
    let mut matches = 0;
    match predicate {
        Predicate::NotNull => {
            for (i, slot) in slots.enumerate() {
                if R::read(slot).to_bits() != null_bits {
                    matches += mark(out, base + i);
                }
            }
        }
        _ => {
            for (i, slot) in slots.enumerate() {
                let v = R::read(slot);
                if v.to_bits() != null_bits && !v.is_nan() && predicate.matches(v) {
                    matches += mark(out, base + i);
                }
            }
        }
    }
    matches
}

fn scan_text(
    bytes: &[u8],
    width: usize,
    base: usize,
    predicate: &Predicate<Vec<u8>>,
    out: &BitVector,
) -> Result<u64> {
    let mut matches = 0;
    for (i, slot) in bytes.chunks_exact(width).enumerate() {
        let len = usize::from(slot[0]);
        if len == 0 {
            continue;
        }
        let payload = slot.get(1..=len).ok_or_else(|| {
            Error::Format(format!(
                "alphanumeric length {len} overruns slot width {width}"
            ))
        })?;
        let hit = match predicate {
            Predicate::Eq(target) => text_eq(payload, target),
            Predicate::NotNull => true,
            _ => predicate.matches(payload),
        };
        if hit {
            matches += mark(out, base + i);
        }
    }
    Ok(matches)
}
