//! Dense match vectors shared by partitioned scans.
//!
//! One bit per record position. Bits are stored in `AtomicU64` words so
//! scans over disjoint sub-ranges can write into the same vector from
//! different threads without a lock, even when two sub-ranges meet inside
//! one word. Readers observe all bits after joining the writers.

use roaring::RoaringBitmap;
use std::fmt;
use crate::error::{Error, Result};
use crate::sync::{AtomicU64, Ordering};

const WORD_BITS: usize = 64;

/// Dense bit vector covering positions `origin..origin + len`.
pub struct BitVector {
    words: Vec<AtomicU64>,
    len: usize,
    origin: u32,
}

impl BitVector {
    /// Vector of `len` clear bits whose index 0 is position `origin`.
    #[must_use]
    pub fn with_origin(origin: u32, len: usize) -> Self {
        let words = (0..len.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { words, len, origin }
    }

    /// Vector covering positions `low..=high`.
    #[must_use]
    pub fn for_range(low: u32, high: u32) -> Self {
        let len = if high >= low {
            (high - low) as usize + 1
        } else {
            0
        };
        Self::with_origin(low, len)
    }

    /// Vector covering positions `1..=records`.
    #[must_use]
    pub fn for_records(records: u32) -> Self {
        Self::with_origin(1, records as usize)
    }

    /// Number of bits.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length vector.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position of index 0.
    #[must_use]
    pub const fn origin(&self) -> u32 {
        self.origin
    }

    /// True if every position in `low..=high` has a bit.
    #[must_use]
    pub fn covers(&self, low: u32, high: u32) -> bool {
        low >= self.origin
            && low <= high
            && ((high - self.origin) as usize) < self.len
    }

    #[inline]
    fn locate(&self, index: usize) -> (usize, u64) {
        assert!(
            index < self.len,
            "bit index {index} out of bounds for length {}",
            self.len
        );
        (index / WORD_BITS, 1u64 << (index % WORD_BITS))
    }

    /// Sets bit `index`, returning its previous state.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn set(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);
        self.words[word].fetch_or(mask, Ordering::Relaxed) & mask != 0
    }

    /// Clears bit `index`, returning its previous state.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn clear(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);
        self.words[word].fetch_and(!mask, Ordering::Relaxed) & mask != 0
    }

    /// Reads bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);
        self.words[word].load(Ordering::Relaxed) & mask != 0
    }

    /// Index of 1-based `position`, if covered.
    #[must_use]
    pub fn index_of(&self, position: u32) -> Option<usize> {
        let index = position.checked_sub(self.origin)? as usize;
        (index < self.len).then_some(index)
    }

    /// Reads the bit for `position`; uncovered positions read as clear.
    #[must_use]
    pub fn get_position(&self, position: u32) -> bool {
        self.index_of(position).is_some_and(|i| self.get(i))
    }

    /// Sets or clears the bit for `position`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` if the vector does not cover `position`.
    pub fn set_position(&self, position: u32, on: bool) -> Result<()> {
        let index = self.index_of(position).ok_or_else(|| {
            Error::Range(format!(
                "position {position} is outside the vector [{}, {}]",
                self.origin,
                self.end()
            ))
        })?;
        if on {
            self.set(index);
        } else {
            self.clear(index);
        }
        Ok(())
    }

    /// Last covered position (`origin - 1` when empty).
    #[must_use]
    pub fn end(&self) -> u64 {
        (u64::from(self.origin) + self.len as u64).saturating_sub(1)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, w)| {
            let mut bits = w.load(Ordering::Relaxed);
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(i * WORD_BITS + tz)
            })
        })
    }

    /// 1-based positions of set bits, ascending.
    #[must_use]
    pub fn positions(&self) -> Vec<u32> {
        self.iter_ones()
            .map(|i| self.origin + i as u32)
            .collect()
    }

    fn check_shape(&self, other: &Self) -> Result<()> {
        if self.origin != other.origin || self.len != other.len {
            return Err(Error::InvalidArgument(format!(
                "bit vectors differ in shape: [{}, +{}] vs [{}, +{}]",
                self.origin, self.len, other.origin, other.len
            )));
        }
        Ok(())
    }

    /// Bitwise AND into a new vector.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if origins or lengths differ.
    pub fn and(&self, other: &Self) -> Result<Self> {
        let out = self.clone();
        out.and_assign(other)?;
        Ok(out)
    }

    /// In-place bitwise AND.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if origins or lengths differ.
    pub fn and_assign(&self, other: &Self) -> Result<()> {
        self.check_shape(other)?;
        for (a, b) in self.words.iter().zip(&other.words) {
            a.fetch_and(b.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        Ok(())
    }

    /// In-place bitwise OR.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if origins or lengths differ.
    pub fn or_assign(&self, other: &Self) -> Result<()> {
        self.check_shape(other)?;
        for (a, b) in self.words.iter().zip(&other.words) {
            a.fetch_or(b.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Compressed copy holding the set positions.
    #[must_use]
    pub fn to_roaring(&self) -> RoaringBitmap {
        let mut bitmap = RoaringBitmap::new();
        for index in self.iter_ones() {
            bitmap.insert(self.origin + index as u32);
        }
        bitmap
    }
}

impl Clone for BitVector {
    fn clone(&self) -> Self {
        Self {
            words: self
                .words
                .iter()
                .map(|w| AtomicU64::new(w.load(Ordering::Relaxed)))
                .collect(),
            len: self.len,
            origin: self.origin,
        }
    }
}

impl PartialEq for BitVector {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin
            && self.len == other.len
            && self
                .words
                .iter()
                .zip(&other.words)
                .all(|(a, b)| a.load(Ordering::Relaxed) == b.load(Ordering::Relaxed))
    }
}

impl Eq for BitVector {}

impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitVector")
            .field("origin", &self.origin)
            .field("len", &self.len)
            .field("ones", &self.count_ones())
            .finish()
    }
}
