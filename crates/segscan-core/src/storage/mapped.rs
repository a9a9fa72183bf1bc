//! Writable whole-file mapping used by commit, rollback and batch writes.

use memmap2::MmapMut;
use parking_lot::RwLockReadGuard;
use std::fs::OpenOptions;
use tracing::error;

use super::checksum::{compute_timestamp, encode_timestamp};
use super::format::{HEADER_LEN, TIMESTAMP_OFFSET};
use super::segment::{check_position, Segment};
use super::value::Value;
use crate::error::Result;

/// A mutable view of a segment.
///
/// Writes land in a shared mapping, so they are visible to concurrent
/// read-only maps of the same file as soon as they are stored. `flush`
/// pushes them to disk; dropping an unflushed view flushes as well.
///
/// Like a `RecordMap`, the view keeps the segment from being resized.
pub struct SegmentMut<'a> {
    segment: &'a Segment,
    mmap: MmapMut,
    record_count: u32,
    dirty: bool,
    _resize: RwLockReadGuard<'a, ()>,
}

impl<'a> SegmentMut<'a> {
    /// Maps the whole segment file read-write.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be opened or mapped.
    pub fn open(segment: &'a Segment) -> Result<Self> {
        let guard = segment.resize_guard();
        let record_count = segment.record_count()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(segment.path())?;
        // SAFETY: the file is opened read-write and its length was validated
        // as header plus whole records. The view owns the shared resize
        // guard, so this process cannot change the length while the mapping
        // lives.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            segment,
            mmap,
            record_count,
            dirty: false,
            _resize: guard,
        })
    }

    /// Segment this view writes to.
    #[must_use]
    pub const fn segment(&self) -> &'a Segment {
        self.segment
    }

    /// Record count at mapping time.
    #[must_use]
    pub const fn record_count(&self) -> u32 {
        self.record_count
    }

    fn slot_range(&self, position: u32) -> Result<std::ops::Range<usize>> {
        check_position(position, self.record_count)?;
        let width = self.segment.layout().width;
        let start = HEADER_LEN + (position - 1) as usize * width;
        Ok(start..start + width)
    }

    /// Decodes the value at `position`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` for an out-of-bounds position.
    pub fn read_value(&self, position: u32) -> Result<Value> {
        let range = self.slot_range(position)?;
        self.segment.layout().decode(&self.mmap[range])
    }

    /// Encodes `value` into the slot at `position`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` for an out-of-bounds position, or the layout's
    /// validation error for an unstorable value.
    pub fn write_value(&mut self, position: u32, value: &Value) -> Result<()> {
        let range = self.slot_range(position)?;
        self.segment
            .layout()
            .encode(value, &mut self.mmap[range])?;
        self.dirty = true;
        Ok(())
    }

    /// Rewrites the last-modified marker in the mapped header.
    pub fn touch_timestamp(&mut self) -> u64 {
        let now = compute_timestamp();
        self.mmap[TIMESTAMP_OFFSET..HEADER_LEN].copy_from_slice(&encode_timestamp(now));
        self.dirty = true;
        now
    }

    /// Flushes pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if msync fails.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.mmap.flush()?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl Drop for SegmentMut<'_> {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.mmap.flush() {
                error!(
                    ?e,
                    dataset = %self.segment.dataset(),
                    "Failed to flush segment mapping in SegmentMut::drop"
                );
            }
        }
    }
}
