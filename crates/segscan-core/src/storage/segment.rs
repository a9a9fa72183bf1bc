//! Segment files: one column, a fixed header and a flat record array.

use memmap2::{Mmap, MmapOptions};
use parking_lot::{RwLock, RwLockReadGuard};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::checksum::{checksum_hex, compute_timestamp, decode_timestamp, encode_timestamp};
use super::format::{
    validate_file, SegmentHeader, SegmentSpec, CHECKSUM_LEN, HEADER_LEN, TIMESTAMP_LEN,
    TIMESTAMP_OFFSET,
};
use super::layout::ColumnLayout;
use super::value::{NullSentinels, Value};
use crate::error::{Error, Result};

/// Slots written per `write_all` call when filling a body with null sentinels.
const FILL_CHUNK_RECORDS: usize = 8192;

/// An open segment.
///
/// Holds no file handle between calls: every read maps or opens the file for
/// the duration of one operation, so handles and mappings are released on
/// every exit path.
///
/// Mappings hold the shared side of `resize` for as long as they live;
/// `reserve_records` and `truncate` take the exclusive side, so the file
/// never changes length under a live mapping. Neither may be called on a
/// thread that still holds a [`RecordMap`] or `SegmentMut` of the same
/// segment.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    dataset: String,
    db_name: String,
    spec: SegmentSpec,
    checksum: [u8; CHECKSUM_LEN],
    layout: ColumnLayout,
    resize: RwLock<()>,
}

impl Segment {
    /// Creates a new segment file with room for `capacity` records.
    ///
    /// The dataset name is the file stem. The body is allocated sparsely and
    /// filled with the null sentinel when that sentinel is not all zero bytes.
    ///
    /// # Errors
    ///
    /// - `Error::SegmentExists` if the file already exists.
    /// - `Error::Format` if `spec` is not a legal column description.
    /// - `Error::Io` on filesystem failures.
    pub fn create(
        path: impl AsRef<Path>,
        db_name: &str,
        spec: SegmentSpec,
        capacity: u32,
        nulls: &NullSentinels,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        spec.validate()?;
        let dataset = dataset_name(&path)?;
        let layout = ColumnLayout::new(&spec, nulls)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    Error::SegmentExists(dataset.clone())
                } else {
                    Error::Io(e)
                }
            })?;

        let header = SegmentHeader::new(spec, db_name, &dataset, compute_timestamp());
        file.write_all(&header.encode())?;
        file.set_len(body_offset(capacity, layout.width))?;
        if capacity > 0 && layout.null_is_nonzero() {
            fill_null(&file, &layout, 0, capacity)?;
        }
        file.sync_all()?;

        info!(
            dataset = %dataset,
            kind = ?spec.kind,
            encoding = ?spec.encoding,
            capacity,
            checksum = %checksum_hex(&header.checksum),
            "Segment created"
        );

        Ok(Self {
            path,
            dataset,
            db_name: db_name.to_string(),
            spec,
            checksum: header.checksum,
            layout,
            resize: RwLock::new(()),
        })
    }

    /// Opens and validates an existing segment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` on a corrupt header, a checksum written for
    /// another dataset, or a body that is not a whole number of records.
    pub fn open(path: impl AsRef<Path>, db_name: &str, nulls: &NullSentinels) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dataset = dataset_name(&path)?;
        let header = validate_file(&path, db_name, &dataset)?;
        let layout = ColumnLayout::new(&header.spec, nulls)?;

        let len = std::fs::metadata(&path)?.len();
        let records = header.record_count(len)?;
        debug!(dataset = %dataset, records, "Segment opened");

        Ok(Self {
            path,
            dataset,
            db_name: db_name.to_string(),
            spec: header.spec,
            checksum: header.checksum,
            layout,
            resize: RwLock::new(()),
        })
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dataset name (file stem).
    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Logical database name mixed into the checksum.
    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Static column description from the header.
    #[must_use]
    pub const fn spec(&self) -> &SegmentSpec {
        &self.spec
    }

    /// Resolved slot layout.
    #[must_use]
    pub const fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// Dataset checksum stored in the header.
    #[must_use]
    pub const fn checksum(&self) -> &[u8; CHECKSUM_LEN] {
        &self.checksum
    }

    /// Current header, including the on-disk last-modified marker.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Format` if the marker cannot be read.
    pub fn header(&self) -> Result<SegmentHeader> {
        Ok(SegmentHeader {
            spec: self.spec,
            checksum: self.checksum,
            last_modified: self.last_modified()?,
        })
    }

    /// Number of records, derived from the current file length.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` if the file length is not header plus whole
    /// records.
    pub fn record_count(&self) -> Result<u32> {
        let len = std::fs::metadata(&self.path)?.len();
        let header = SegmentHeader {
            spec: self.spec,
            checksum: self.checksum,
            last_modified: 0,
        };
        header.record_count(len)
    }

    /// Last-modified marker, epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on read failure, `Error::Format` if the marker is
    /// not ASCII digits.
    pub fn last_modified(&self) -> Result<u64> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(TIMESTAMP_OFFSET as u64))?;
        let mut buf = [0u8; TIMESTAMP_LEN];
        file.read_exact(&mut buf)?;
        decode_timestamp(&buf)
    }

    /// Grows the body by `additional` null records and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` if the count would exceed `u32::MAX`,
    /// `Error::Io` on filesystem failures.
    pub fn reserve_records(&self, additional: u32) -> Result<u32> {
        let _resize = self.resize.write();
        let current = self.record_count()?;
        let target = current.checked_add(additional).ok_or_else(|| {
            Error::Range(format!(
                "{current} + {additional} records exceed the u32 position space"
            ))
        })?;
        if additional == 0 {
            return Ok(current);
        }

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(body_offset(target, self.layout.width))?;
        if self.layout.null_is_nonzero() {
            fill_null(&file, &self.layout, current, target)?;
        }
        write_timestamp(&file, compute_timestamp())?;
        file.sync_all()?;

        debug!(dataset = %self.dataset, from = current, to = target, "Segment grown");
        Ok(target)
    }

    /// Resets the body to header-only and rewrites the timestamp.
    ///
    /// Waits for live mappings to be dropped. Staged but uncommitted writes
    /// are not checked here; `Engine::truncate` refuses while sessions are
    /// open.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on filesystem failures.
    pub fn truncate(&self) -> Result<()> {
        let _resize = self.resize.write();
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(HEADER_LEN as u64)?;
        write_timestamp(&file, compute_timestamp())?;
        file.sync_all()?;
        info!(dataset = %self.dataset, "Segment truncated");
        Ok(())
    }

    /// Rewrites the last-modified marker with the current time.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on filesystem failures.
    pub fn touch(&self) -> Result<u64> {
        let now = compute_timestamp();
        let file = OpenOptions::new().write(true).open(&self.path)?;
        write_timestamp(&file, now)?;
        Ok(now)
    }

    /// Reads the record at 1-based `position`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` for positions outside `[1, record_count]`.
    pub fn read_value(&self, position: u32) -> Result<Value> {
        let count = self.record_count()?;
        check_position(position, count)?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.byte_offset(position)))?;
        let mut slot = vec![0u8; self.layout.width];
        file.read_exact(&mut slot)?;
        self.layout.decode(&slot)
    }

    /// Reads records `low..=high` (1-based, inclusive).
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` for an empty or out-of-bounds range.
    pub fn read_range(&self, low: u32, high: u32) -> Result<Vec<Value>> {
        let map = self.map_records(low, high)?;
        map.slots().map(|slot| self.layout.decode(slot)).collect()
    }

    /// Maps exactly the bytes of records `low..=high` read-only.
    ///
    /// The segment cannot be grown or truncated while the map is alive.
    ///
    /// # Errors
    ///
    /// Returns `Error::Range` unless `1 <= low <= high <= record_count`.
    pub fn map_records(&self, low: u32, high: u32) -> Result<RecordMap<'_>> {
        let guard = self.resize.read();
        let count = self.record_count()?;
        if low == 0 || low > high || high > count {
            return Err(Error::Range(format!(
                "[{low}, {high}] is not within [1, {count}] for '{}'",
                self.dataset
            )));
        }

        let file = File::open(&self.path)?;
        let width = self.layout.width;
        let len = (high - low + 1) as usize * width;
        // SAFETY: the window lies inside the file length read above, and the
        // shared resize guard moves into the map, so this process cannot
        // shrink the file until the mapping is gone. Writers only modify
        // bytes in place through shared mappings. Truncation by another
        // process is outside what the engine can prevent.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(self.byte_offset(low))
                .len(len)
                .map(&file)?
        };

        Ok(RecordMap {
            mmap,
            width,
            low,
            _resize: guard,
        })
    }

    /// Takes the shared resize guard for a writable mapping.
    pub(crate) fn resize_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.resize.read()
    }

    /// Byte offset of 1-based `position`; callers check `position >= 1`.
    pub(crate) fn byte_offset(&self, position: u32) -> u64 {
        HEADER_LEN as u64 + u64::from(position.saturating_sub(1)) * self.layout.width as u64
    }
}

/// A read-only mapping of a contiguous record window.
///
/// Unmapped when dropped. Blocks `reserve_records` and `truncate` on the
/// segment until then.
pub struct RecordMap<'a> {
    mmap: Mmap,
    width: usize,
    low: u32,
    _resize: RwLockReadGuard<'a, ()>,
}

impl RecordMap<'_> {
    /// Raw bytes of the window.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Iterator over fixed-width slots, first slot is record `low`.
    pub fn slots(&self) -> std::slice::ChunksExact<'_, u8> {
        self.mmap.chunks_exact(self.width)
    }

    /// Slot width in bytes.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// First record position in the window.
    #[must_use]
    pub const fn low(&self) -> u32 {
        self.low
    }

    /// Number of records in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len() / self.width
    }

    /// True for a zero-record window (never produced by `map_records`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

pub(crate) fn check_position(position: u32, count: u32) -> Result<()> {
    if position == 0 || position > count {
        return Err(Error::Range(format!(
            "position {position} is not within [1, {count}]"
        )));
    }
    Ok(())
}

fn body_offset(records: u32, width: usize) -> u64 {
    HEADER_LEN as u64 + u64::from(records) * width as u64
}

fn dataset_name(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cannot derive a dataset name from {}",
                path.display()
            ))
        })
}

fn write_timestamp(mut file: &File, millis: u64) -> Result<()> {
    file.seek(SeekFrom::Start(TIMESTAMP_OFFSET as u64))?;
    file.write_all(&encode_timestamp(millis))?;
    Ok(())
}

/// Writes null slots for records `from..to` (0-based).
fn fill_null(file: &File, layout: &ColumnLayout, from: u32, to: u32) -> Result<()> {
    let slot = layout.null_slot();
    let chunk: Vec<u8> = slot
        .iter()
        .copied()
        .cycle()
        .take(slot.len() * FILL_CHUNK_RECORDS)
        .collect();

    let mut handle = file;
    handle.seek(SeekFrom::Start(body_offset(from, layout.width)))?;
    let mut writer = BufWriter::new(handle);
    let mut remaining = (to - from) as usize;
    while remaining > 0 {
        let n = remaining.min(FILL_CHUNK_RECORDS);
        writer.write_all(&chunk[..n * slot.len()])?;
        remaining -= n;
    }
    writer.flush()?;
    Ok(())
}
