//! Segment storage.
//!
//! One segment file holds one column: a 64-byte header followed by a flat
//! array of fixed-width slots.
//!
//! # Public Types
//!
//! - [`Segment`]: an open segment file, read paths and lifecycle
//! - [`SegmentMut`]: writable mapping used by write sessions
//! - [`SegmentSpec`], [`SegmentHeader`]: header description and codec
//! - [`Value`], [`NullSentinels`]: record values and null representation
//! - [`ColumnLayout`]: slot codec for one column

mod checksum;
mod format;
mod layout;
mod mapped;
mod segment;
mod value;

#[cfg(test)]
mod segment_tests;

pub use checksum::{checksum_hex, compute_checksum, compute_timestamp};
pub use format::{
    validate_file, Encoding, EncodingFamily, SegmentHeader, SegmentKind, SegmentSpec,
    CHECKSUM_LEN, HEADER_LEN, MAX_ALPHANUMERIC_LEN, MAX_DECIMAL_SCALE,
};
pub use layout::{scale_decimal, unscale_decimal, ColumnLayout};
pub(crate) use layout::{FloatRecord, IntRecord, F32, F64, I16, I32, I64, I8};
pub use mapped::SegmentMut;
pub use segment::{RecordMap, Segment};
pub(crate) use segment::check_position;
pub use value::{NullSentinels, Value};
