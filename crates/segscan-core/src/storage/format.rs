//! On-disk segment header layout.
//!
//! ```text
//! offset  0: kind            (1 byte)
//! offset  1: encoding        (1 byte)
//! offset  2: segment id      (u32 LE)
//! offset  6: element width   (u32 LE)
//! offset 10: decimal scale   (u16 LE)
//! offset 12: checksum        (32 bytes, SHA-256 of "dbName|datasetName")
//! offset 44: last modified   (20 ASCII digits, epoch milliseconds)
//! offset 64: record array
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::checksum::{compute_checksum, decode_timestamp, encode_timestamp};
use crate::error::{Error, Result};

/// Total header length in bytes. Record 1 starts here.
pub const HEADER_LEN: usize = 64;
/// Offset of the dataset checksum.
pub const CHECKSUM_OFFSET: usize = 12;
/// Length of the dataset checksum.
pub const CHECKSUM_LEN: usize = 32;
/// Offset of the ASCII last-modified marker.
pub const TIMESTAMP_OFFSET: usize = CHECKSUM_OFFSET + CHECKSUM_LEN;
/// Length of the ASCII last-modified marker.
pub const TIMESTAMP_LEN: usize = HEADER_LEN - TIMESTAMP_OFFSET;
/// Longest alphanumeric payload a slot can carry (1-byte length prefix).
pub const MAX_ALPHANUMERIC_LEN: usize = 255;
/// Largest decimal scale accepted for scaled numeric facts.
pub const MAX_DECIMAL_SCALE: u16 = 18;

/// Role of the column stored in a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SegmentKind {
    /// Low-cardinality categorical column, small fixed integer width.
    Dimension = 1,
    /// Numeric measure or bounded string column.
    Fact = 2,
}

impl TryFrom<u8> for SegmentKind {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Dimension),
            2 => Ok(Self::Fact),
            other => Err(Error::Format(format!("unsupported segment kind {other}"))),
        }
    }
}

/// Families of encodings that share an operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingFamily {
    /// Two's-complement integers of 1, 2, 4 or 8 bytes.
    Integer,
    /// IEEE 754 single or double precision.
    Float,
    /// Length-prefixed UTF-8.
    Text,
}

impl std::fmt::Display for EncodingFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// Record encoding of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Encoding {
    /// 1-byte signed integer.
    Byte = 1,
    /// 2-byte signed integer.
    Short = 2,
    /// 4-byte signed integer.
    Int = 3,
    /// 8-byte signed integer.
    Long = 4,
    /// 4-byte IEEE float.
    Float = 5,
    /// 8-byte IEEE double.
    Double = 6,
    /// Length-prefixed UTF-8 in a fixed-size slot.
    Alphanumeric = 7,
}

impl TryFrom<u8> for Encoding {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Short),
            3 => Ok(Self::Int),
            4 => Ok(Self::Long),
            5 => Ok(Self::Float),
            6 => Ok(Self::Double),
            7 => Ok(Self::Alphanumeric),
            other => Err(Error::Format(format!("unsupported encoding {other}"))),
        }
    }
}

impl Encoding {
    /// Width in bytes for fixed encodings, `None` for alphanumeric.
    #[must_use]
    pub const fn fixed_width(self) -> Option<u32> {
        match self {
            Self::Byte => Some(1),
            Self::Short => Some(2),
            Self::Int | Self::Float => Some(4),
            Self::Long | Self::Double => Some(8),
            Self::Alphanumeric => None,
        }
    }

    /// Operand family for filters and writes.
    #[must_use]
    pub const fn family(self) -> EncodingFamily {
        match self {
            Self::Byte | Self::Short | Self::Int | Self::Long => EncodingFamily::Integer,
            Self::Float | Self::Double => EncodingFamily::Float,
            Self::Alphanumeric => EncodingFamily::Text,
        }
    }

    /// Inclusive range of integers the encoding can store.
    #[must_use]
    pub const fn int_range(self) -> Option<(i64, i64)> {
        match self {
            Self::Byte => Some((i8::MIN as i64, i8::MAX as i64)),
            Self::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Long => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Checks that `width` is legal for this encoding.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` when the width contradicts the encoding.
    pub fn check_width(self, width: u32) -> Result<()> {
        match self.fixed_width() {
            Some(expected) if expected == width => Ok(()),
            Some(expected) => Err(Error::Format(format!(
                "encoding {self:?} requires element width {expected}, header says {width}"
            ))),
            None => {
                let max = (MAX_ALPHANUMERIC_LEN + 1) as u32;
                if (2..=max).contains(&width) {
                    Ok(())
                } else {
                    Err(Error::Format(format!(
                        "alphanumeric element width {width} is out of range [2, {max}]"
                    )))
                }
            }
        }
    }
}

/// Static description of a segment, supplied when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// Column role.
    pub kind: SegmentKind,
    /// Record encoding.
    pub encoding: Encoding,
    /// Bytes per record slot.
    pub element_width: u32,
    /// Decimal scale for scaled numeric facts.
    pub decimal_scale: u16,
    /// Caller-assigned segment id.
    pub segment_id: u32,
}

impl SegmentSpec {
    /// Default slot width for alphanumeric columns.
    pub const DEFAULT_ALPHANUMERIC_WIDTH: u32 = 32;

    /// Creates a spec with the encoding's natural width.
    #[must_use]
    pub fn new(kind: SegmentKind, encoding: Encoding) -> Self {
        Self {
            kind,
            encoding,
            element_width: encoding
                .fixed_width()
                .unwrap_or(Self::DEFAULT_ALPHANUMERIC_WIDTH),
            decimal_scale: 0,
            segment_id: 0,
        }
    }

    /// Dimension column of the given integer encoding.
    #[must_use]
    pub fn dimension(encoding: Encoding) -> Self {
        Self::new(SegmentKind::Dimension, encoding)
    }

    /// Fact column of the given encoding.
    #[must_use]
    pub fn fact(encoding: Encoding) -> Self {
        Self::new(SegmentKind::Fact, encoding)
    }

    /// Alphanumeric fact column holding up to `max_len` bytes per value.
    #[must_use]
    pub fn alphanumeric(max_len: u32) -> Self {
        Self::fact(Encoding::Alphanumeric).with_element_width(max_len + 1)
    }

    /// Builder: set element width.
    #[must_use]
    pub fn with_element_width(mut self, width: u32) -> Self {
        self.element_width = width;
        self
    }

    /// Builder: set decimal scale.
    #[must_use]
    pub fn with_decimal_scale(mut self, scale: u16) -> Self {
        self.decimal_scale = scale;
        self
    }

    /// Builder: set segment id.
    #[must_use]
    pub fn with_segment_id(mut self, id: u32) -> Self {
        self.segment_id = id;
        self
    }

    /// Validates the kind/encoding/width combination.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` for unsupported combinations.
    pub fn validate(&self) -> Result<()> {
        self.encoding.check_width(self.element_width)?;

        if self.kind == SegmentKind::Dimension
            && !matches!(
                self.encoding,
                Encoding::Byte | Encoding::Short | Encoding::Int
            )
        {
            return Err(Error::Format(format!(
                "dimension columns must use byte, short or int encoding, got {:?}",
                self.encoding
            )));
        }

        if self.decimal_scale > MAX_DECIMAL_SCALE {
            return Err(Error::Format(format!(
                "decimal scale {} exceeds {MAX_DECIMAL_SCALE}",
                self.decimal_scale
            )));
        }

        if self.decimal_scale > 0 && self.encoding.family() != EncodingFamily::Integer {
            return Err(Error::Format(
                "decimal scale only applies to integer encodings".to_string(),
            ));
        }

        Ok(())
    }
}

/// Decoded segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Static column description.
    pub spec: SegmentSpec,
    /// SHA-256 of `dbName|datasetName`.
    pub checksum: [u8; CHECKSUM_LEN],
    /// Last modification time, epoch milliseconds.
    pub last_modified: u64,
}

impl SegmentHeader {
    /// Builds a header for a new dataset.
    #[must_use]
    pub fn new(spec: SegmentSpec, db_name: &str, dataset: &str, last_modified: u64) -> Self {
        Self {
            spec,
            checksum: compute_checksum(db_name, dataset),
            last_modified,
        }
    }

    /// Serializes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.spec.kind as u8;
        buf[1] = self.spec.encoding as u8;
        buf[2..6].copy_from_slice(&self.spec.segment_id.to_le_bytes());
        buf[6..10].copy_from_slice(&self.spec.element_width.to_le_bytes());
        buf[10..12].copy_from_slice(&self.spec.decimal_scale.to_le_bytes());
        buf[CHECKSUM_OFFSET..TIMESTAMP_OFFSET].copy_from_slice(&self.checksum);
        buf[TIMESTAMP_OFFSET..].copy_from_slice(&encode_timestamp(self.last_modified));
        buf
    }

    /// Parses and validates a header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` on a short buffer, unknown kind or encoding,
    /// a width/encoding mismatch, or an unreadable timestamp.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Format(format!(
                "header truncated: {} of {HEADER_LEN} bytes",
                bytes.len()
            )));
        }

        let kind = SegmentKind::try_from(bytes[0])?;
        let encoding = Encoding::try_from(bytes[1])?;
        let segment_id = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let element_width = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let decimal_scale = u16::from_le_bytes([bytes[10], bytes[11]]);

        let spec = SegmentSpec {
            kind,
            encoding,
            element_width,
            decimal_scale,
            segment_id,
        };
        spec.validate()?;

        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&bytes[CHECKSUM_OFFSET..TIMESTAMP_OFFSET]);
        let last_modified = decode_timestamp(&bytes[TIMESTAMP_OFFSET..HEADER_LEN])?;

        Ok(Self {
            spec,
            checksum,
            last_modified,
        })
    }

    /// Number of records held by a file of `file_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` when the body is not a whole number of records
    /// or exceeds the `u32` position space.
    pub fn record_count(&self, file_len: u64) -> Result<u32> {
        let header = HEADER_LEN as u64;
        if file_len < header {
            return Err(Error::Format(format!(
                "file length {file_len} is shorter than the header"
            )));
        }
        let width = u64::from(self.spec.element_width);
        let body = file_len - header;
        if body % width != 0 {
            return Err(Error::Format(format!(
                "body length {body} is not a multiple of element width {width}"
            )));
        }
        u32::try_from(body / width)
            .map_err(|_| Error::Format(format!("{} records exceed u32 positions", body / width)))
    }
}

/// Reads and validates a segment header from disk.
///
/// Checks the structural header fields, the width/encoding invariant and the
/// dataset checksum for `db_name|dataset`.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read, `Error::Format` on any
/// header mismatch.
pub fn validate_file(path: &Path, db_name: &str, dataset: &str) -> Result<SegmentHeader> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Format(format!("{}: header truncated", path.display()))
        } else {
            Error::Io(e)
        }
    })?;

    let header = SegmentHeader::decode(&buf)?;
    let expected = compute_checksum(db_name, dataset);
    if header.checksum != expected {
        return Err(Error::Format(format!(
            "{}: checksum mismatch for dataset '{db_name}|{dataset}'",
            path.display()
        )));
    }

    Ok(header)
}
