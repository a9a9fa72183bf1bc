//! Header checksum and last-modified helpers.

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use super::format::{CHECKSUM_LEN, TIMESTAMP_LEN};
use crate::error::{Error, Result};

/// Computes the dataset checksum stored in every header.
#[must_use]
pub fn compute_checksum(db_name: &str, dataset: &str) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(db_name.as_bytes());
    hasher.update(b"|");
    hasher.update(dataset.as_bytes());
    hasher.finalize().into()
}

/// Hex form of a checksum, for logs and diagnostics.
#[must_use]
pub fn checksum_hex(checksum: &[u8; CHECKSUM_LEN]) -> String {
    hex::encode(checksum)
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn compute_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Zero-padded ASCII digits for the header marker.
pub(crate) fn encode_timestamp(millis: u64) -> [u8; TIMESTAMP_LEN] {
    let mut buf = [b'0'; TIMESTAMP_LEN];
    let digits = millis.to_string();
    let start = TIMESTAMP_LEN - digits.len();
    buf[start..].copy_from_slice(digits.as_bytes());
    buf
}

pub(crate) fn decode_timestamp(bytes: &[u8]) -> Result<u64> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(Error::Format(
            "last-modified marker is not ASCII digits".to_string(),
        ));
    }
    bytes.iter().try_fold(0u64, |acc, &b| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| Error::Format("last-modified marker overflows u64".to_string()))
    })
}
