//! On-disk record encoding: canonical JSON wrapped in gzip.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

use crate::schema::MemoryRecord;

/// Decompressed payloads larger than this are treated as corrupt rather than
/// being inflated into memory.
const MAX_DECODED_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("gzip stream error: {0}")]
    Compression(#[from] std::io::Error),
    #[error("record JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("decoded payload exceeds the 64 MiB limit")]
    TooLarge,
}

/// Canonical (compact, field-ordered) JSON bytes of a record.
pub fn canonical_json(record: &MemoryRecord) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(record)?)
}

pub fn encode(record: &MemoryRecord, level: u32) -> Result<Vec<u8>, CodecError> {
    let json = canonical_json(record)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::new(level.min(9)));
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let read = GzDecoder::new(bytes)
        .take(MAX_DECODED_BYTES + 1)
        .read_to_end(&mut out)?;
    if read as u64 > MAX_DECODED_BYTES {
        return Err(CodecError::TooLarge);
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<MemoryRecord, CodecError> {
    let json = decompress(bytes)?;
    Ok(serde_json::from_slice(&json)?)
}
