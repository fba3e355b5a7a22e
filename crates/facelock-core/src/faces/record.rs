//! Binary layout of a persisted profile.
//!
//! Current layout, all integers little-endian:
//!
//! ```text
//! magic "FLPR" | version u16 | header_len u16 | count u32 | dim u32 | ..header extension..
//! count * dim f32 samples in enrollment order
//! ```
//!
//! `header_len` covers everything before the samples, so readers skip header
//! fields added by newer versions. Records without the magic are the legacy
//! layout: one bare embedding of `f32` values and nothing else.

use bytes::{Buf, BufMut, BytesMut};

use super::Embedding;
use crate::errors::{AppError, AppResult};

const RECORD_MAGIC: &[u8; 4] = b"FLPR";
pub const RECORD_VERSION: u16 = 1;
const BASE_HEADER_LEN: usize = 16;
const F32_LEN: usize = std::mem::size_of::<f32>();

enum RecordTag {
    Versioned,
    Legacy,
}

fn tag(bytes: &[u8]) -> RecordTag {
    if bytes.starts_with(RECORD_MAGIC) {
        RecordTag::Versioned
    } else {
        RecordTag::Legacy
    }
}

/// Serialize the samples of one profile. All samples must share a dimension.
pub fn encode_record(name: &str, samples: &[Embedding]) -> AppResult<Vec<u8>> {
    let dimension = samples.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = samples.iter().find(|sample| sample.len() != dimension) {
        return Err(AppError::DimensionMismatch {
            name: name.to_string(),
            expected: dimension,
            found: bad.len(),
        });
    }
    let count = u32::try_from(samples.len())
        .map_err(|_| AppError::InvalidEmbedding(format!("too many samples for '{name}'")))?;
    let dim = u32::try_from(dimension)
        .map_err(|_| AppError::InvalidEmbedding(format!("embedding too long for '{name}'")))?;

    let mut buf = BytesMut::with_capacity(BASE_HEADER_LEN + samples.len() * dimension * F32_LEN);
    buf.put_slice(RECORD_MAGIC);
    buf.put_u16_le(RECORD_VERSION);
    buf.put_u16_le(BASE_HEADER_LEN as u16);
    buf.put_u32_le(count);
    buf.put_u32_le(dim);
    for value in samples.iter().flatten() {
        buf.put_f32_le(*value);
    }
    Ok(buf.to_vec())
}

/// Decode a stored record, accepting the current and the legacy layout.
pub fn decode_record(key: &str, bytes: &[u8]) -> AppResult<Vec<Embedding>> {
    match tag(bytes) {
        RecordTag::Versioned => decode_versioned(key, bytes),
        RecordTag::Legacy => decode_legacy(key, bytes),
    }
}

fn corrupt(key: &str, message: impl Into<String>) -> AppError {
    AppError::CorruptRecord {
        key: key.to_string(),
        message: message.into(),
    }
}

fn decode_versioned(key: &str, bytes: &[u8]) -> AppResult<Vec<Embedding>> {
    if bytes.len() < BASE_HEADER_LEN {
        return Err(corrupt(key, format!("truncated header ({} bytes)", bytes.len())));
    }
    let mut buf = &bytes[RECORD_MAGIC.len()..];
    let version = buf.get_u16_le();
    let header_len = buf.get_u16_le() as usize;
    let count = buf.get_u32_le() as usize;
    let dimension = buf.get_u32_le() as usize;

    if version == 0 {
        return Err(corrupt(key, "version 0 is not a valid record version"));
    }
    if header_len < BASE_HEADER_LEN || header_len > bytes.len() {
        return Err(corrupt(key, format!("invalid header length {header_len}")));
    }
    if count == 0 || dimension == 0 {
        return Err(corrupt(key, format!("empty record ({count} x {dimension})")));
    }

    let mut payload = &bytes[header_len..];
    let expected = count
        .checked_mul(dimension)
        .and_then(|values| values.checked_mul(F32_LEN))
        .ok_or_else(|| corrupt(key, "sample count overflows"))?;
    if payload.remaining() != expected {
        return Err(corrupt(
            key,
            format!(
                "expected {expected} payload bytes for {count} x {dimension}, found {}",
                payload.remaining()
            ),
        ));
    }

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let mut sample = Vec::with_capacity(dimension);
        for _ in 0..dimension {
            sample.push(payload.get_f32_le());
        }
        samples.push(sample);
    }
    Ok(samples)
}

fn decode_legacy(key: &str, bytes: &[u8]) -> AppResult<Vec<Embedding>> {
    if bytes.is_empty() || bytes.len() % F32_LEN != 0 {
        return Err(corrupt(
            key,
            format!("legacy record has {} bytes, not a whole number of f32 values", bytes.len()),
        ));
    }
    let mut buf = bytes;
    let mut sample = Vec::with_capacity(bytes.len() / F32_LEN);
    while buf.has_remaining() {
        sample.push(buf.get_f32_le());
    }
    Ok(vec![sample])
}
