//! Payload encoding at the remote store boundary.
//!
//! Values are written as MessagePack with a one-byte format marker in front so
//! a payload written by something else is reported as corrupt rather than
//! misread.

use crate::error::{CacheError, Result};
use crate::value::CacheValue;

/// Leading byte of every payload produced by [`encode`].
const FORMAT_MARKER: u8 = 0xC1;

pub fn encode(key: &str, value: &CacheValue) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(value).map_err(|e| CacheError::encode_failure(key, e))?;
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(FORMAT_MARKER);
    payload.extend_from_slice(&body);
    Ok(payload)
}

pub fn decode(key: &str, payload: &[u8]) -> Result<CacheValue> {
    match payload.split_first() {
        Some((&FORMAT_MARKER, body)) => {
            rmp_serde::from_slice(body).map_err(|e| CacheError::decode_failure(key, e))
        }
        Some(_) => Err(CacheError::decode_failure(key, "unknown payload format")),
        None => Err(CacheError::decode_failure(key, "empty payload")),
    }
}
