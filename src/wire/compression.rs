// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! LZ4 compression for payloads above [`crate::config::PlayHouseConfig::compression_threshold`].
//!
//! Grounded on `cql::compression::Lz4` in the teacher driver, which
//! wraps the same `lz4_flex::{compress_prepend_size, decompress}` pair;
//! here the "original size" is carried in the frame header itself
//! (spec §4.1's `originalSize`) rather than prepended to the buffer.

use crate::error::PlayHouseError;

/// Compress `payload` with LZ4, returning `None` if the compressed form
/// is not smaller than the input (the caller should then send it
/// uncompressed, per spec §4.1's `originalSize == 0` convention).
pub fn compress(payload: &[u8]) -> Option<Vec<u8>> {
    let compressed = lz4_flex::compress(payload);
    if compressed.len() >= payload.len() {
        None
    } else {
        Some(compressed)
    }
}

/// Decompress `bytes`, which must expand to exactly `original_size`
/// bytes.
pub fn decompress(bytes: &[u8], original_size: usize) -> Result<Vec<u8>, PlayHouseError> {
    lz4_flex::decompress(bytes, original_size).map_err(|_| PlayHouseError::Truncated)
}
