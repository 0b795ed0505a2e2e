//! Wire format compression for envelopes.
//!
//! Every envelope is LZ4-compressed before it leaves a node.
//!
//! # Wire Format
//!
//! ```text
//! [u32 LE uncompressed size][LZ4 block]
//! ```
//!
//! The size prefix is LZ4's own framing. It is checked against
//! [`MAX_MESSAGE_BYTES`] before anything is allocated, so a corrupt or
//! hostile prefix cannot make the receiver reserve gigabytes.

use thiserror::Error;

/// Largest uncompressed envelope a node accepts.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Errors from wire encoding/decoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    #[error("declared size {declared} exceeds limit {limit}")]
    TooLarge { declared: usize, limit: usize },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Compress data for transmission.
#[inline]
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress data received from a peer.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let Some(prefix) = data.get(..4) else {
        return Err(WireError::Truncated(data.len()));
    };
    let mut size = [0u8; 4];
    size.copy_from_slice(prefix);
    let declared = u32::from_le_bytes(size) as usize;
    if declared > MAX_MESSAGE_BYTES {
        return Err(WireError::TooLarge {
            declared,
            limit: MAX_MESSAGE_BYTES,
        });
    }

    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| WireError::DecompressionFailed(e.to_string()))
}
