//! Compression codec for tag payloads.
//!
//! Tags marked with the compressed flag hold an LZ4 block with the
//! uncompressed size prepended. During a merge, compressed tags are copied
//! verbatim whenever possible; only merges that need to look inside a tag
//! decompress it.

use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};

use crate::error::{NaginataError, Result};

/// Compress `input` into an LZ4 block with its size prepended.
pub fn compress(input: &[u8]) -> Vec<u8> {
    compress_prepend_size(input)
}

/// Decompress a tag payload produced by [`compress`].
///
/// A payload that fails to decompress means the table is damaged, so this
/// surfaces [`NaginataError::Corrupt`] rather than aborting.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    decompress_size_prepended(input)
        .map_err(|e| NaginataError::corrupt(format!("tag failed to decompress: {e}")))
}
