//! Payload codec: zlib compression with base64 armoring.
//!
//! Every payload stored in the log is compressed, and the compressed bytes
//! are base64-encoded so they embed safely in a quoted SQL literal after
//! escaping. Decompression failure is a hard error for that record; callers
//! attach the record's identity and log it.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{StoreError, StoreResult};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Compress a command for storage: deflate, then base64.
pub fn compress(cmd: &str) -> StoreResult<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(cmd.as_bytes())?;
    let deflated = encoder.finish()?;
    Ok(STANDARD.encode(deflated))
}

/// Recover a stored command: base64-decode, then inflate.
pub fn decompress(packed: &str) -> StoreResult<String> {
    let deflated = STANDARD
        .decode(packed.trim())
        .map_err(|e| StoreError::Decode(format!("base64: {e}")))?;

    let mut cmd = String::new();
    ZlibDecoder::new(deflated.as_slice())
        .read_to_string(&mut cmd)
        .map_err(|e| StoreError::Decode(format!("inflate: {e}")))?;
    Ok(cmd)
}
