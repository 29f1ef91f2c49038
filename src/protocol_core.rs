//! Frame header encoding and decoding
//!
//! A stream starts with one unsigned length byte followed by that many raw
//! filename bytes. Everything after the filename is file content. The
//! filename is never inspected: no terminator, no character restrictions,
//! no path normalization.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::MAX_FILENAME_LEN;

/// Read the filename header from the front of a stream.
///
/// On success the reader is positioned at the first payload byte. Fails if
/// the stream ends (or errors) before the length byte or the full filename
/// has arrived.
pub async fn decode_header<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u8().await.context("read filename length")? as usize;
    let mut name = vec![0u8; len];
    if len > 0 {
        reader
            .read_exact(&mut name)
            .await
            .with_context(|| format!("read filename ({} bytes)", len))?;
    }
    Ok(name)
}

/// Build the header for `name`. Names longer than 255 bytes cannot be framed.
pub fn encode_header(name: &[u8]) -> Result<Vec<u8>> {
    if name.len() > MAX_FILENAME_LEN {
        bail!(
            "filename too long: {} bytes (max: {})",
            name.len(),
            MAX_FILENAME_LEN
        );
    }
    let mut header = Vec::with_capacity(1 + name.len());
    header.push(name.len() as u8);
    header.extend_from_slice(name);
    Ok(header)
}
