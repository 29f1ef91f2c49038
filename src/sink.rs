//! Destination files for received streams.
//!
//! Every transfer gets a fresh file named `<filename>_<YYYYMMDDHHMMSS>.txt`
//! under the sink root. Name construction and creation happen under one
//! process-wide lock; the payload copy does not, so many files can be written
//! concurrently once created.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::protocol::{FILE_SUFFIX, NAME_SEPARATOR, TIMESTAMP_FORMAT};

pub struct FileSink {
    root: PathBuf,
    // Held across name construction + create only, never across the copy
    create_lock: Mutex<()>,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            create_lock: Mutex::new(()),
        }
    }

    /// Create the destination file for `name`, stamped with the current local time.
    pub async fn create(&self, name: &[u8]) -> Result<(PathBuf, tokio::fs::File)> {
        let _guard = self.create_lock.lock().await;
        self.create_locked(name, &Local::now()).await
    }

    /// Same as [`FileSink::create`] with an explicit timestamp.
    pub async fn create_at(&self, name: &[u8], now: &DateTime<Local>) -> Result<(PathBuf, tokio::fs::File)> {
        let _guard = self.create_lock.lock().await;
        self.create_locked(name, now).await
    }

    async fn create_locked(&self, name: &[u8], now: &DateTime<Local>) -> Result<(PathBuf, tokio::fs::File)> {
        let path = self.root.join(destination_name(name, now));
        // No existence check: a same-second collision truncates the earlier file
        let file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("create {}", path.display()))?;
        Ok((path, file))
    }

    /// Drain `reader` into `file` until end-of-stream. The file is flushed and
    /// closed on return, whether the copy succeeded or not.
    pub async fn write<R>(&self, mut file: tokio::fs::File, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let copied = tokio::io::copy(reader, &mut file).await;
        // Flush even on a failed copy so the partial content lands on disk
        let flushed = file.flush().await;
        let bytes = copied?;
        flushed?;
        Ok(bytes)
    }
}

/// `<name>_<timestamp>.txt`, built from the raw filename bytes.
pub fn destination_name(name: &[u8], now: &DateTime<Local>) -> PathBuf {
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let mut raw = Vec::with_capacity(name.len() + NAME_SEPARATOR.len() + stamp.len() + FILE_SUFFIX.len());
    raw.extend_from_slice(name);
    raw.extend_from_slice(NAME_SEPARATOR);
    raw.extend_from_slice(stamp.as_bytes());
    raw.extend_from_slice(FILE_SUFFIX);
    path_from_bytes(raw)
}

#[cfg(unix)]
fn path_from_bytes(raw: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(raw))
}

#[cfg(not(unix))]
fn path_from_bytes(raw: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&raw).into_owned())
}
