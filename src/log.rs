//! JSON Lines journal of finished and failed transfers.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::logger::Logger;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum TransferStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub transfer_id: Uuid,
    pub peer: String,
    pub destination: Option<PathBuf>,
    pub status: TransferStatus,
    /// Payload bytes on disk; for a failed transfer, what landed before the error.
    pub bytes_transferred: u64,
    pub error: Option<String>,
}

impl TransferLogEntry {
    fn now(id: Uuid, peer: SocketAddr, destination: Option<PathBuf>, status: TransferStatus, bytes: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            transfer_id: id,
            peer: peer.to_string(),
            destination,
            status,
            bytes_transferred: bytes,
            error: None,
        }
    }
}

pub struct TransferLog {
    // One handle shared by all stream tasks; each entry is a single append
    file: Mutex<File>,
}

impl TransferLog {
    /// Open (or create) the journal at `path` for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open transfer journal {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry).context("encode journal entry")?;
        line.push(b'\n');
        self.file
            .lock()
            .write_all(&line)
            .context("append journal entry")
    }

    /// Parse a journal. A missing file is an empty journal. Lines that do not
    /// parse (a torn final write, hand edits) are skipped.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<TransferLogEntry>> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("open transfer journal {}", path.display()))
            }
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("read transfer journal {}", path.display()))?;
            if let Ok(entry) = serde_json::from_str::<TransferLogEntry>(line.trim()) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

impl Logger for TransferLog {
    fn received(&self, id: Uuid, peer: SocketAddr, dest: &Path, bytes: u64, _seconds: f64) {
        let entry = TransferLogEntry::now(id, peer, Some(dest.to_path_buf()), TransferStatus::Completed, bytes);
        let _ = self.add_entry(&entry);
    }

    fn failed(&self, id: Uuid, peer: SocketAddr, dest: Option<&Path>, bytes: u64, msg: &str) {
        let mut entry = TransferLogEntry::now(id, peer, dest.map(Path::to_path_buf), TransferStatus::Failed, bytes);
        entry.error = Some(msg.to_string());
        let _ = self.add_entry(&entry);
    }
}
