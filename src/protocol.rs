//! Shared protocol constants for the quicdrop stream format

use std::time::Duration;

/// Application protocol identifier negotiated during the TLS handshake.
/// Peers that do not offer it are rejected before any stream is read.
pub const ALPN: &[u8] = b"quic-file-transfer";

/// Default listening address (UDP)
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

// The filename length travels in a single unsigned byte
pub const MAX_FILENAME_LEN: usize = u8::MAX as usize;

/// Separator between the decoded filename and the creation timestamp
pub const NAME_SEPARATOR: &[u8] = b"_";

/// Suffix appended to every destination file
pub const FILE_SUFFIX: &[u8] = b".txt";

/// chrono format for the creation timestamp (second granularity)
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Lifetime of the ephemeral server certificate
pub const CERT_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

// QUIC application close codes sent to the peer when a transfer ends
pub mod close_code {
    pub const DONE: u32 = 0;
    pub const FAILED: u32 = 1;
}
