//! Shared CLI definitions for the quicdrop binaries

use clap::Parser;
use std::path::PathBuf;

/// Options for the receiving daemon
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "quicdrop - receive files over QUIC, one stream per file")]
pub struct DaemonOpts {
    /// Bind address (host:port, UDP) [default: 0.0.0.0:8080]
    #[arg(long)]
    pub bind: Option<String>,

    /// Append plain text log lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append one JSON line per finished or failed transfer to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// TOML settings file; command-line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Options for the sending tool
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "quicdrop-send - push one file to a quicdrop server")]
pub struct SendOpts {
    /// Server address (host:port)
    pub server: String,

    /// File to send
    pub path: PathBuf,

    /// Name to announce instead of the file's base name (max 255 bytes)
    #[arg(long)]
    pub name: Option<String>,
}
