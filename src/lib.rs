//! quicdrop library
//!
//! Receives whole files over QUIC: each stream carries a one-byte filename
//! length, the filename, then the file content until the sender finishes
//! the stream.

pub mod cli;
pub mod config;
pub mod log;
pub mod logger;
pub mod net_async;
pub mod protocol;
pub mod protocol_core;
pub mod sink;
pub mod tls;
