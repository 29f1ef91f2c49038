//! quicdrop daemon: accepts QUIC connections and writes each received stream
//! to a file in the current working directory.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

use quicdrop::cli::DaemonOpts;
use quicdrop::config::Settings;
use quicdrop::log::TransferLog;
use quicdrop::logger::{ConsoleLogger, Logger, TeeLogger, TextLogger};
use quicdrop::net_async;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("install Ctrl-C handler")?;

    let opts = DaemonOpts::parse();
    let settings = Settings::resolve(&opts)?;

    let mut loggers: Vec<Arc<dyn Logger>> = vec![Arc::new(ConsoleLogger)];
    if let Some(ref p) = settings.log_file {
        loggers.push(Arc::new(TextLogger::new(p)?));
    }
    if let Some(ref p) = settings.journal {
        loggers.push(Arc::new(TransferLog::open(p)?));
    }
    let logger: Arc<dyn Logger> = Arc::new(TeeLogger(loggers));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(net_async::server::serve(&settings.bind, Path::new("."), logger))
}
