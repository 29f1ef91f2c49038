use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;

use quicdrop::cli::SendOpts;
use quicdrop::net_async;

fn main() -> Result<()> {
    let opts = SendOpts::parse();

    let name = match opts.name {
        Some(n) => n,
        None => opts
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("no file name in {}", opts.path.display()))?,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        let started = Instant::now();
        let mut file = tokio::fs::File::open(&opts.path)
            .await
            .with_context(|| format!("open {}", opts.path.display()))?;
        let bytes = net_async::client::send_file(&opts.server, name.as_bytes(), &mut file).await?;
        println!(
            "sent {} ({} bytes) to {} in {:.3}s",
            name,
            bytes,
            opts.server,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    })
}
