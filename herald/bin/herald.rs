#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::time::Duration;

use clap::Parser;
use herald::{Args, Relay, relay::forward_signals};
use herald_common::logging;
use herald_dispatch::Herald;
use tokio::io::BufReader;

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_level.as_deref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(args));

    // Standard input is read on a blocking thread that may never return
    runtime.shutdown_timeout(Duration::from_millis(100));

    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.dispatch_config()?;
    let herald = Herald::new(&args.url, config)?;
    let relay = Relay::new(herald, args.relay_options());

    let signals = relay.signals();
    tokio::spawn(async move {
        if let Err(e) = forward_signals(signals).await {
            tracing::error!(error = %e, "Unable to listen for signals");
        }
    });

    let report = relay.run(BufReader::new(tokio::io::stdin())).await?;
    if report.timed_out {
        anyhow::bail!(
            "Shutdown timed out with {} notifications unsent",
            report.remaining
        );
    }

    Ok(())
}
