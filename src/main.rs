mod app;
mod core;
mod utils;
mod workers;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::app::Args;
use crate::core::node::Node;
use crate::utils::sos::SignalOfStop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let sos = SignalOfStop::new();
    tokio::spawn(shutdown_signal(sos.clone()));

    let node = Arc::new(Node::new(&args, sos.clone()).context("failed to initialize node")?);
    node.start().await.context("failed to start node")?;

    workers::shell::run(node.clone(), sos.clone()).await?;

    node.stop().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix) and trigger cooperative shutdown.
async fn shutdown_signal(sos: SignalOfStop) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
    sos.cancel();
}
