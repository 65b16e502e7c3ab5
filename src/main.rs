//! Entry point of the archive-proxy server.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use archive_proxy::{ArchiveProxy, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.proxy_config().context("invalid configuration")?;
    let client = reqwest::Client::builder()
        .timeout(cli.request_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let proxy = ArchiveProxy::new(client, config)?;

    let addr = cli.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "archive-proxy listening");

    axum::serve(listener, proxy.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("archive-proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
