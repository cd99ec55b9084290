//! ChronoNews SSR server
//!
//! Server mode (default):
//!   chrononews-ssr [serve] [--mode production] [--port 5173]
//!
//! Single-shot mode, dispatches one URL and prints the body to stdout:
//!   chrononews-ssr render /post/5

use anyhow::Result;
use chrononews_ssr::{server, Cli, Command, Config, Protocol, RequestContext};
use clap::Parser;
use std::io::Write;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chrononews_ssr=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_single_shot(config: &Config, url: &str) -> Result<()> {
    let state = server::build_state(config).await?;
    let ctx = RequestContext::new(url, format!("localhost:{}", config.port), Protocol::Http);

    let response = state.respond(&ctx).await;
    let status = response.status();
    let location = response
        .headers()
        .get(axum::http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    tracing::info!(%status, ?location, "rendered {}", url);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let mut stdout = std::io::stdout();
    stdout.write_all(&body)?;
    stdout.flush()?;

    if status.is_server_error() {
        anyhow::bail!("render of {} failed with {}", url, status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(&cli.config).await,
        Command::Render { url } => run_single_shot(&cli.config, &url).await,
    }
}
