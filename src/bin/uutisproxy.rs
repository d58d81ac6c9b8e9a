//! Companion proxy daemon: rate-limits callers by IP, then fetches and parses
//! one fixed feed per request. Holds no durable state; the limiter resets
//! with the process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use uutiset::server::{self, ServerState, DEFAULT_FEED_URL};

#[derive(Parser, Debug)]
#[command(
    name = "uutisproxy",
    about = "Rate-limited news feed proxy for the uutiset reader"
)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Feed address to serve
    #[arg(long, default_value = DEFAULT_FEED_URL)]
    feed_url: String,

    /// Upstream fetch timeout in seconds
    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let state = Arc::new(ServerState::new(
        args.feed_url.clone(),
        Duration::from_secs(args.fetch_timeout_secs),
    ));
    let app = server::build_app(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(addr = %args.bind, feed = %args.feed_url, "uutisproxy listening");
    axum::serve(listener, app).await?;

    Ok(())
}
