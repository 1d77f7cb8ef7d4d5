//! Candlecast server: intraday market-data and forecasting service.
//!
//! # Usage
//! ```sh
//! DATABASE_URL=sqlite://data/candlecast.db cargo run
//! ```
//! Configuration is environment-driven; see `config.rs` for the knobs.

use anyhow::Result;
use candlecast::application::system::Application;
use candlecast::config::Config;
use candlecast::interfaces::http::build_router;
use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "candlecast", about = "Intraday market-data and forecasting service")]
struct Cli {
    /// Override BIND_ADDR from the environment.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("candlecast {} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    info!(
        "config: providers={:?} db={} bind={}",
        config.provider_order, config.database_url, config.bind_addr
    );

    let app = Application::build(config.clone()).await?;
    app.start_background();

    let router = build_router(app);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
