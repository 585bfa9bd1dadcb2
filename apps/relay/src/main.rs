use std::sync::Arc;

use anyhow::{Context, Result};
use capyrelay_server::TcpRelay;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod chat;
mod cli;
mod config;
mod fetch;

use cli::{Cli, Command, ServeArgs};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Chat(args) => chat::run(args).await?,
        Command::Fetch(args) => fetch::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = config::load(&args)?;
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    let relay = TcpRelay::new(config);
    let relay2 = Arc::clone(&relay);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received"),
            Err(error) => warn!(?error, "ctrl-c handler failed"),
        }
        relay2.shutdown();
    });

    relay.run(listener).await?;
    Ok(())
}
