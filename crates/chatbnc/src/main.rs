use std::path::PathBuf;

use anyhow::Context;
use chatbnc::{Bouncer, Config};
use clap::Parser;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "chatbnc")]
#[command(version)]
#[command(about = "Keeps chat characters logged in and shares them between clients")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = "chatbnc.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    init_tracing(config.debug);

    let bouncer = Bouncer::from_config(&config)
        .await
        .context("starting bouncer")?;
    let addr = bouncer.local_addr()?;
    tracing::info!(%addr, "listening for clients");

    let pool = bouncer.pool().clone();
    tokio::select! {
        result = bouncer.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    pool.shutdown().await;
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_directive = if debug { "chatbnc=debug" } else { "chatbnc=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}
