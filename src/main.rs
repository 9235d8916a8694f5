//! stickerd - Telegram sticker generation daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use stickerd::{Bot, Config};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Telegram bot that draws stickers from text descriptions
#[derive(Parser, Debug)]
#[command(name = "stickerd", version, about)]
struct Args {
    /// TOML configuration file (STICKERD_* environment variables override it)
    #[arg(short, long, default_value = "stickerd.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stickerd=info".into());
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = Config::load(Some(&args.config))?;

    let bot = Arc::new(Bot::new(config).await?);

    let signal_bot = bot.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal_bot.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    bot.run().await
}
