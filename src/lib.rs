//! stickerd - Telegram sticker generation daemon
//!
//! Turns a text description into a sticker (image model, then background
//! removal) and files it into sticker packs the user owns on Telegram.

pub mod artifacts;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod generation;
pub mod registry;
pub mod telegram;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

pub use config::Config;

use artifacts::EphemeralArtifactStore;
use conversation::ConversationEngine;
use dispatch::Dispatcher;
use gateway::TelegramPackGateway;
use generation::{OpenAiImageGenerator, RateLimiter, RembgProcessor, StickerGenerationService};
use registry::JsonPackRegistry;
use telegram::TelegramClient;

/// Telegram user id
pub type UserId = i64;

/// The stickerd bot instance
pub struct Bot {
    dispatcher: Dispatcher,
    registry: Arc<JsonPackRegistry>,
    artifacts: Arc<EphemeralArtifactStore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Bot {
    /// Open the registry, prepare the artifact directory and wire the services
    pub async fn new(config: Config) -> Result<Self> {
        let client = TelegramClient::new(
            &config.telegram_api_url,
            &config.telegram_token,
            config.http_timeout(),
        )?;
        let poller = TelegramClient::new(
            &config.telegram_api_url,
            &config.telegram_token,
            config.poll_http_timeout(),
        )?;

        let bot_username = match config.bot_username.clone() {
            Some(name) => name,
            None => client
                .get_me()
                .await
                .context("Failed to look up bot identity")?
                .username
                .context("Bot account has no username")?,
        };
        info!("Running as @{}", bot_username);

        let registry = Arc::new(JsonPackRegistry::open(&config.data_file).await?);

        let artifacts = Arc::new(EphemeralArtifactStore::new(&config.artifact_dir)?);
        artifacts.sweep()?;

        let generator = OpenAiImageGenerator::new(
            &config.openai_api_key,
            &config.openai_api_url,
            &config.image_model,
            &config.image_size,
            &config.chat_model,
            config.translate_descriptions,
            config.http_timeout(),
        )?;
        let processor = RembgProcessor::new(&config.rembg_url, config.http_timeout())?;
        let generation = StickerGenerationService::new(
            Arc::new(generator),
            Arc::new(processor),
            artifacts.clone(),
            RateLimiter::per_minute(config.generations_per_minute),
        );

        let gateway = TelegramPackGateway::new(client.clone(), &config.sticker_emoji);
        let engine = Arc::new(ConversationEngine::new(
            generation,
            Arc::new(gateway),
            registry.clone(),
            artifacts.clone(),
            &bot_username,
        ));

        let dispatcher = Dispatcher::new(poller, client, engine, config.poll_timeout_secs);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            dispatcher,
            registry,
            artifacts,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Run until shutdown, then release artifacts and flush the registry
    pub async fn run(&self) -> Result<()> {
        self.dispatcher.run(self.shutdown_rx.clone()).await;

        self.artifacts.release_all();
        self.registry.close().await?;

        info!("stickerd shutdown complete");
        Ok(())
    }

    /// Signal the bot to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
