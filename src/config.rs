//! Daemon configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `STICKERD_*` environment variables (e.g. `STICKERD_TELEGRAM_TOKEN`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "STICKERD_";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot API token from @BotFather
    pub telegram_token: String,
    pub telegram_api_url: String,
    /// Username used in `_by_<bot>` set name suffixes; looked up via getMe when empty
    pub bot_username: Option<String>,

    pub openai_api_key: String,
    pub openai_api_url: String,
    pub image_model: String,
    pub image_size: String,
    pub chat_model: String,
    /// Translate descriptions to English before rendering
    pub translate_descriptions: bool,

    /// Background removal endpoint
    pub rembg_url: String,

    /// Pack registry file
    pub data_file: PathBuf,
    /// Directory for ephemeral sticker files
    pub artifact_dir: PathBuf,

    /// Emoji attached to every sticker
    pub sticker_emoji: String,
    /// Long polling timeout for getUpdates
    pub poll_timeout_secs: u64,
    /// Timeout for every outbound HTTP request
    pub http_timeout_secs: u64,
    /// Per-user generation budget
    pub generations_per_minute: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            telegram_api_url: "https://api.telegram.org".to_string(),
            bot_username: None,
            openai_api_key: String::new(),
            openai_api_url: "https://api.openai.com/v1".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            translate_descriptions: true,
            rembg_url: "http://127.0.0.1:7000/api/remove".to_string(),
            data_file: PathBuf::from("sticker_data.json"),
            artifact_dir: std::env::temp_dir().join("stickerd"),
            sticker_emoji: "🔥".to_string(),
            poll_timeout_secs: 30,
            http_timeout_secs: 120,
            generations_per_minute: 5,
        }
    }
}

impl Config {
    /// Load defaults, then `path` if it exists, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.telegram_token.trim().is_empty() {
            bail!("telegram_token is required (set {}TELEGRAM_TOKEN)", ENV_PREFIX);
        }
        if self.openai_api_key.trim().is_empty() {
            bail!("openai_api_key is required (set {}OPENAI_API_KEY)", ENV_PREFIX);
        }
        if self.sticker_emoji.trim().is_empty() {
            bail!("sticker_emoji must not be empty");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Long polls need headroom over the server-side wait
    pub fn poll_http_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs + 10)
    }
}
