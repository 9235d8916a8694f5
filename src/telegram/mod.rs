//! Telegram Bot API client
//!
//! Provides:
//! - Sticker set calls (getStickerSet, createNewStickerSet, addStickerToSet)
//! - Long polling and reply calls used by the dispatcher
//!
//! Every Bot API response is an envelope `{ok, result, description}`. A
//! response with `ok: false` is a rejection whose description is passed
//! through verbatim, whatever the HTTP status. Anything that never produced
//! an envelope is a transport error.

mod types;

pub use types::{
    CallbackQuery, Chat, InlineKeyboardButton, InlineKeyboardMarkup, Message, Sticker, StickerSet,
    Update, User,
};

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

/// Multipart field name the sticker file is attached under
const STICKER_ATTACHMENT: &str = "sticker";

/// Bot API call errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Telegram answered with `ok: false`
    #[error("{description}")]
    Rejected {
        description: String,
        error_code: Option<i64>,
    },

    /// The request never produced a Bot API envelope
    #[error("{0}")]
    Transport(String),
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// Telegram Bot API client
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    /// Create a client for `token` against `base_url` (normally https://api.telegram.org)
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Decode a response into the envelope's result
    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to read {} response: {}", method, e)))?;

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            warn!("Unparseable {} response ({}): {}", method, status, body);
            ApiError::Transport(format!("Invalid {} response ({}): {}", method, status, e))
        })?;

        if envelope.ok {
            envelope
                .result
                .ok_or_else(|| ApiError::Transport(format!("{} returned no result", method)))
        } else {
            let description = envelope
                .description
                .unwrap_or_else(|| "Unknown error".to_string());
            debug!("{} rejected: {}", method, description);
            Err(ApiError::Rejected {
                description,
                error_code: envelope.error_code,
            })
        }
    }

    /// POST a JSON body to a Bot API method
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("{} request failed: {}", method, e)))?;

        Self::decode(method, response).await
    }

    /// POST a multipart form to a Bot API method
    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("{} request failed: {}", method, e)))?;

        Self::decode(method, response).await
    }

    fn png_part(png: Vec<u8>, file_name: &str) -> Result<Part, ApiError> {
        Part::bytes(png)
            .file_name(file_name.to_string())
            .mime_str("image/png")
            .map_err(|e| ApiError::Transport(format!("Invalid MIME type: {}", e)))
    }

    fn input_sticker(emoji: &str) -> serde_json::Value {
        json!({
            "sticker": format!("attach://{}", STICKER_ATTACHMENT),
            "format": "static",
            "emoji_list": [emoji],
        })
    }

    /// Identity of the bot behind the token
    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.call("getMe", json!({})).await
    }

    /// Look up a sticker set by its unique name
    pub async fn get_sticker_set(&self, name: &str) -> Result<StickerSet, ApiError> {
        self.call("getStickerSet", json!({ "name": name })).await
    }

    /// Create a sticker set owned by `user_id` with one static sticker
    pub async fn create_new_sticker_set(
        &self,
        user_id: i64,
        name: &str,
        title: &str,
        png: Vec<u8>,
        emoji: &str,
    ) -> Result<bool, ApiError> {
        let stickers = json!([Self::input_sticker(emoji)]);
        let form = Form::new()
            .text("user_id", user_id.to_string())
            .text("name", name.to_string())
            .text("title", title.to_string())
            .text("stickers", stickers.to_string())
            .part(STICKER_ATTACHMENT, Self::png_part(png, "sticker.png")?);

        self.call_multipart("createNewStickerSet", form).await
    }

    /// Append one static sticker to an existing set
    pub async fn add_sticker_to_set(
        &self,
        user_id: i64,
        name: &str,
        png: Vec<u8>,
        emoji: &str,
    ) -> Result<bool, ApiError> {
        let form = Form::new()
            .text("user_id", user_id.to_string())
            .text("name", name.to_string())
            .text("sticker", Self::input_sticker(emoji).to_string())
            .part(STICKER_ATTACHMENT, Self::png_part(png, "sticker.png")?);

        self.call_multipart("addStickerToSet", form).await
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ApiError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    /// Send a text message, optionally with an inline keyboard
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, ApiError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(markup) = markup {
            body["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| ApiError::Transport(format!("Invalid reply markup: {}", e)))?;
        }
        self.call("sendMessage", body).await
    }

    /// Send a PNG as a document so its transparency survives
    pub async fn send_document(
        &self,
        chat_id: i64,
        png: Vec<u8>,
        file_name: &str,
    ) -> Result<Message, ApiError> {
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", Self::png_part(png, file_name)?);

        self.call_multipart("sendDocument", form).await
    }

    /// Show a "working" indicator such as `typing` or `upload_document`
    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<bool, ApiError> {
        self.call(
            "sendChatAction",
            json!({ "chat_id": chat_id, "action": action }),
        )
        .await
    }

    /// Stop the client-side spinner on a tapped inline button
    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<bool, ApiError> {
        self.call(
            "answerCallbackQuery",
            json!({ "callback_query_id": callback_query_id }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TelegramClient {
        TelegramClient::new("https://api.telegram.org/", "123:abc", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_method_url() {
        assert_eq!(
            client().method_url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
    }

    #[test]
    fn test_input_sticker_shape() {
        let sticker = TelegramClient::input_sticker("🔥");
        assert_eq!(sticker["sticker"], "attach://sticker");
        assert_eq!(sticker["format"], "static");
        assert_eq!(sticker["emoji_list"][0], "🔥");
    }

    #[test]
    fn test_envelope_rejection_parses() {
        let envelope: Envelope<bool> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: sticker set name is already occupied"}"#,
        )
        .unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.error_code, Some(400));
        assert!(envelope.description.unwrap().contains("occupied"));
    }
}
