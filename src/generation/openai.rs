//! OpenAI image generation
//!
//! Two-step process:
//! 1. Optionally translate the description to English via chat completions
//! 2. Render it with the images endpoint inside a sticker-style prompt

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ImageGenerator;

/// Chat message for the translation request
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
    response_format: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
}

/// Wrap a description in the sticker art direction
pub fn sticker_prompt(description: &str) -> String {
    format!(
        "A high-quality sticker of {description}, centered and fully inside the frame, \
         outlined with a thick solid white (#FFFFFF) border. \
         Place it on a flat, uniform background color with no gradients, shadows, textures or patterns, \
         and do not reuse the background color anywhere in the sticker itself. \
         No text, no extra elements or decorations outside the sticker. \
         Any art style is fine as long as the subject stands out clearly from the background."
    )
}

/// Image generator backed by the OpenAI API
#[derive(Debug)]
pub struct OpenAiImageGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    image_model: String,
    image_size: String,
    chat_model: String,
    translate: bool,
}

impl OpenAiImageGenerator {
    pub fn new(
        api_key: &str,
        base_url: &str,
        image_model: &str,
        image_size: &str,
        chat_model: &str,
        translate: bool,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            image_model: image_model.to_string(),
            image_size: image_size.to_string(),
            chat_model: chat_model.to_string(),
            translate,
        })
    }

    /// Translate a description to English, leaving English text unchanged
    async fn translate_to_english(&self, text: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![
                ChatMessage::system(
                    "Translate the user's sticker description into English. \
                     If it is already English, repeat it unchanged. \
                     Respond with ONLY the translation.",
                ),
                ChatMessage::user(text),
            ],
            max_tokens: 200,
            temperature: 0.0,
        };

        debug!("Sending translation request: {:?}", request.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Translation request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("OpenAI chat error: {} - {}", status, body);
            bail!("translation API error: {}", status);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse translation response")?;

        chat.choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("no translation returned"))
    }

    /// Download an image the API returned by URL
    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        debug!("Downloading image from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch image")?;

        if !response.status().is_success() {
            bail!("image download HTTP error: {}", response.status());
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read image bytes")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, description: &str) -> anyhow::Result<Vec<u8>> {
        let subject = if self.translate {
            let translated = self.translate_to_english(description).await?;
            debug!("Translated description: {}", translated);
            translated
        } else {
            description.to_string()
        };

        let request = ImageRequest {
            model: self.image_model.clone(),
            prompt: sticker_prompt(&subject),
            n: 1,
            size: self.image_size.clone(),
            response_format: "b64_json".to_string(),
        };

        debug!("Sending image generation request to OpenAI ({})", request.model);

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Image request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("OpenAI images error: {} - {}", status, body);
            bail!("image API error: {}", status);
        }

        let image: ImageResponse = response
            .json()
            .await
            .context("Failed to parse image response")?;

        let data = image
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no image generated"))?;

        match (data.b64_json, data.url) {
            (Some(b64), _) => BASE64
                .decode(b64.as_bytes())
                .context("Invalid base64 image payload"),
            (None, Some(url)) => self.download(&url).await,
            (None, None) => bail!("image response carried no payload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticker_prompt_wraps_description() {
        let prompt = sticker_prompt("a red fox");
        assert!(prompt.starts_with("A high-quality sticker of a red fox"));
        assert!(prompt.contains("white (#FFFFFF) border"));
    }

    #[test]
    fn test_image_response_variants() {
        let b64: ImageResponse =
            serde_json::from_str(r#"{"created":1,"data":[{"b64_json":"aGk="}]}"#).unwrap();
        assert_eq!(b64.data[0].b64_json.as_deref(), Some("aGk="));
        assert!(b64.data[0].url.is_none());

        let url: ImageResponse =
            serde_json::from_str(r#"{"data":[{"url":"https://example.com/a.png","revised_prompt":"x"}]}"#)
                .unwrap();
        assert_eq!(url.data[0].url.as_deref(), Some("https://example.com/a.png"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let generator = OpenAiImageGenerator::new(
            "sk-test",
            "https://api.openai.com/v1/",
            "dall-e-3",
            "1024x1024",
            "gpt-4o-mini",
            true,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(generator.base_url, "https://api.openai.com/v1");
    }
}
