//! Background removal through a rembg HTTP server
//!
//! The server (`rembg s`) cuts out the subject. The cut-out is then trimmed
//! and scaled locally to the sticker canvas (see `sticker::fit_to_sticker`).

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

use super::sticker::fit_to_sticker;
use super::ImageProcessor;

/// Image processor backed by a rembg server
#[derive(Debug)]
pub struct RembgProcessor {
    client: Client,
    url: String,
}

impl RembgProcessor {
    /// `url` is the full removal endpoint, e.g. http://127.0.0.1:7000/api/remove
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn remove_background(&self, image: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        debug!("Removing background ({} bytes)", image.len());

        let part = Part::bytes(image)
            .file_name("image.png")
            .mime_str("image/png")
            .context("Invalid MIME type")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .context("Background removal request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Background removal error: {} - {}", status, body);
            bail!("background removal HTTP error: {}", status);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read processed image")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageProcessor for RembgProcessor {
    async fn process(&self, image: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let cutout = self.remove_background(image).await?;

        // Decoding and resampling a 1024px image is CPU-bound
        let sticker = tokio::task::spawn_blocking(move || fit_to_sticker(&cutout))
            .await
            .context("Sticker fitting task failed")??;

        debug!("Sticker fitted ({} bytes)", sticker.len());
        Ok(sticker)
    }
}
