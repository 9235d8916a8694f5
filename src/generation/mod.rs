//! Sticker generation pipeline
//!
//! Strictly sequential, no partial retry:
//! 1. Image model renders the description
//! 2. Background removal service cuts out the subject, which is then trimmed
//!    and scaled to the 512px sticker canvas
//! 3. The result is written to a fresh ephemeral artifact
//!
//! Any failing step short-circuits with a `GenerationFailure` naming the stage.

mod openai;
mod rate_limit;
mod rembg;
mod sticker;

pub use openai::OpenAiImageGenerator;
pub use rate_limit::RateLimiter;
pub use rembg::RembgProcessor;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifacts::{EphemeralArtifact, EphemeralArtifactStore};
use crate::UserId;

/// Turns a text description into a raster image
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, description: &str) -> anyhow::Result<Vec<u8>>;
}

/// Removes the background of an image and crops it to sticker size, returning PNG bytes
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn process(&self, image: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// Pipeline step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    RateLimit,
    Generation,
    Processing,
    Storage,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationStage::RateLimit => "rate_limit",
            GenerationStage::Generation => "generation",
            GenerationStage::Processing => "processing",
            GenerationStage::Storage => "storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {message}")]
pub struct GenerationFailure {
    pub stage: GenerationStage,
    pub message: String,
}

impl GenerationFailure {
    fn new(stage: GenerationStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Sequences generation, processing and artifact allocation
pub struct StickerGenerationService {
    generator: Arc<dyn ImageGenerator>,
    processor: Arc<dyn ImageProcessor>,
    artifacts: Arc<EphemeralArtifactStore>,
    rate_limiter: RateLimiter,
}

impl StickerGenerationService {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        processor: Arc<dyn ImageProcessor>,
        artifacts: Arc<EphemeralArtifactStore>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            generator,
            processor,
            artifacts,
            rate_limiter,
        }
    }

    /// Produce one new artifact owned by `owner`.
    ///
    /// The caller must release the session's previous artifact first.
    pub async fn generate(
        &self,
        owner: UserId,
        description: &str,
    ) -> Result<EphemeralArtifact, GenerationFailure> {
        if !self.rate_limiter.consume(owner).await {
            warn!("Generation rate limit hit for user {}", owner);
            return Err(GenerationFailure::new(
                GenerationStage::RateLimit,
                "too many stickers requested, try again in a minute",
            ));
        }

        info!("Generating sticker for user {}: {}", owner, description);

        let image = self
            .generator
            .generate(description)
            .await
            .map_err(|e| GenerationFailure::new(GenerationStage::Generation, format!("{:#}", e)))?;
        debug!("Generated image ({} bytes)", image.len());

        let sticker = self
            .processor
            .process(image)
            .await
            .map_err(|e| GenerationFailure::new(GenerationStage::Processing, format!("{:#}", e)))?;
        debug!("Processed sticker ({} bytes)", sticker.len());

        let artifact = self
            .artifacts
            .create(owner, &sticker)
            .map_err(|e| GenerationFailure::new(GenerationStage::Storage, e.to_string()))?;

        info!(
            "Sticker ready for user {} at {}",
            owner,
            artifact.path().display()
        );
        Ok(artifact)
    }
}
