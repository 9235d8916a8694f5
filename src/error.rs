//! Failure taxonomy seen by the conversation engine

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::gateway::{GatewayError, RejectionKind};
use crate::generation::{GenerationFailure, GenerationStage};
use crate::registry::RegistryError;

/// Any failure a conversation step can end in
#[derive(Debug, Error)]
pub enum StickerError {
    #[error("image generation failed: {0}")]
    Generation(String),

    #[error("image processing failed: {0}")]
    Processing(String),

    #[error("Telegram declined the request: {reason}")]
    Rejected { kind: RejectionKind, reason: String },

    #[error("could not reach Telegram: {0}")]
    Transport(String),

    #[error("sticker file is missing: {0}")]
    Resource(String),

    #[error("pack registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl StickerError {
    /// The only failure that keeps the user's progress
    pub fn is_name_taken(&self) -> bool {
        matches!(
            self,
            StickerError::Rejected {
                kind: RejectionKind::NameTaken,
                ..
            }
        )
    }

    /// Text shown to the user
    pub fn user_message(&self) -> String {
        match self {
            StickerError::Generation(msg) => {
                format!("Sorry, I couldn't draw that sticker: {}", msg)
            }
            StickerError::Processing(msg) => {
                format!("Sorry, I couldn't cut out the background: {}", msg)
            }
            StickerError::Rejected {
                kind: RejectionKind::NameTaken,
                reason,
            } => format!(
                "That pack name is already taken ({}). Send me another name.",
                reason
            ),
            StickerError::Rejected {
                kind: RejectionKind::UnsupportedFormat,
                reason,
            } => format!(
                "That pack can't take this sticker ({}). Only static sticker packs are supported.",
                reason
            ),
            StickerError::Rejected {
                kind: RejectionKind::NotFound,
                reason,
            } => format!("Telegram couldn't find that pack: {}", reason),
            StickerError::Rejected { reason, .. } => {
                format!("Telegram declined the sticker: {}", reason)
            }
            StickerError::Transport(msg) => {
                format!("I couldn't reach Telegram, please try again later: {}", msg)
            }
            StickerError::Resource(_) => {
                "The sticker file went missing. Please send the description again.".to_string()
            }
            StickerError::Registry(_) => {
                "Something went wrong saving your packs. Please try again.".to_string()
            }
        }
    }
}

impl From<GenerationFailure> for StickerError {
    fn from(failure: GenerationFailure) -> Self {
        match failure.stage {
            GenerationStage::RateLimit | GenerationStage::Generation => {
                StickerError::Generation(failure.message)
            }
            GenerationStage::Processing => StickerError::Processing(failure.message),
            GenerationStage::Storage => StickerError::Resource(failure.message),
        }
    }
}

impl From<GatewayError> for StickerError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected { kind, reason } => StickerError::Rejected { kind, reason },
            GatewayError::Transport(msg) => StickerError::Transport(msg),
            GatewayError::MissingArtifact(msg) => StickerError::Resource(msg),
        }
    }
}

impl From<ArtifactError> for StickerError {
    fn from(err: ArtifactError) -> Self {
        StickerError::Resource(err.to_string())
    }
}
