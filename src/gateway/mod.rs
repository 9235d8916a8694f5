//! Remote sticker set operations
//!
//! The gateway is the only component that mutates sticker sets on Telegram.
//! It classifies every rejection so the conversation engine can decide
//! whether the user may retry (a taken name) or must start over.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::EphemeralArtifact;
use crate::telegram::{ApiError, StickerSet, TelegramClient};
use crate::UserId;

/// Why Telegram declined a sticker set mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    NameTaken,
    UnsupportedFormat,
    NotFound,
    Other,
}

impl RejectionKind {
    /// Classify a Bot API error description
    pub fn classify(description: &str) -> Self {
        let lower = description.to_lowercase();
        if lower.contains("occupied") || lower.contains("already taken") {
            RejectionKind::NameTaken
        } else if lower.contains("stickerset_invalid")
            || lower.contains("sticker set not found")
            || lower.contains("sticker_set_invalid")
        {
            RejectionKind::NotFound
        } else if lower.contains("sticker_png_nopng")
            || lower.contains("wrong file type")
            || lower.contains("sticker_file_invalid")
        {
            RejectionKind::UnsupportedFormat
        } else {
            RejectionKind::Other
        }
    }
}

/// Sticker format of a remote set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickerFormat {
    Static,
    Animated,
    Video,
}

/// What the gateway knows about a remote set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackMetadata {
    pub set_name: String,
    pub format: StickerFormat,
}

impl From<StickerSet> for PackMetadata {
    fn from(set: StickerSet) -> Self {
        let format = if set.has_animated() {
            StickerFormat::Animated
        } else if set.has_video() {
            StickerFormat::Video
        } else {
            StickerFormat::Static
        };

        Self {
            set_name: set.name,
            format,
        }
    }
}

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{reason}")]
    Rejected { kind: RejectionKind, reason: String },

    #[error("{0}")]
    Transport(String),

    #[error("sticker file not found: {0}")]
    MissingArtifact(String),
}

impl GatewayError {
    pub fn rejected(kind: RejectionKind, reason: impl Into<String>) -> Self {
        GatewayError::Rejected {
            kind,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> Option<RejectionKind> {
        match self {
            GatewayError::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<ApiError> for GatewayError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Rejected { description, .. } => GatewayError::Rejected {
                kind: RejectionKind::classify(&description),
                reason: description,
            },
            ApiError::Transport(msg) => GatewayError::Transport(msg),
        }
    }
}

/// Remote sticker set operations
#[async_trait]
pub trait PackGateway: Send + Sync {
    /// Look up a set; `None` when Telegram does not know the name
    async fn query_pack(&self, set_name: &str) -> Result<Option<PackMetadata>, GatewayError>;

    /// Create a set owned by `user_id` whose first sticker is `artifact`
    async fn create_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        display_name: &str,
        artifact: &EphemeralArtifact,
    ) -> Result<(), GatewayError>;

    /// Append `artifact` to an existing static set
    async fn append_to_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        artifact: &EphemeralArtifact,
    ) -> Result<(), GatewayError>;
}

/// Read an artifact's bytes, mapping a vanished file to `MissingArtifact`
async fn read_artifact(path: &Path) -> Result<Vec<u8>, GatewayError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| GatewayError::MissingArtifact(format!("{}: {}", path.display(), e)))
}

/// Telegram-backed gateway
pub struct TelegramPackGateway {
    client: TelegramClient,
    emoji: String,
}

impl TelegramPackGateway {
    pub fn new(client: TelegramClient, emoji: &str) -> Self {
        Self {
            client,
            emoji: emoji.to_string(),
        }
    }
}

#[async_trait]
impl PackGateway for TelegramPackGateway {
    async fn query_pack(&self, set_name: &str) -> Result<Option<PackMetadata>, GatewayError> {
        match self.client.get_sticker_set(set_name).await {
            Ok(set) => Ok(Some(PackMetadata::from(set))),
            Err(ApiError::Rejected { description, .. })
                if RejectionKind::classify(&description) == RejectionKind::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        display_name: &str,
        artifact: &EphemeralArtifact,
    ) -> Result<(), GatewayError> {
        let png = read_artifact(artifact.path()).await?;

        self.client
            .create_new_sticker_set(user_id, set_name, display_name, png, &self.emoji)
            .await
            .map_err(|e| {
                warn!("Failed to create sticker set {}: {}", set_name, e);
                GatewayError::from(e)
            })?;

        info!("Created sticker set {} for user {}", set_name, user_id);
        Ok(())
    }

    async fn append_to_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        artifact: &EphemeralArtifact,
    ) -> Result<(), GatewayError> {
        let png = read_artifact(artifact.path()).await?;

        let metadata = self.query_pack(set_name).await?.ok_or_else(|| {
            GatewayError::rejected(
                RejectionKind::NotFound,
                format!("sticker set {} not found", set_name),
            )
        })?;

        if metadata.format != StickerFormat::Static {
            warn!(
                "Refusing to append to {:?} sticker set {}",
                metadata.format, set_name
            );
            return Err(GatewayError::rejected(
                RejectionKind::UnsupportedFormat,
                "animated and video sticker sets are not supported",
            ));
        }

        self.client
            .add_sticker_to_set(user_id, set_name, png, &self.emoji)
            .await
            .map_err(|e| {
                warn!("Failed to add sticker to {}: {}", set_name, e);
                GatewayError::from(e)
            })?;

        info!("Added sticker to set {} for user {}", set_name, user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rejections() {
        assert_eq!(
            RejectionKind::classify("Bad Request: sticker set name is already occupied"),
            RejectionKind::NameTaken
        );
        assert_eq!(
            RejectionKind::classify("Bad Request: STICKERSET_INVALID"),
            RejectionKind::NotFound
        );
        assert_eq!(
            RejectionKind::classify("Bad Request: STICKER_PNG_NOPNG"),
            RejectionKind::UnsupportedFormat
        );
        assert_eq!(
            RejectionKind::classify("Too Many Requests: retry after 30"),
            RejectionKind::Other
        );
        assert_eq!(RejectionKind::classify("flood limit"), RejectionKind::Other);
    }

    #[test]
    fn test_api_error_conversion() {
        let err = GatewayError::from(ApiError::Rejected {
            description: "Bad Request: sticker set name is already occupied".to_string(),
            error_code: Some(400),
        });
        assert_eq!(err.kind(), Some(RejectionKind::NameTaken));
        assert_eq!(
            err.to_string(),
            "Bad Request: sticker set name is already occupied"
        );

        let err = GatewayError::from(ApiError::Transport("connection refused".to_string()));
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_metadata_format() {
        let set: StickerSet = serde_json::from_str(
            r#"{"name":"a_by_bot","title":"A","stickers":[{"file_id":"x"},{"file_id":"y"}]}"#,
        )
        .unwrap();
        let meta = PackMetadata::from(set);
        assert_eq!(meta.format, StickerFormat::Static);
        assert_eq!(meta.set_name, "a_by_bot");

        let set: StickerSet =
            serde_json::from_str(r#"{"name":"b_by_bot","title":"B","is_video":true}"#).unwrap();
        assert_eq!(PackMetadata::from(set).format, StickerFormat::Video);
    }
}
