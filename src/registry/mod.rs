//! Sticker pack registry
//!
//! A local mirror of the sticker sets this bot created on Telegram, keyed by
//! user and set name. The registry never gets ahead of Telegram: callers
//! record a pack or a sticker only after the remote call succeeded, then
//! call `persist` to rewrite the backing file.
//!
//! On-disk layout (pretty JSON, UTF-8):
//!
//! ```json
//! { "42": { "foxes_42_by_bot": { "display_name": "Foxes",
//!                                "stickers": [{ "status": "added", "added_at": "..." }] } } }
//! ```

pub mod naming;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::UserId;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown pack {set_name} for user {user_id}")]
    UnknownPack { user_id: UserId, set_name: String },

    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("registry file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Marker for one sticker successfully attached to a pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRecord {
    pub status: String,
    pub added_at: DateTime<Utc>,
}

impl StickerRecord {
    pub fn added_now() -> Self {
        Self {
            status: "added".to_string(),
            added_at: Utc::now(),
        }
    }
}

/// A sticker set this bot created for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerPack {
    /// Map key in the store, restored on load
    #[serde(skip)]
    pub owner_user_id: UserId,
    /// Map key in the store, restored on load
    #[serde(skip)]
    pub set_name: String,
    pub display_name: String,
    #[serde(default)]
    pub stickers: Vec<StickerRecord>,
}

type PackMap = BTreeMap<UserId, BTreeMap<String, StickerPack>>;

/// Persistent user → set name → pack mapping
#[async_trait]
pub trait PackRegistry: Send + Sync {
    /// All packs owned by `user_id`, keyed by set name
    async fn get_packs(&self, user_id: UserId) -> BTreeMap<String, StickerPack>;

    /// Record a pack Telegram just created.
    ///
    /// An already registered name keeps its sticker records; only the display
    /// name is refreshed.
    async fn record_created_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        display_name: &str,
    ) -> Result<(), RegistryError>;

    /// Record a sticker Telegram just appended
    async fn record_append(
        &self,
        user_id: UserId,
        set_name: &str,
        marker: StickerRecord,
    ) -> Result<(), RegistryError>;

    /// Rewrite the backing store with the full in-memory state
    async fn persist(&self) -> Result<(), RegistryError>;
}

/// JSON-file registry
pub struct JsonPackRegistry {
    path: PathBuf,
    packs: RwLock<PackMap>,
    write_lock: Mutex<()>,
}

impl JsonPackRegistry {
    /// Load the registry from `path`.
    ///
    /// A missing file yields an empty registry. A file that exists but does
    /// not parse is an error so that it never gets overwritten with nothing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();

        let packs = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => PackMap::new(),
            Ok(contents) => {
                let mut packs: PackMap = serde_json::from_str(&contents)?;
                for (user_id, user_packs) in packs.iter_mut() {
                    for (set_name, pack) in user_packs.iter_mut() {
                        pack.owner_user_id = *user_id;
                        pack.set_name = set_name.clone();
                    }
                }
                packs
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => PackMap::new(),
            Err(e) => return Err(e.into()),
        };

        let pack_count: usize = packs.values().map(|p| p.len()).sum();
        info!(
            "Opened pack registry {} ({} users, {} packs)",
            path.display(),
            packs.len(),
            pack_count
        );

        Ok(Self {
            path,
            packs: RwLock::new(packs),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the registry one last time
    pub async fn close(&self) -> Result<(), RegistryError> {
        self.persist().await?;
        info!("Closed pack registry {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "registry".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PackRegistry for JsonPackRegistry {
    async fn get_packs(&self, user_id: UserId) -> BTreeMap<String, StickerPack> {
        self.packs
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn record_created_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        display_name: &str,
    ) -> Result<(), RegistryError> {
        let mut packs = self.packs.write().await;
        let user_packs = packs.entry(user_id).or_default();

        match user_packs.get_mut(set_name) {
            Some(existing) => {
                warn!(
                    "Pack {} for user {} already registered with {} stickers, keeping them",
                    set_name,
                    user_id,
                    existing.stickers.len()
                );
                existing.display_name = display_name.to_string();
            }
            None => {
                user_packs.insert(
                    set_name.to_string(),
                    StickerPack {
                        owner_user_id: user_id,
                        set_name: set_name.to_string(),
                        display_name: display_name.to_string(),
                        stickers: Vec::new(),
                    },
                );
                debug!("Recorded pack {} for user {}", set_name, user_id);
            }
        }
        Ok(())
    }

    async fn record_append(
        &self,
        user_id: UserId,
        set_name: &str,
        marker: StickerRecord,
    ) -> Result<(), RegistryError> {
        let mut packs = self.packs.write().await;
        let pack = packs
            .get_mut(&user_id)
            .and_then(|p| p.get_mut(set_name))
            .ok_or_else(|| RegistryError::UnknownPack {
                user_id,
                set_name: set_name.to_string(),
            })?;

        pack.stickers.push(marker);
        debug!(
            "Recorded sticker #{} in pack {} for user {}",
            pack.stickers.len(),
            set_name,
            user_id
        );
        Ok(())
    }

    async fn persist(&self) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;

        let json = {
            let packs = self.packs.read().await;
            serde_json::to_string_pretty(&*packs)?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Rename over the old file so a crash mid-write leaves it intact
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, json.as_bytes()).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("Registry saved to {}", self.path.display());
        Ok(())
    }
}
