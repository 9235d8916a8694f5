//! Common test utilities - deterministic fakes and an engine harness

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

use stickerd::artifacts::{EphemeralArtifact, EphemeralArtifactStore};
use stickerd::conversation::{ConversationEngine, ConversationState, MenuAction, Reply};
use stickerd::gateway::{GatewayError, PackGateway, PackMetadata, RejectionKind, StickerFormat};
use stickerd::generation::{ImageGenerator, ImageProcessor, RateLimiter, StickerGenerationService};
use stickerd::registry::{
    JsonPackRegistry, PackRegistry, RegistryError, StickerPack, StickerRecord,
};
use stickerd::UserId;

pub const BOT: &str = "testbot";

/// Description that makes `FakeGenerator` wait for `release_slow`
pub const SLOW: &str = "slow";

/// Description that makes `FakeGenerator` fail
pub const BROKEN: &str = "broken";

/// Returns the description's bytes as the "image"
#[derive(Default)]
pub struct FakeGenerator {
    pub calls: AtomicUsize,
    pub gate: Notify,
}

impl FakeGenerator {
    pub fn release_slow(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(&self, description: &str) -> anyhow::Result<Vec<u8>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match description {
            BROKEN => Err(anyhow!("upstream returned 500")),
            SLOW => {
                self.gate.notified().await;
                Ok(b"slow".to_vec())
            }
            _ => Ok(format!("{}#{}", description, n).into_bytes()),
        }
    }
}

/// Prefixes the PNG signature; fails when `fail` is set
#[derive(Default)]
pub struct FakeProcessor {
    pub fail: Mutex<bool>,
}

#[async_trait]
impl ImageProcessor for FakeProcessor {
    async fn process(&self, image: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        if *self.fail.lock() {
            return Err(anyhow!("background removal crashed"));
        }
        let mut png = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        png.extend(image);
        Ok(png)
    }
}

/// Scripted gateway that records every call
#[derive(Default)]
pub struct FakeGateway {
    pub create_results: Mutex<VecDeque<GatewayError>>,
    pub append_results: Mutex<VecDeque<GatewayError>>,
    pub creates: Mutex<Vec<(UserId, String, String)>>,
    pub appends: Mutex<Vec<(UserId, String)>>,
}

impl FakeGateway {
    /// Make the next create call fail
    pub fn fail_next_create(&self, kind: RejectionKind, reason: &str) {
        self.create_results
            .lock()
            .push_back(GatewayError::rejected(kind, reason));
    }

    /// Make the next append call fail
    pub fn fail_next_append(&self, kind: RejectionKind, reason: &str) {
        self.append_results
            .lock()
            .push_back(GatewayError::rejected(kind, reason));
    }

    fn check_artifact(artifact: &EphemeralArtifact) -> Result<(), GatewayError> {
        if artifact.path().exists() {
            Ok(())
        } else {
            Err(GatewayError::MissingArtifact(
                artifact.path().display().to_string(),
            ))
        }
    }
}

#[async_trait]
impl PackGateway for FakeGateway {
    async fn query_pack(&self, set_name: &str) -> Result<Option<PackMetadata>, GatewayError> {
        Ok(Some(PackMetadata {
            set_name: set_name.to_string(),
            format: StickerFormat::Static,
        }))
    }

    async fn create_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        display_name: &str,
        artifact: &EphemeralArtifact,
    ) -> Result<(), GatewayError> {
        Self::check_artifact(artifact)?;
        if let Some(err) = self.create_results.lock().pop_front() {
            return Err(err);
        }
        self.creates
            .lock()
            .push((user_id, set_name.to_string(), display_name.to_string()));
        Ok(())
    }

    async fn append_to_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        artifact: &EphemeralArtifact,
    ) -> Result<(), GatewayError> {
        Self::check_artifact(artifact)?;
        if let Some(err) = self.append_results.lock().pop_front() {
            return Err(err);
        }
        self.appends.lock().push((user_id, set_name.to_string()));
        Ok(())
    }
}

/// Registry that mirrors into `inner` but never manages to write its file
pub struct UnwritableRegistry {
    pub inner: Arc<JsonPackRegistry>,
}

#[async_trait]
impl PackRegistry for UnwritableRegistry {
    async fn get_packs(&self, user_id: UserId) -> BTreeMap<String, StickerPack> {
        self.inner.get_packs(user_id).await
    }

    async fn record_created_pack(
        &self,
        user_id: UserId,
        set_name: &str,
        display_name: &str,
    ) -> Result<(), RegistryError> {
        self.inner
            .record_created_pack(user_id, set_name, display_name)
            .await
    }

    async fn record_append(
        &self,
        user_id: UserId,
        set_name: &str,
        marker: StickerRecord,
    ) -> Result<(), RegistryError> {
        self.inner.record_append(user_id, set_name, marker).await
    }

    async fn persist(&self) -> Result<(), RegistryError> {
        Err(RegistryError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only file system",
        )))
    }
}

/// Engine wired to fakes, a temp artifact dir and a temp registry file
pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<ConversationEngine>,
    pub artifacts: Arc<EphemeralArtifactStore>,
    pub registry: Arc<JsonPackRegistry>,
    pub generator: Arc<FakeGenerator>,
    pub processor: Arc<FakeProcessor>,
    pub gateway: Arc<FakeGateway>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Harness whose registry keeps state in memory but fails every write
    pub async fn with_unwritable_registry() -> Self {
        Self::build(true).await
    }

    async fn build(unwritable: bool) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let artifacts = Arc::new(
            EphemeralArtifactStore::new(dir.path().join("artifacts")).expect("artifact store"),
        );
        let registry = Arc::new(
            JsonPackRegistry::open(dir.path().join("sticker_data.json"))
                .await
                .expect("registry"),
        );
        let backend: Arc<dyn PackRegistry> = if unwritable {
            Arc::new(UnwritableRegistry {
                inner: registry.clone(),
            })
        } else {
            registry.clone()
        };

        let generator = Arc::new(FakeGenerator::default());
        let processor = Arc::new(FakeProcessor::default());
        let gateway = Arc::new(FakeGateway::default());

        let generation = StickerGenerationService::new(
            generator.clone(),
            processor.clone(),
            artifacts.clone(),
            RateLimiter::per_minute(1000),
        );
        let engine = Arc::new(ConversationEngine::new(
            generation,
            gateway.clone(),
            backend,
            artifacts.clone(),
            BOT,
        ));

        Self {
            dir,
            engine,
            artifacts,
            registry,
            generator,
            processor,
            gateway,
        }
    }

    pub async fn state(&self, user: UserId) -> ConversationState {
        self.engine.state(user).await
    }

    /// Back at the description prompt with nothing on disk
    pub async fn assert_clean(&self, user: UserId) {
        assert_eq!(self.state(user).await, ConversationState::Description);
        assert_eq!(self.artifacts.live_count(user), 0);
        assert!(self.engine.artifact_path(user).await.is_none());
    }

    /// Generate a sticker and return its file path
    pub async fn generate(&self, user: UserId, description: &str) -> std::path::PathBuf {
        let replies = self.engine.on_text(user, description).await;
        assert_eq!(self.state(user).await, ConversationState::Options);
        image_path(&replies).expect("image reply")
    }

    /// Number of stickers the registry holds for a pack
    pub async fn sticker_count(&self, user: UserId, set_name: &str) -> usize {
        self.registry
            .get_packs(user)
            .await
            .get(set_name)
            .map(|p| p.stickers.len())
            .unwrap_or(0)
    }
}

pub fn image_path(replies: &[Reply]) -> Option<std::path::PathBuf> {
    replies.iter().find_map(|r| match r {
        Reply::Image(path) => Some(path.clone()),
        _ => None,
    })
}

pub fn menu_actions(replies: &[Reply]) -> Vec<MenuAction> {
    replies
        .iter()
        .flat_map(|r| r.buttons())
        .map(|b| b.action.clone())
        .collect()
}

pub fn all_text(replies: &[Reply]) -> String {
    replies
        .iter()
        .map(|r| match r {
            Reply::Text(text) => text.clone(),
            Reply::Menu { text, .. } => text.clone(),
            Reply::Image(path) => path.display().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
