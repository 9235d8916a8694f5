//! Ephemeral sticker artifacts
//!
//! Every generated sticker lives in a temporary PNG file until the user
//! commits it to a pack, skips it, regenerates it, or cancels. The store
//! tracks each live file by handle and owner so the conversation engine can
//! prove a session holds nothing once it returns to the description prompt.
//!
//! Files are created in a dedicated directory with a fixed prefix, which lets
//! `sweep` clear leftovers from a crashed previous run.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::UserId;

/// Filename prefix for every artifact the store creates
const FILE_PREFIX: &str = "sticker-";

/// Filename suffix for every artifact the store creates
const FILE_SUFFIX: &str = ".png";

/// Artifact store errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to write sticker file: {0}")]
    Io(#[from] io::Error),
}

/// Opaque reference to one live artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactHandle {
    id: Uuid,
}

/// A sticker-ready image on disk, owned by exactly one session
#[derive(Debug)]
pub struct EphemeralArtifact {
    handle: ArtifactHandle,
    path: PathBuf,
}

impl EphemeralArtifact {
    pub fn handle(&self) -> ArtifactHandle {
        self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
struct LiveEntry {
    owner: UserId,
    path: PathBuf,
}

/// Tracks the on-disk lifetime of generated sticker files
#[derive(Debug)]
pub struct EphemeralArtifactStore {
    dir: PathBuf,
    live: Mutex<HashMap<Uuid, LiveEntry>>,
}

impl EphemeralArtifactStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            live: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a new temporary file owned by `owner`.
    ///
    /// If writing fails the partially written file is removed before the
    /// error is returned.
    pub fn create(&self, owner: UserId, bytes: &[u8]) -> Result<EphemeralArtifact, ArtifactError> {
        let mut file = tempfile::Builder::new()
            .prefix(FILE_PREFIX)
            .suffix(FILE_SUFFIX)
            .tempfile_in(&self.dir)?;

        // NamedTempFile deletes itself on drop until it is kept
        file.write_all(bytes)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| ArtifactError::Io(e.error))?;

        let handle = ArtifactHandle { id: Uuid::new_v4() };
        self.live.lock().insert(
            handle.id,
            LiveEntry {
                owner,
                path: path.clone(),
            },
        );

        debug!(
            "Created artifact {} for user {} at {} ({} bytes)",
            handle.id,
            owner,
            path.display(),
            bytes.len()
        );

        Ok(EphemeralArtifact {
            handle,
            path,
        })
    }

    /// Path of a live artifact, or None once released
    pub fn path(&self, handle: &ArtifactHandle) -> Option<PathBuf> {
        self.live.lock().get(&handle.id).map(|e| e.path.clone())
    }

    /// Delete the artifact's file.
    ///
    /// Releasing an unknown or already released handle is a no-op. Returns
    /// true if a live artifact was released.
    pub fn release(&self, handle: &ArtifactHandle) -> bool {
        let entry = self.live.lock().remove(&handle.id);
        match entry {
            Some(entry) => {
                remove_file_quietly(&entry.path);
                debug!("Released artifact {} for user {}", handle.id, entry.owner);
                true
            }
            None => false,
        }
    }

    /// Number of live artifacts held for `owner`
    pub fn live_count(&self, owner: UserId) -> usize {
        self.live
            .lock()
            .values()
            .filter(|e| e.owner == owner)
            .count()
    }

    /// Release every live artifact (shutdown path)
    pub fn release_all(&self) -> usize {
        let drained: Vec<LiveEntry> = self.live.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            remove_file_quietly(&entry.path);
        }
        if !drained.is_empty() {
            info!("Released {} live artifacts", drained.len());
        }
        drained.len()
    }

    /// Delete sticker files in the store directory that no handle refers to.
    ///
    /// Run once at startup to clear files orphaned by a crash.
    pub fn sweep(&self) -> Result<usize, ArtifactError> {
        let live: Vec<PathBuf> = self.live.lock().values().map(|e| e.path.clone()).collect();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                .unwrap_or(false);

            if is_artifact && !live.contains(&path) {
                remove_file_quietly(&path);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(
                "Swept {} stale artifacts from {}",
                removed,
                self.dir.display()
            );
        }
        Ok(removed)
    }
}

fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove artifact {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, EphemeralArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = EphemeralArtifactStore::new(dir.path().join("artifacts")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_writes_file() {
        let (_dir, store) = store();
        let artifact = store.create(7, b"png-bytes").unwrap();

        assert!(artifact.path().exists());
        assert_eq!(fs::read(artifact.path()).unwrap(), b"png-bytes");
        assert_eq!(store.live_count(7), 1);
        assert_eq!(
            store.path(&artifact.handle()).as_deref(),
            Some(artifact.path())
        );
    }

    #[test]
    fn test_release_is_idempotent() {
        let (_dir, store) = store();
        let artifact = store.create(7, b"x").unwrap();
        let handle = artifact.handle();

        assert!(store.release(&handle));
        assert!(!artifact.path().exists());
        assert_eq!(store.live_count(7), 0);
        assert!(store.path(&handle).is_none());

        // Second release is a no-op
        assert!(!store.release(&handle));
    }

    #[test]
    fn test_release_tolerates_missing_file() {
        let (_dir, store) = store();
        let artifact = store.create(7, b"x").unwrap();
        fs::remove_file(artifact.path()).unwrap();

        assert!(store.release(&artifact.handle()));
        assert_eq!(store.live_count(7), 0);
    }

    #[test]
    fn test_live_count_is_per_owner() {
        let (_dir, store) = store();
        store.create(1, b"a").unwrap();
        store.create(1, b"b").unwrap();
        store.create(2, b"c").unwrap();

        assert_eq!(store.live_count(1), 2);
        assert_eq!(store.live_count(2), 1);
        assert_eq!(store.live_count(3), 0);
    }

    #[test]
    fn test_release_all() {
        let (_dir, store) = store();
        let a = store.create(1, b"a").unwrap();
        let b = store.create(2, b"b").unwrap();

        assert_eq!(store.release_all(), 2);
        assert!(!a.path().exists());
        assert!(!b.path().exists());
        assert_eq!(store.live_count(1), 0);
    }

    #[test]
    fn test_sweep_removes_only_orphans() {
        let (_dir, store) = store();
        let live = store.create(1, b"live").unwrap();

        let orphan = store.dir().join("sticker-orphan.png");
        fs::write(&orphan, b"old").unwrap();
        let unrelated = store.dir().join("notes.txt");
        fs::write(&unrelated, b"keep").unwrap();

        assert_eq!(store.sweep().unwrap(), 1);
        assert!(!orphan.exists());
        assert!(unrelated.exists());
        assert!(live.path().exists());
    }
}
