//! Registry of download engines keyed by numeric id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::engine::{DownloadEngine, EngineState};
use crate::error::{DownloadError, Result};
use crate::progress::Progress;

struct Registry {
    engines: HashMap<u32, Arc<DownloadEngine>>,
    next_id: u32,
}

/// Owns a set of engines and dispenses opaque ids for them.
///
/// One mutex covers the whole registry; operations clone the engine
/// handle out and release the lock before doing anything slow.
pub struct DownloadManager {
    registry: Mutex<Registry>,
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadManager {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                engines: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a new download and return its id.
    ///
    /// The URL is validated here; the network is not touched until
    /// [`DownloadManager::start`].
    pub async fn create(&self, url: &str, output: Option<PathBuf>) -> Result<u32> {
        let engine = DownloadEngine::new();
        engine.set_url(url)?;
        if let Some(path) = output {
            engine.output_path(path);
        }

        let mut registry = self.registry.lock().await;
        let id = registry.next_id;
        registry.next_id += 1;
        registry.engines.insert(id, engine);
        debug!(id, url, "registered download");
        Ok(id)
    }

    pub async fn start(&self, id: u32) -> Result<()> {
        self.get(id).await?.start().await
    }

    pub async fn pause(&self, id: u32) -> Result<()> {
        self.get(id).await?.pause().await
    }

    pub async fn resume(&self, id: u32) -> Result<()> {
        self.get(id).await?.resume().await
    }

    pub async fn cancel(&self, id: u32) -> Result<()> {
        self.get(id).await?.cancel().await;
        Ok(())
    }

    pub async fn progress(&self, id: u32) -> Result<Progress> {
        Ok(self.get(id).await?.progress())
    }

    pub async fn state(&self, id: u32) -> Result<EngineState> {
        Ok(self.get(id).await?.state())
    }

    /// Drop a download from the registry.
    ///
    /// A no-op returning `false` unless the engine is in a terminal
    /// state; active downloads must be cancelled first.
    pub async fn remove(&self, id: u32) -> bool {
        let mut registry = self.registry.lock().await;
        let terminal = registry
            .engines
            .get(&id)
            .map(|e| e.state().is_terminal())
            .unwrap_or(false);
        if terminal {
            registry.engines.remove(&id);
            debug!(id, "removed download");
        }
        terminal
    }

    /// Ids of every registered download, ascending.
    pub async fn downloads(&self) -> Vec<u32> {
        let registry = self.registry.lock().await;
        let mut ids: Vec<u32> = registry.engines.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Borrow the engine behind an id, e.g. to install a callback.
    pub async fn get(&self, id: u32) -> Result<Arc<DownloadEngine>> {
        self.registry
            .lock()
            .await
            .engines
            .get(&id)
            .cloned()
            .ok_or_else(|| DownloadError::Network(format!("no download with id {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_dense_from_one() {
        let manager = DownloadManager::new();
        let a = manager.create("https://example.com/a.bin", None).await.unwrap();
        let b = manager.create("https://example.com/b.bin", None).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(manager.downloads().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn create_rejects_bad_urls() {
        let manager = DownloadManager::new();
        assert!(manager.create("not a url", None).await.is_err());
        assert!(manager.downloads().await.is_empty());
    }

    #[tokio::test]
    async fn remove_is_noop_for_active_downloads() {
        let manager = DownloadManager::new();
        let id = manager.create("https://example.com/a.bin", None).await.unwrap();

        // Idle is not terminal, so removal must refuse.
        assert!(!manager.remove(id).await);
        assert_eq!(manager.downloads().await, vec![id]);

        manager.cancel(id).await.unwrap();
        assert!(manager.remove(id).await);
        assert!(manager.downloads().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_error() {
        let manager = DownloadManager::new();
        assert!(manager.start(42).await.is_err());
        assert!(manager.progress(42).await.is_err());
        assert!(!manager.remove(42).await);
    }
}
