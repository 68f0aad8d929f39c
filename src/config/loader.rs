use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

use crate::error::{AppError, Result};

use super::schema::AppConfig;

const CONFIG_CHANGE_CAPACITY: usize = 16;

/// Notification sent to subscribers whenever the in-memory configuration snapshot changes.
#[derive(Debug, Clone)]
pub struct ConfigChange;

/// Holds the typed configuration document as a lock-free snapshot.
///
/// The TOML document is loaded once at startup rather than persisted to a
/// live-editable store; the `ArcSwap` + broadcast idiom is kept regardless, so
/// a future `reload()` (e.g. on SIGHUP) is a non-breaking addition rather than
/// a rewrite.
pub struct ConfigStore {
    path: Option<PathBuf>,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    /// Load configuration from `path`, falling back to defaults if the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| AppError::Config(format!("invalid config at {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                AppConfig::default()
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let (change_tx, _) = broadcast::channel(CONFIG_CHANGE_CAPACITY);
        Ok(Self {
            path: Some(path),
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        })
    }

    /// Build a store directly from an in-memory document (used by tests).
    pub fn from_config(config: AppConfig) -> Self {
        let (change_tx, _) = broadcast::channel(CONFIG_CHANGE_CAPACITY);
        Self {
            path: None,
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        }
    }

    /// Lock-free read of the current configuration snapshot.
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Replace the configuration, persist it (if backed by a file) and notify subscribers.
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        if let Some(path) = &self.path {
            let serialized = toml::to_string_pretty(&config)
                .map_err(|e| AppError::Config(format!("failed to serialize config: {e}")))?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, serialized).await?;
        }
        self.cache.store(Arc::new(config));
        let _ = self.change_tx.send(ConfigChange);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.get().server.port, 8002);
    }

    #[tokio::test]
    async fn set_persists_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = ConfigStore::load(&path).await.unwrap();
        let mut rx = store.subscribe();

        let mut config = (*store.get()).clone();
        config.server.port = 9000;
        store.set(config).await.unwrap();

        assert_eq!(store.get().server.port, 9000);
        assert!(rx.try_recv().is_ok());

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get().server.port, 9000);
    }
}
