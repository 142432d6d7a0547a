use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Config;

/// Live-reloadable configuration holder.
///
/// Wraps `Config` in an `ArcSwap` so readers never block and writers
/// atomically swap the pointer. Role and prompt configuration must be
/// hot-reloadable without a restart; anything holding a `ConfigHandle` picks
/// up the new snapshot on its next `load()`.
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
    path: PathBuf,
}

impl ConfigHandle {
    /// Create a new handle seeded with `config`.
    pub fn new(config: Config) -> Self {
        let path = config.config_path.clone();
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
            path,
        }
    }

    /// Load current config snapshot. Lock-free.
    pub fn load(&self) -> arc_swap::Guard<Arc<Config>> {
        self.inner.load()
    }

    /// Return a clone of the current `Arc<Config>`.
    pub fn load_full(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Reload config from disk, atomically swapping the active snapshot.
    ///
    /// Returns `Ok(())` on success, propagating parse/validation errors.
    pub fn reload(&self) -> anyhow::Result<()> {
        let fresh = load_from_path(&self.path)?;
        self.inner.store(Arc::new(fresh));
        tracing::info!(path = %self.path.display(), "config hot-reloaded");
        Ok(())
    }

    /// Manually swap in a new config (e.g. after programmatic mutation).
    pub fn store(&self, config: Config) {
        self.inner.store(Arc::new(config));
    }

    /// Config file path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for ConfigHandle {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            path: self.path.clone(),
        }
    }
}

fn load_from_path(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let mut config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.config_path = path.to_path_buf();
    if let Some(parent) = path.parent() {
        config.workspace_dir = parent.to_path_buf();
    }
    config.validate()?;
    Ok(config)
}
