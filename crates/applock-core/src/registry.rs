//! Locked-app registry: the read interface the engine consults on every
//! decision, plus a settings-backed implementation persisted as JSON.

use parking_lot::{Mutex, RwLock};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::SettingsError;
use crate::settings::{LockSettings, UnlockPolicy};

/// Read side of the locked-app registry. Implementations must be cheap and
/// non-blocking; polling detectors call these several times per second.
pub trait LockRegistry: Send + Sync {
    fn is_locked(&self, package: &str) -> bool;
    fn policy(&self) -> UnlockPolicy;
}

/// Registry over [`LockSettings`], optionally persisted to a JSON file.
pub struct SettingsRegistry {
    settings: RwLock<LockSettings>,
    /// Serializes writers so the snapshot lock is only held for the swap.
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

impl SettingsRegistry {
    pub fn in_memory(settings: LockSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            writer: Mutex::new(()),
            path: None,
        }
    }

    /// Load settings from `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let settings = if path.exists() {
            let data = std::fs::read(&path)?;
            let settings: LockSettings = serde_json::from_slice(&data)?;
            settings.validate()?;
            settings
        } else {
            debug!(path = %path.display(), "settings file missing, using defaults");
            LockSettings::default()
        };
        Ok(Self {
            settings: RwLock::new(settings),
            writer: Mutex::new(()),
            path: Some(path),
        })
    }

    pub fn settings(&self) -> LockSettings {
        self.settings.read().clone()
    }

    /// Apply `change` to a copy of the settings, validate, persist, then
    /// publish. The in-memory copy is untouched if any step fails.
    pub fn update<F>(&self, change: F) -> Result<LockSettings, SettingsError>
    where
        F: FnOnce(&mut LockSettings),
    {
        let _writer = self.writer.lock();
        let mut next = self.settings.read().clone();
        change(&mut next);
        next.validate()?;
        if let Some(path) = &self.path {
            save_settings(path, &next)?;
        }
        *self.settings.write() = next.clone();
        info!(
            locked_apps = next.locked_apps.len(),
            backend = %next.active_backend,
            "settings updated"
        );
        Ok(next)
    }

    pub fn lock_app(&self, package: &str) -> Result<LockSettings, SettingsError> {
        self.update(|s| {
            s.locked_apps.insert(package.to_string());
        })
    }

    pub fn unlock_app(&self, package: &str) -> Result<LockSettings, SettingsError> {
        self.update(|s| {
            s.locked_apps.remove(package);
        })
    }
}

impl LockRegistry for SettingsRegistry {
    fn is_locked(&self, package: &str) -> bool {
        self.settings.read().locked_apps.contains(package)
    }

    fn policy(&self) -> UnlockPolicy {
        self.settings.read().policy()
    }
}

/// Write settings via a temp file in the same directory and rename over the
/// target.
pub fn save_settings(path: &Path, settings: &LockSettings) -> Result<(), SettingsError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    let data = serde_json::to_vec_pretty(settings)?;
    tmp.write_all(&data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SettingsError::Io(e.error))?;
    Ok(())
}
