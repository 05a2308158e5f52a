//! Temporary-unlock state shared by the decision engine, device signals and
//! the authentication callback. Every mutation goes through one mutex.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct UnlockCache {
    state: Mutex<CacheState>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheState {
    unlock_timestamps: HashMap<String, i64>,
    bypassed_package: Option<String>,
}

/// Point-in-time copy for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    pub unlocked_apps: Vec<String>,
    pub bypassed_package: Option<String>,
}

impl CacheState {
    pub fn bypassed_package(&self) -> Option<&str> {
        self.bypassed_package.as_deref()
    }

    pub fn set_bypassed(&mut self, package: &str) {
        self.bypassed_package = Some(package.to_string());
    }

    pub fn clear_bypassed(&mut self) {
        self.bypassed_package = None;
    }

    pub fn unlocked_at(&self, package: &str) -> Option<i64> {
        self.unlock_timestamps.get(package).copied()
    }

    pub fn remove_unlock(&mut self, package: &str) -> Option<i64> {
        self.unlock_timestamps.remove(package)
    }
}

impl UnlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authentication succeeded for `package` at `at_millis`. The package
    /// also becomes the bypassed one so it is not re-prompted while it stays
    /// in the foreground.
    pub fn record_unlock(&self, package: &str, at_millis: i64) {
        let mut state = self.state.lock();
        state
            .unlock_timestamps
            .insert(package.to_string(), at_millis);
        state.bypassed_package = Some(package.to_string());
        debug!(package, at_millis, "unlock recorded");
    }

    /// Screen off or explicit reset: drop every unlock and the bypass.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.unlock_timestamps.clear();
        state.bypassed_package = None;
        debug!("unlock cache cleared");
    }

    pub fn clear_bypassed(&self) {
        self.state.lock().bypassed_package = None;
    }

    pub fn bypassed_package(&self) -> Option<String> {
        self.state.lock().bypassed_package.clone()
    }

    pub fn unlocked_at(&self, package: &str) -> Option<i64> {
        self.state.lock().unlocked_at(package)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.lock();
        let mut unlocked_apps: Vec<String> = state.unlock_timestamps.keys().cloned().collect();
        unlocked_apps.sort();
        CacheSnapshot {
            unlocked_apps,
            bypassed_package: state.bypassed_package.clone(),
        }
    }

    /// Run `f` with the cache locked. Used by the decision engine so its
    /// read-modify-write executes as one unit.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }
}
