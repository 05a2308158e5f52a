use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::SettingsError;

/// Unlock durations offered to the user, in minutes. `0` locks on every
/// foreground transition.
pub const UNLOCK_DURATION_PRESETS: [u32; 6] = [0, 1, 5, 15, 30, 60];

pub const DEFAULT_MAX_FORCED_RESTARTS: u32 = 3;

/// Foreground detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Backend {
    Accessibility,
    UsageStats,
    Privileged,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Accessibility, Backend::UsageStats, Backend::Privileged];
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Accessibility => "accessibility",
            Backend::UsageStats => "usage-stats",
            Backend::Privileged => "privileged",
        };
        f.write_str(name)
    }
}

/// Per-install policy read on every decision and at backend start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockPolicy {
    pub unlock_duration_minutes: u32,
    pub active_backend: Backend,
    pub fallback_backend: Option<Backend>,
    pub anti_uninstall_enabled: bool,
    pub privileged_experimental: bool,
    pub max_forced_restarts: u32,
}

impl UnlockPolicy {
    pub fn grace_window_millis(&self) -> i64 {
        i64::from(self.unlock_duration_minutes) * 60 * 1000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default)]
    pub locked_apps: BTreeSet<String>,
    #[serde(default)]
    pub unlock_duration_minutes: u32,
    pub active_backend: Backend,
    #[serde(default)]
    pub fallback_backend: Option<Backend>,
    #[serde(default)]
    pub anti_uninstall_enabled: bool,
    #[serde(default)]
    pub privileged_experimental: bool,
    #[serde(default = "default_max_forced_restarts")]
    pub max_forced_restarts: u32,
}

fn default_max_forced_restarts() -> u32 {
    DEFAULT_MAX_FORCED_RESTARTS
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            locked_apps: BTreeSet::new(),
            unlock_duration_minutes: 0,
            active_backend: Backend::Accessibility,
            fallback_backend: Some(Backend::UsageStats),
            anti_uninstall_enabled: false,
            privileged_experimental: false,
            max_forced_restarts: DEFAULT_MAX_FORCED_RESTARTS,
        }
    }
}

impl LockSettings {
    pub fn policy(&self) -> UnlockPolicy {
        UnlockPolicy {
            unlock_duration_minutes: self.unlock_duration_minutes,
            active_backend: self.active_backend,
            fallback_backend: self.fallback_backend,
            anti_uninstall_enabled: self.anti_uninstall_enabled,
            privileged_experimental: self.privileged_experimental,
            max_forced_restarts: self.max_forced_restarts,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.fallback_backend == Some(self.active_backend) {
            return Err(SettingsError::FallbackEqualsActive(self.active_backend));
        }
        Ok(())
    }
}

/// Snap an arbitrary duration to the closest offered preset. Ties go to the
/// shorter duration.
pub fn nearest_preset(minutes: u32) -> u32 {
    UNLOCK_DURATION_PRESETS
        .iter()
        .copied()
        .min_by_key(|preset| preset.abs_diff(minutes))
        .unwrap_or(0)
}
