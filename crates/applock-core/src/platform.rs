//! Capabilities the host platform provides to the engine. Each backend
//! needs exactly one of the host traits; a missing or ungranted host is a
//! start failure, never a panic.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::error::DetectorError;
use crate::settings::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessibilityEventType {
    WindowStateChanged,
    WindowContentChanged,
    ViewFocused,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibilityEvent {
    pub event_type: AccessibilityEventType,
    pub package_name: Option<String>,
    pub class_name: Option<String>,
    pub timestamp_millis: i64,
}

pub trait AccessibilityHost: Send + Sync {
    /// Whether the accessibility capability is granted to the app.
    fn is_enabled(&self) -> bool;
    fn subscribe(&self) -> Result<broadcast::Receiver<AccessibilityEvent>, DetectorError>;

    /// Called by the detector once `event` has gone through the decision
    /// engine (or was filtered out).
    fn event_handled(&self, _event: &AccessibilityEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageEventKind {
    ActivityResumed,
    ActivityPaused,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub package_name: String,
    pub class_name: String,
    pub kind: UsageEventKind,
    pub timestamp_millis: i64,
}

pub trait UsageStatsHost: Send + Sync {
    fn has_usage_access(&self) -> bool;
    /// Usage events with timestamps in `[begin_millis, end_millis)`, oldest
    /// first. May repeat events returned by earlier queries.
    fn query_events(&self, begin_millis: i64, end_millis: i64)
        -> Result<Vec<UsageEvent>, DetectorError>;
}

/// Process-observer callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessForegroundChange {
    pub pid: i32,
    pub uid: u32,
    pub foreground_activities: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentName {
    pub package_name: String,
    pub class_name: String,
}

/// Out-of-process privileged interface to the activity manager.
pub trait PrivilegedHost: Send + Sync {
    fn is_granted(&self) -> bool;
    /// Register a process observer. The receiver closes when the privileged
    /// channel dies.
    fn register_process_observer(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<ProcessForegroundChange>, DetectorError>;
    fn unregister_process_observer(&self) -> Result<(), DetectorError>;
    /// Top activity of the front task. `PrivilegeUnavailable` means the
    /// grant was revoked.
    fn top_activity(&self) -> Result<Option<ComponentName>, DetectorError>;
    fn name_for_uid(&self, uid: u32) -> Result<String, DetectorError>;
}

pub trait DeviceLockState: Send + Sync {
    /// True while the keyguard is showing or the screen is off.
    fn is_device_locked(&self) -> bool;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("lock screen request rejected: {0}")]
pub struct TriggerError(pub String);

/// Presents the authentication surface. Fire-and-forget: the engine never
/// waits for the outcome, which comes back through
/// [`UnlockCache::record_unlock`](crate::unlock_cache::UnlockCache::record_unlock).
pub trait TriggerSink: Send + Sync {
    fn present_lock_screen(&self, package: &str) -> Result<(), TriggerError>;
}

/// Persistent-task handle that keeps the host from reclaiming the process
/// while a backend runs, e.g. an ongoing notification.
pub trait KeepAlive: Send + Sync {
    fn hold(&self, backend: Backend);
    fn release(&self);
}

/// Everything the supervisor needs to build detectors.
#[derive(Clone)]
pub struct Platform {
    pub accessibility: Option<Arc<dyn AccessibilityHost>>,
    pub usage_stats: Option<Arc<dyn UsageStatsHost>>,
    pub privileged: Option<Arc<dyn PrivilegedHost>>,
    pub device: Arc<dyn DeviceLockState>,
    pub keep_alive: Option<Arc<dyn KeepAlive>>,
    /// Our own package; never reported as a foreground app.
    pub self_package: String,
    pub usage_poll_interval: Duration,
    pub privileged_poll_interval: Duration,
}

impl Platform {
    pub fn new(device: Arc<dyn DeviceLockState>, self_package: impl Into<String>) -> Self {
        Self {
            accessibility: None,
            usage_stats: None,
            privileged: None,
            device,
            keep_alive: None,
            self_package: self_package.into(),
            usage_poll_interval: crate::detector::usage_stats::POLL_INTERVAL,
            privileged_poll_interval: crate::detector::privileged::POLL_INTERVAL,
        }
    }

    pub fn with_poll_intervals(mut self, usage_stats: Duration, privileged: Duration) -> Self {
        self.usage_poll_interval = usage_stats;
        self.privileged_poll_interval = privileged;
        self
    }

    pub fn with_accessibility(mut self, host: Arc<dyn AccessibilityHost>) -> Self {
        self.accessibility = Some(host);
        self
    }

    pub fn with_usage_stats(mut self, host: Arc<dyn UsageStatsHost>) -> Self {
        self.usage_stats = Some(host);
        self
    }

    pub fn with_privileged(mut self, host: Arc<dyn PrivilegedHost>) -> Self {
        self.privileged = Some(host);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }
}
