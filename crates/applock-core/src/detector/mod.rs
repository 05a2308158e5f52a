//! Foreground detectors.
//!
//! Every strategy turns a platform signal into [`ForegroundEvent`]s and feeds
//! them to the shared [`LockEngine`]. The supervisor picks one at runtime
//! through [`build_detector`] and talks to it only through [`Detector`].

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::clock::Clock;
use crate::decision::LockEngine;
use crate::error::DetectorError;
use crate::event::ForegroundEvent;
use crate::platform::Platform;
use crate::settings::{Backend, UnlockPolicy};

pub mod accessibility;
pub mod privileged;
pub mod usage_stats;

pub use accessibility::AccessibilityDetector;
pub use privileged::{PrivilegedObserverDetector, PrivilegedPollingDetector};
pub use usage_stats::UsageStatsDetector;

/// Activity classes that belong to the recents screen or launcher and never
/// count as an app coming to the foreground.
pub const KNOWN_RECENTS_CLASSES: &[&str] = &[
    "com.android.systemui.recents.RecentsActivity",
    "com.android.quickstep.RecentsActivity",
    "com.android.launcher3.uioverrides.QuickstepLauncher",
    "com.google.android.apps.nexuslauncher.NexusLauncherActivity",
    "com.miui.home.launcher.Launcher",
    "com.sec.android.app.launcher.activities.LauncherActivity",
    "com.oneplus.launcher.Launcher",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorKind {
    Accessibility,
    UsageStats,
    PrivilegedObserver,
    PrivilegedPolling,
}

impl DetectorKind {
    pub fn backend(&self) -> Backend {
        match self {
            DetectorKind::Accessibility => Backend::Accessibility,
            DetectorKind::UsageStats => Backend::UsageStats,
            DetectorKind::PrivilegedObserver | DetectorKind::PrivilegedPolling => {
                Backend::Privileged
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Permission or privileged grant lost while running.
    PrivilegeRevoked(String),
    /// The platform event source closed.
    SourceClosed,
    /// The privileged sub-mode flag changed; restart in the other mode.
    ModeChanged,
}

/// Sent by a detector whose event loop ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub kind: DetectorKind,
    pub generation: u64,
    pub reason: FailureReason,
}

/// Handed to a detector on start.
#[derive(Clone)]
pub struct DetectorContext {
    pub engine: Arc<LockEngine>,
    pub clock: Arc<dyn Clock>,
    pub self_package: String,
    pub generation: u64,
    pub failures: mpsc::UnboundedSender<BackendFailure>,
}

impl DetectorContext {
    pub fn policy(&self) -> UnlockPolicy {
        self.engine.registry().policy()
    }

    pub fn report(&self, kind: DetectorKind, reason: FailureReason) {
        warn!(?kind, ?reason, "detector stopped delivering events");
        let failure = BackendFailure {
            kind,
            generation: self.generation,
            reason,
        };
        if self.failures.send(failure).is_err() {
            warn!(?kind, "supervisor gone, failure dropped");
        }
    }

    pub fn filter(&self) -> ForegroundFilter {
        ForegroundFilter::new(self.self_package.clone())
    }
}

#[async_trait]
pub trait Detector: Send {
    fn kind(&self) -> DetectorKind;

    /// Check permissions and begin delivering events. Fails without side
    /// effects; the supervisor decides what to do next.
    fn start(&mut self, ctx: DetectorContext) -> Result<(), DetectorError>;

    /// Stop delivering events. Safe to call repeatedly and on a detector
    /// that never started; no event is delivered after it returns.
    async fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Construct the detector for `backend`. A backend whose host capability is
/// absent on this platform fails with `PermissionMissing`.
pub fn build_detector(
    platform: &Platform,
    backend: Backend,
    policy: &UnlockPolicy,
) -> Result<Box<dyn Detector>, DetectorError> {
    let missing = DetectorError::PermissionMissing { backend };
    let detector: Box<dyn Detector> = match backend {
        Backend::Accessibility => {
            let host = platform.accessibility.clone().ok_or(missing)?;
            Box::new(AccessibilityDetector::new(host))
        }
        Backend::UsageStats => {
            let host = platform.usage_stats.clone().ok_or(missing)?;
            Box::new(UsageStatsDetector::with_interval(
                host,
                platform.usage_poll_interval,
            ))
        }
        Backend::Privileged => {
            let host = platform.privileged.clone().ok_or(missing)?;
            if policy.privileged_experimental {
                Box::new(PrivilegedPollingDetector::with_interval(
                    host,
                    platform.device.clone(),
                    platform.privileged_poll_interval,
                ))
            } else {
                Box::new(PrivilegedObserverDetector::new(host))
            }
        }
    };
    Ok(detector)
}

/// Drops repeats of the last reported package, our own package, and
/// optionally the recents/launcher screens.
#[derive(Debug, Clone)]
pub struct ForegroundFilter {
    self_package: String,
    last_package: Option<String>,
    skip_recents: bool,
}

impl ForegroundFilter {
    pub fn new(self_package: impl Into<String>) -> Self {
        Self {
            self_package: self_package.into(),
            last_package: None,
            skip_recents: false,
        }
    }

    /// Also drop [`KNOWN_RECENTS_CLASSES`]. Only for top-task polling, where
    /// the recents screen shows up as the top activity mid-gesture. Event
    /// sources must keep them: leaving a locked app for the launcher is the
    /// transition that clears the bypass.
    pub fn skipping_recents(mut self) -> Self {
        self.skip_recents = true;
        self
    }

    /// Returns true if `package` is a new foreground app worth reporting.
    pub fn admit(&mut self, package: &str, class_name: &str) -> bool {
        if package.is_empty() || package == self.self_package {
            return false;
        }
        if self.skip_recents && KNOWN_RECENTS_CLASSES.contains(&class_name) {
            return false;
        }
        if self.last_package.as_deref() == Some(package) {
            return false;
        }
        self.last_package = Some(package.to_string());
        true
    }
}

pub(crate) fn emit(ctx: &DetectorContext, package: &str, class_name: &str, at_millis: i64) {
    let event = ForegroundEvent::new(package, class_name, at_millis);
    ctx.engine.on_foreground(&event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_reports_each_transition_once() {
        let mut filter = ForegroundFilter::new("dev.applock");
        assert!(filter.admit("com.bank", "MainActivity"));
        assert!(!filter.admit("com.bank", "SettingsActivity"));
        assert!(filter.admit("com.mail", "Inbox"));
        assert!(filter.admit("com.bank", "MainActivity"));
    }

    #[test]
    fn filter_skips_self_and_empty() {
        let mut filter = ForegroundFilter::new("dev.applock");
        assert!(!filter.admit("dev.applock", "LockActivity"));
        assert!(!filter.admit("", "Anything"));
        assert!(filter.admit(
            "com.android.launcher3",
            "com.android.launcher3.uioverrides.QuickstepLauncher"
        ));
    }

    #[test]
    fn recents_are_dropped_only_when_asked() {
        let mut filter = ForegroundFilter::new("dev.applock").skipping_recents();
        assert!(filter.admit("com.bank", "com.bank.Main"));
        assert!(!filter.admit(
            "com.android.launcher3",
            "com.android.quickstep.RecentsActivity"
        ));
        // Still on bank as far as the filter knows.
        assert!(!filter.admit("com.bank", "com.bank.Main"));
    }

    #[test]
    fn privileged_kinds_map_to_one_backend() {
        assert_eq!(DetectorKind::PrivilegedObserver.backend(), Backend::Privileged);
        assert_eq!(DetectorKind::PrivilegedPolling.backend(), Backend::Privileged);
        assert_eq!(DetectorKind::UsageStats.backend(), Backend::UsageStats);
    }
}
