//! Device broadcasts: screen off, user present, boot completed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::decision::LockDecision;
use crate::detector::DetectorKind;
use crate::settings::Backend;
use crate::supervisor::{Supervisor, SupervisorState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceSignal {
    /// Screen turned off; the device is now locked.
    ScreenOff,
    /// The user dismissed the keyguard.
    UserPresent,
}

/// What boot completion started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BootPlan {
    pub backend: Backend,
    /// The accessibility capability doubles as the anti-uninstall guard and
    /// must be kept alive regardless of the detection backend.
    pub keep_accessibility_guard: bool,
    pub state: SupervisorState,
}

impl Supervisor {
    /// Apply a device broadcast. Returns the decision when the signal caused
    /// the last foreground app to be re-checked.
    pub async fn handle_device_signal(&self, signal: DeviceSignal) -> Option<LockDecision> {
        match signal {
            DeviceSignal::ScreenOff => {
                self.engine().cache().clear();
                info!("screen off, unlock cache cleared");
                None
            }
            DeviceSignal::UserPresent => {
                let kind = self.active_kind().await;
                if !matches!(
                    kind,
                    Some(DetectorKind::PrivilegedObserver | DetectorKind::PrivilegedPolling)
                ) {
                    debug!(?kind, "user present, no re-check for this backend");
                    return None;
                }
                let now = self.clock().now_millis();
                let decision = self.engine().recheck_last(now);
                debug!(?decision, "user present, last foreground app re-checked");
                decision
            }
        }
    }

    /// Boot completed: start the persisted backend without user interaction.
    pub async fn on_boot(&self) -> BootPlan {
        let policy = self.engine().registry().policy();
        info!(backend = %policy.active_backend, "boot completed, starting backend");
        let state = self.start_backend(policy.active_backend).await;
        BootPlan {
            backend: policy.active_backend,
            keep_accessibility_guard: policy.anti_uninstall_enabled,
            state,
        }
    }
}
