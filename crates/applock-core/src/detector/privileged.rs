//! Detectors over the privileged activity-manager channel.
//!
//! Observer mode reacts to process-observer callbacks and resolves the uid to
//! a package. Polling mode (the experimental flag) reads the top task on a
//! fixed interval, skipping ticks while the device is locked.

use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{emit, Detector, DetectorContext, DetectorKind, FailureReason};
use crate::error::DetectorError;
use crate::platform::{DeviceLockState, PrivilegedHost};
use crate::settings::Backend;
use crate::task::TaskHandle;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn ensure_granted(host: &dyn PrivilegedHost) -> Result<(), DetectorError> {
    if host.is_granted() {
        Ok(())
    } else {
        Err(DetectorError::PermissionMissing {
            backend: Backend::Privileged,
        })
    }
}

pub struct PrivilegedObserverDetector {
    host: Arc<dyn PrivilegedHost>,
    registered: bool,
    task: Option<TaskHandle>,
}

impl PrivilegedObserverDetector {
    pub fn new(host: Arc<dyn PrivilegedHost>) -> Self {
        Self {
            host,
            registered: false,
            task: None,
        }
    }
}

#[async_trait]
impl Detector for PrivilegedObserverDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::PrivilegedObserver
    }

    fn start(&mut self, ctx: DetectorContext) -> Result<(), DetectorError> {
        if self.is_running() {
            return Err(DetectorError::AlreadyRunning);
        }
        ensure_granted(self.host.as_ref())?;
        let mut changes = self.host.register_process_observer()?;
        self.registered = true;

        let host = self.host.clone();
        let task = TaskHandle::spawn("privileged-observer", move |mut shutdown| async move {
            loop {
                let change = tokio::select! {
                    biased;
                    _ = shutdown.requested() => return,
                    change = changes.recv() => change,
                };
                let Some(change) = change else {
                    ctx.report(
                        DetectorKind::PrivilegedObserver,
                        FailureReason::PrivilegeRevoked("process observer channel closed".into()),
                    );
                    return;
                };
                if ctx.policy().privileged_experimental {
                    ctx.report(DetectorKind::PrivilegedObserver, FailureReason::ModeChanged);
                    return;
                }
                if !change.foreground_activities {
                    continue;
                }
                let package = match host.name_for_uid(change.uid) {
                    Ok(package) => package,
                    Err(err) => {
                        warn!(uid = change.uid, error = %err, "cannot resolve uid, event skipped");
                        continue;
                    }
                };
                if package == ctx.self_package {
                    continue;
                }
                emit(&ctx, &package, "", ctx.clock.now_millis());
            }
        });
        self.task = Some(task);
        info!("privileged observer registered");
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop().await;
        }
        if self.registered {
            self.registered = false;
            match self.host.unregister_process_observer() {
                Ok(()) => debug!("privileged observer unregistered"),
                Err(err) => warn!(error = %err, "failed to unregister process observer"),
            }
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

pub struct PrivilegedPollingDetector {
    host: Arc<dyn PrivilegedHost>,
    device: Arc<dyn DeviceLockState>,
    interval: Duration,
    task: Option<TaskHandle>,
}

impl PrivilegedPollingDetector {
    pub fn new(host: Arc<dyn PrivilegedHost>, device: Arc<dyn DeviceLockState>) -> Self {
        Self::with_interval(host, device, POLL_INTERVAL)
    }

    pub fn with_interval(
        host: Arc<dyn PrivilegedHost>,
        device: Arc<dyn DeviceLockState>,
        interval: Duration,
    ) -> Self {
        Self {
            host,
            device,
            interval,
            task: None,
        }
    }
}

#[async_trait]
impl Detector for PrivilegedPollingDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::PrivilegedPolling
    }

    fn start(&mut self, ctx: DetectorContext) -> Result<(), DetectorError> {
        if self.is_running() {
            return Err(DetectorError::AlreadyRunning);
        }
        ensure_granted(self.host.as_ref())?;

        let host = self.host.clone();
        let device = self.device.clone();
        let mut filter = ctx.filter().skipping_recents();
        let task = TaskHandle::spawn_periodic("privileged-polling", self.interval, move || {
            if !ctx.policy().privileged_experimental {
                ctx.report(DetectorKind::PrivilegedPolling, FailureReason::ModeChanged);
                return ControlFlow::Break(());
            }
            // The last package is kept while locked; the engine's bypass and
            // grace checks absorb a repeat after unlock.
            if device.is_device_locked() {
                return ControlFlow::Continue(());
            }
            let top = match host.top_activity() {
                Ok(Some(top)) => top,
                Ok(None) => return ControlFlow::Continue(()),
                Err(err) if err.is_fatal() => {
                    ctx.report(
                        DetectorKind::PrivilegedPolling,
                        FailureReason::PrivilegeRevoked(err.to_string()),
                    );
                    return ControlFlow::Break(());
                }
                Err(err) => {
                    warn!(error = %err, "top activity lookup failed");
                    return ControlFlow::Continue(());
                }
            };
            if filter.admit(&top.package_name, &top.class_name) {
                debug!(package = %top.package_name, class = %top.class_name, "top activity changed");
                emit(&ctx, &top.package_name, &top.class_name, ctx.clock.now_millis());
            }
            ControlFlow::Continue(())
        });
        self.task = Some(task);
        info!(interval_ms = self.interval.as_millis() as u64, "privileged polling started");
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop().await;
            debug!("privileged polling stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
