//! Accessibility-event detector: zero polling, reports window-state changes.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{emit, Detector, DetectorContext, DetectorKind, FailureReason};
use crate::error::DetectorError;
use crate::platform::{AccessibilityEvent, AccessibilityEventType, AccessibilityHost};
use crate::settings::Backend;
use crate::task::TaskHandle;

pub struct AccessibilityDetector {
    host: Arc<dyn AccessibilityHost>,
    task: Option<TaskHandle>,
}

impl AccessibilityDetector {
    pub fn new(host: Arc<dyn AccessibilityHost>) -> Self {
        Self { host, task: None }
    }
}

fn window_change(event: &AccessibilityEvent) -> Option<(&str, &str)> {
    if event.event_type != AccessibilityEventType::WindowStateChanged {
        return None;
    }
    let package = event.package_name.as_deref()?;
    Some((package, event.class_name.as_deref().unwrap_or("")))
}

#[async_trait]
impl Detector for AccessibilityDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Accessibility
    }

    fn start(&mut self, ctx: DetectorContext) -> Result<(), DetectorError> {
        if self.is_running() {
            return Err(DetectorError::AlreadyRunning);
        }
        if !self.host.is_enabled() {
            return Err(DetectorError::PermissionMissing {
                backend: Backend::Accessibility,
            });
        }
        let mut events = self.host.subscribe()?;

        let host = self.host.clone();
        let task = TaskHandle::spawn("accessibility-detector", move |mut shutdown| async move {
            let mut filter = ctx.filter();
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => return,
                    received = events.recv() => match received {
                        Ok(event) => {
                            // Host event times may use another time base
                            // (uptime); unlocks are recorded on our clock.
                            if let Some((package, class_name)) = window_change(&event) {
                                if filter.admit(package, class_name) {
                                    emit(&ctx, package, class_name, ctx.clock.now_millis());
                                }
                            }
                            host.event_handled(&event);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "accessibility events dropped");
                        }
                        Err(RecvError::Closed) => {
                            ctx.report(DetectorKind::Accessibility, FailureReason::SourceClosed);
                            return;
                        }
                    }
                }
            }
        });
        self.task = Some(task);
        info!("accessibility detector started");
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop().await;
            debug!("accessibility detector stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
