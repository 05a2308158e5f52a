//! Usage-stats detector: polls recent usage events and reports the latest
//! resumed activity when its package changes.

use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{emit, Detector, DetectorContext, DetectorKind, FailureReason};
use crate::error::DetectorError;
use crate::platform::{UsageEvent, UsageEventKind, UsageStatsHost};
use crate::settings::Backend;
use crate::task::TaskHandle;

pub const POLL_INTERVAL: Duration = Duration::from_millis(400);

/// How far back each query looks. Longer than the poll interval so a slow
/// tick never misses a resume.
pub const QUERY_WINDOW_MILLIS: i64 = 10_000;

pub struct UsageStatsDetector {
    host: Arc<dyn UsageStatsHost>,
    interval: Duration,
    task: Option<TaskHandle>,
}

impl UsageStatsDetector {
    pub fn new(host: Arc<dyn UsageStatsHost>) -> Self {
        Self::with_interval(host, POLL_INTERVAL)
    }

    pub fn with_interval(host: Arc<dyn UsageStatsHost>, interval: Duration) -> Self {
        Self {
            host,
            interval,
            task: None,
        }
    }
}

/// Most recent resumed activity in `events`.
pub fn latest_resumed(events: &[UsageEvent]) -> Option<&UsageEvent> {
    events
        .iter()
        .filter(|e| e.kind == UsageEventKind::ActivityResumed)
        .max_by_key(|e| e.timestamp_millis)
}

#[async_trait]
impl Detector for UsageStatsDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::UsageStats
    }

    fn start(&mut self, ctx: DetectorContext) -> Result<(), DetectorError> {
        if self.is_running() {
            return Err(DetectorError::AlreadyRunning);
        }
        if !self.host.has_usage_access() {
            return Err(DetectorError::PermissionMissing {
                backend: Backend::UsageStats,
            });
        }

        let host = self.host.clone();
        let mut filter = ctx.filter();
        let task = TaskHandle::spawn_periodic("usage-stats-detector", self.interval, move || {
            if !host.has_usage_access() {
                ctx.report(
                    DetectorKind::UsageStats,
                    FailureReason::PrivilegeRevoked("usage access revoked".into()),
                );
                return ControlFlow::Break(());
            }
            let now = ctx.clock.now_millis();
            let events = match host.query_events(now - QUERY_WINDOW_MILLIS, now + 1) {
                Ok(events) => events,
                Err(err) if err.is_fatal() => {
                    ctx.report(
                        DetectorKind::UsageStats,
                        FailureReason::PrivilegeRevoked(err.to_string()),
                    );
                    return ControlFlow::Break(());
                }
                Err(err) => {
                    warn!(error = %err, "usage events query failed");
                    return ControlFlow::Continue(());
                }
            };
            if let Some(latest) = latest_resumed(&events) {
                if filter.admit(&latest.package_name, &latest.class_name) {
                    emit(&ctx, &latest.package_name, &latest.class_name, now);
                }
            }
            ControlFlow::Continue(())
        });
        self.task = Some(task);
        info!(interval_ms = self.interval.as_millis() as u64, "usage-stats detector started");
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop().await;
            debug!("usage-stats detector stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
