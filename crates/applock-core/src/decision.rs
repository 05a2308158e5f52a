//! Lock decision engine.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::event::ForegroundEvent;
use crate::platform::TriggerSink;
use crate::registry::LockRegistry;
use crate::settings::UnlockPolicy;
use crate::unlock_cache::{CacheState, UnlockCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDecision {
    Lock,
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The lock screen for this package is showing or was just dismissed.
    Bypassed,
    NotLocked,
    WithinGraceWindow,
}

impl LockDecision {
    pub fn is_lock(&self) -> bool {
        matches!(self, LockDecision::Lock)
    }
}

/// Decide whether `event` must be locked, updating `state` in place.
///
/// Total over its inputs: every event yields a decision. The event's own
/// timestamp is the reference time for the grace window.
pub fn decide(
    event: &ForegroundEvent,
    registry: &dyn LockRegistry,
    policy: &UnlockPolicy,
    state: &mut CacheState,
) -> LockDecision {
    let package = event.package_name.as_str();

    if state.bypassed_package() == Some(package) {
        return LockDecision::Ignore(IgnoreReason::Bypassed);
    }
    state.clear_bypassed();

    if !registry.is_locked(package) {
        return LockDecision::Ignore(IgnoreReason::NotLocked);
    }

    if let Some(unlocked_at) = state.unlocked_at(package) {
        let elapsed = event.timestamp_millis - unlocked_at;
        if policy.unlock_duration_minutes > 0 && elapsed < policy.grace_window_millis() {
            return LockDecision::Ignore(IgnoreReason::WithinGraceWindow);
        }
    }

    state.remove_unlock(package);
    if state.bypassed_package() == Some(package) {
        state.clear_bypassed();
    }
    LockDecision::Lock
}

/// Runs [`decide`] for each foreground event and fires the trigger sink on
/// `Lock`. Shared by every detector and by the device signal handlers.
pub struct LockEngine {
    registry: Arc<dyn LockRegistry>,
    cache: Arc<UnlockCache>,
    sink: Arc<dyn TriggerSink>,
    last_foreground: Mutex<Option<ForegroundEvent>>,
}

impl LockEngine {
    pub fn new(
        registry: Arc<dyn LockRegistry>,
        cache: Arc<UnlockCache>,
        sink: Arc<dyn TriggerSink>,
    ) -> Self {
        Self {
            registry,
            cache,
            sink,
            last_foreground: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<dyn LockRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<UnlockCache> {
        &self.cache
    }

    pub fn on_foreground(&self, event: &ForegroundEvent) -> LockDecision {
        *self.last_foreground.lock() = Some(event.clone());
        let policy = self.registry.policy();

        // Decision and bypass update happen under one cache lock so a second
        // event for the same package cannot slip in before the bypass is set.
        let decision = self.cache.with_state(|state| {
            let decision = decide(event, self.registry.as_ref(), &policy, state);
            if decision.is_lock() {
                state.set_bypassed(&event.package_name);
            }
            decision
        });

        match decision {
            LockDecision::Lock => {
                info!(
                    package = %event.package_name,
                    class = %event.activity_class_name,
                    at = event.timestamp_millis,
                    "locked app in foreground"
                );
                if let Err(err) = self.sink.present_lock_screen(&event.package_name) {
                    warn!(package = %event.package_name, error = %err, "lock screen not shown");
                }
            }
            LockDecision::Ignore(reason) => {
                debug!(package = %event.package_name, ?reason, "foreground change ignored");
            }
        }
        decision
    }

    /// Authentication completed for `package`.
    pub fn record_unlock(&self, package: &str, at_millis: i64) {
        self.cache.record_unlock(package, at_millis);
    }

    /// Re-evaluate the most recent foreground package at `now_millis`, e.g.
    /// after the device is unlocked with a protected app still on top.
    pub fn recheck_last(&self, now_millis: i64) -> Option<LockDecision> {
        let last = self.last_foreground.lock().clone()?;
        let event = ForegroundEvent {
            timestamp_millis: now_millis,
            ..last
        };
        Some(self.on_foreground(&event))
    }

    pub fn last_foreground(&self) -> Option<ForegroundEvent> {
        self.last_foreground.lock().clone()
    }
}
