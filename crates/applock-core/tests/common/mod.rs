//! Fake platform adapters shared by the integration tests.

#![allow(dead_code)]

use applock_core::clock::ManualClock;
use applock_core::decision::LockEngine;
use applock_core::error::DetectorError;
use applock_core::platform::{
    AccessibilityEvent, AccessibilityEventType, AccessibilityHost, ComponentName,
    DeviceLockState, KeepAlive, Platform, PrivilegedHost, ProcessForegroundChange, TriggerError,
    TriggerSink, UsageEvent, UsageEventKind, UsageStatsHost,
};
use applock_core::registry::SettingsRegistry;
use applock_core::settings::{Backend, LockSettings};
use applock_core::supervisor::Supervisor;
use applock_core::unlock_cache::UnlockCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub const SELF_PACKAGE: &str = "dev.applock";

#[derive(Default)]
pub struct RecordingSink {
    presented: Mutex<Vec<String>>,
    reject: AtomicBool,
}

impl RecordingSink {
    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().clone()
    }

    pub fn reject_requests(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

impl TriggerSink for RecordingSink {
    fn present_lock_screen(&self, package: &str) -> Result<(), TriggerError> {
        self.presented.lock().push(package.to_string());
        if self.reject.load(Ordering::SeqCst) {
            return Err(TriggerError("background launch blocked".into()));
        }
        Ok(())
    }
}

pub struct FakeAccessibility {
    enabled: AtomicBool,
    tx: Mutex<Option<broadcast::Sender<AccessibilityEvent>>>,
    handled: AtomicUsize,
}

impl FakeAccessibility {
    pub fn new(enabled: bool) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            enabled: AtomicBool::new(enabled),
            tx: Mutex::new(Some(tx)),
            handled: AtomicUsize::new(0),
        }
    }

    pub fn window(&self, package: &str, class_name: &str, at: i64) {
        self.send(AccessibilityEvent {
            event_type: AccessibilityEventType::WindowStateChanged,
            package_name: Some(package.to_string()),
            class_name: Some(class_name.to_string()),
            timestamp_millis: at,
        });
    }

    pub fn send(&self, event: AccessibilityEvent) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.lock().as_ref().map_or(0, |tx| tx.receiver_count())
    }

    /// Events the detector has finished with.
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    /// Drop the sender so subscribers see the stream close.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

impl AccessibilityHost for FakeAccessibility {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<AccessibilityEvent>, DetectorError> {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or_else(|| DetectorError::Platform("accessibility service gone".into()))
    }

    fn event_handled(&self, _event: &AccessibilityEvent) {
        self.handled.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeUsageStats {
    access: AtomicBool,
    events: Mutex<Vec<UsageEvent>>,
    queries: AtomicUsize,
}

impl FakeUsageStats {
    pub fn new(access: bool) -> Self {
        Self {
            access: AtomicBool::new(access),
            ..Self::default()
        }
    }

    pub fn resume(&self, package: &str, at: i64) {
        self.events.lock().push(UsageEvent {
            package_name: package.to_string(),
            class_name: format!("{package}.MainActivity"),
            kind: UsageEventKind::ActivityResumed,
            timestamp_millis: at,
        });
    }

    pub fn revoke(&self) {
        self.access.store(false, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl UsageStatsHost for FakeUsageStats {
    fn has_usage_access(&self) -> bool {
        self.access.load(Ordering::SeqCst)
    }

    fn query_events(&self, begin: i64, end: i64) -> Result<Vec<UsageEvent>, DetectorError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.timestamp_millis >= begin && e.timestamp_millis < end)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakePrivileged {
    granted: AtomicBool,
    revoked: AtomicBool,
    observer: Mutex<Option<mpsc::UnboundedSender<ProcessForegroundChange>>>,
    top: Mutex<Option<ComponentName>>,
    uids: Mutex<HashMap<u32, String>>,
    unregistered: AtomicUsize,
}

impl FakePrivileged {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
            ..Self::default()
        }
    }

    pub fn map_uid(&self, uid: u32, package: &str) {
        self.uids.lock().insert(uid, package.to_string());
    }

    pub fn foreground(&self, uid: u32) -> bool {
        let change = ProcessForegroundChange {
            pid: 1000 + uid as i32,
            uid,
            foreground_activities: true,
        };
        self.observer
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(change).is_ok())
    }

    pub fn set_top(&self, package: &str, class_name: &str) {
        *self.top.lock() = Some(ComponentName {
            package_name: package.to_string(),
            class_name: class_name.to_string(),
        });
    }

    /// Simulate the privileged grant being revoked mid-run.
    pub fn revoke(&self) {
        self.granted.store(false, Ordering::SeqCst);
        self.revoked.store(true, Ordering::SeqCst);
        self.observer.lock().take();
    }

    pub fn unregister_calls(&self) -> usize {
        self.unregistered.load(Ordering::SeqCst)
    }
}

impl PrivilegedHost for FakePrivileged {
    fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn register_process_observer(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<ProcessForegroundChange>, DetectorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.observer.lock() = Some(tx);
        Ok(rx)
    }

    fn unregister_process_observer(&self) -> Result<(), DetectorError> {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
        self.observer.lock().take();
        Ok(())
    }

    fn top_activity(&self) -> Result<Option<ComponentName>, DetectorError> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(DetectorError::PrivilegeUnavailable("binder died".into()));
        }
        Ok(self.top.lock().clone())
    }

    fn name_for_uid(&self, uid: u32) -> Result<String, DetectorError> {
        self.uids
            .lock()
            .get(&uid)
            .cloned()
            .ok_or_else(|| DetectorError::Platform(format!("unknown uid {uid}")))
    }
}

#[derive(Default)]
pub struct FakeDevice {
    locked: AtomicBool,
}

impl FakeDevice {
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
}

impl DeviceLockState for FakeDevice {
    fn is_device_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

/// Records which backend currently holds the persistent task.
#[derive(Default)]
pub struct FakeKeepAlive {
    held: Mutex<Option<Backend>>,
}

impl FakeKeepAlive {
    pub fn held(&self) -> Option<Backend> {
        *self.held.lock()
    }
}

impl KeepAlive for FakeKeepAlive {
    fn hold(&self, backend: Backend) {
        *self.held.lock() = Some(backend);
    }

    fn release(&self) {
        self.held.lock().take();
    }
}

pub struct Harness {
    pub registry: Arc<SettingsRegistry>,
    pub cache: Arc<UnlockCache>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<LockEngine>,
    pub accessibility: Arc<FakeAccessibility>,
    pub usage: Arc<FakeUsageStats>,
    pub privileged: Arc<FakePrivileged>,
    pub device: Arc<FakeDevice>,
    pub keep_alive: Arc<FakeKeepAlive>,
}

impl Harness {
    pub fn new(settings: LockSettings) -> Self {
        let registry = Arc::new(SettingsRegistry::in_memory(settings));
        let cache = Arc::new(UnlockCache::new());
        let sink = Arc::new(RecordingSink::default());
        let engine = Arc::new(LockEngine::new(
            registry.clone(),
            cache.clone(),
            sink.clone(),
        ));
        Self {
            registry,
            cache,
            sink,
            clock: Arc::new(ManualClock::new(1_000_000)),
            engine,
            accessibility: Arc::new(FakeAccessibility::new(true)),
            usage: Arc::new(FakeUsageStats::new(true)),
            privileged: Arc::new(FakePrivileged::new(true)),
            device: Arc::new(FakeDevice::default()),
            keep_alive: Arc::new(FakeKeepAlive::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform::new(self.device.clone(), SELF_PACKAGE)
            .with_accessibility(self.accessibility.clone())
            .with_usage_stats(self.usage.clone())
            .with_privileged(self.privileged.clone())
            .with_keep_alive(self.keep_alive.clone())
            .with_poll_intervals(Duration::from_millis(10), Duration::from_millis(10))
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        self.supervisor_with(self.platform())
    }

    pub fn supervisor_with(&self, platform: Platform) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            self.engine.clone(),
            platform,
            self.clock.clone(),
        ))
    }
}

pub fn locked(packages: &[&str]) -> LockSettings {
    let mut settings = LockSettings::default();
    for package in packages {
        settings.locked_apps.insert(package.to_string());
    }
    settings
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
