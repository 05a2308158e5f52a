use applock_core::error::DetectorError;
use applock_core::platform::{
    AccessibilityEvent, AccessibilityHost, DeviceLockState, KeepAlive, TriggerError, TriggerSink,
};
use applock_core::settings::Backend;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

/// Package name the daemon reports as its own; its windows never lock.
pub const SELF_PACKAGE: &str = "dev.applock";

const FEED_CAPACITY: usize = 256;

/// Upper bound on waiting for a detector that is being replaced mid-event.
const HANDLED_TIMEOUT: Duration = Duration::from_secs(2);

/// Accessibility capability backed by the signal feed.
pub struct FeedAccessibility {
    enabled: AtomicBool,
    tx: broadcast::Sender<AccessibilityEvent>,
    pending: Mutex<Option<oneshot::Sender<()>>>,
}

impl FeedAccessibility {
    pub fn new(enabled: bool) -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            enabled: AtomicBool::new(enabled),
            tx,
            pending: Mutex::new(None),
        }
    }

    /// Deliver an event to the live detector and wait until it has been
    /// decided on, so later feed signals observe its effects. Returns false
    /// when no detector took it.
    pub async fn deliver(&self, event: AccessibilityEvent) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        *self.pending.lock() = Some(done_tx);
        if self.tx.send(event).is_err() {
            self.pending.lock().take();
            return false;
        }
        match tokio::time::timeout(HANDLED_TIMEOUT, done_rx).await {
            Ok(Ok(())) => true,
            _ => {
                warn!("accessibility event not acknowledged by detector");
                false
            }
        }
    }
}

impl AccessibilityHost for FeedAccessibility {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<AccessibilityEvent>, DetectorError> {
        Ok(self.tx.subscribe())
    }

    fn event_handled(&self, _event: &AccessibilityEvent) {
        if let Some(done) = self.pending.lock().take() {
            let _ = done.send(());
        }
    }
}

/// Keyguard state as reported by screen-off / user-present signals.
#[derive(Default)]
pub struct HostDevice {
    locked: AtomicBool,
}

impl HostDevice {
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
}

impl DeviceLockState for HostDevice {
    fn is_device_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

/// A plain process has nothing to pin; the hold is only logged.
#[derive(Debug, Default)]
pub struct LoggedKeepAlive;

impl KeepAlive for LoggedKeepAlive {
    fn hold(&self, backend: Backend) {
        info!(%backend, "persistent task held");
    }

    fn release(&self) {
        info!("persistent task released");
    }
}

#[derive(Debug, Serialize)]
struct LockRequest<'a> {
    lock: &'a str,
    requested_at: DateTime<Utc>,
}

/// Trigger sink that writes one JSON lock request per line.
pub struct JsonLineTrigger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLineTrigger {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl TriggerSink for JsonLineTrigger {
    fn present_lock_screen(&self, package: &str) -> Result<(), TriggerError> {
        let request = LockRequest {
            lock: package,
            requested_at: Utc::now(),
        };
        let line = serde_json::to_string(&request).map_err(|e| TriggerError(e.to_string()))?;
        let mut out = self.out.lock();
        writeln!(out, "{line}")
            .and_then(|_| out.flush())
            .map_err(|e| TriggerError(e.to_string()))
    }
}
