//! Backend supervisor.
//!
//! Owns the single live detector, performs fallback switching when a backend
//! cannot start or dies, and throttles forced restarts.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |           |
//!               v           v
//!             Failed -> FallingBack -> Starting
//! ```
//!
//! A fallback switch is never persisted: the registry keeps the user's
//! preferred backend for the next explicit start.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::decision::LockEngine;
use crate::detector::{
    build_detector, BackendFailure, Detector, DetectorContext, DetectorKind, FailureReason,
};
use crate::error::{DetectorError, SupervisorError};
use crate::platform::Platform;
use crate::restart::RestartCounters;
use crate::settings::{Backend, UnlockPolicy};
use crate::task::TaskHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorState {
    Stopped,
    Starting { backend: Backend },
    Running { backend: Backend },
    Stopping { backend: Backend },
    /// Enforcement is inactive until the next explicit start.
    Failed { backend: Backend },
    FallingBack { from: Backend, to: Backend },
}

impl SupervisorState {
    pub fn running_backend(&self) -> Option<Backend> {
        match self {
            SupervisorState::Running { backend } => Some(*backend),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SupervisorState::Failed { .. })
    }
}

/// Serializable view for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub active_backend: Option<Backend>,
    pub requested_backend: Backend,
    pub restart_counts: BTreeMap<Backend, u32>,
    pub unlocked_apps: Vec<String>,
    pub bypassed_package: Option<String>,
}

/// Why a backend is being started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartCause {
    /// User, settings or boot request. Resets the restart counter on success.
    Explicit,
    /// Process recreated by a watchdog, or a sub-mode switch.
    Forced,
}

struct Active {
    detector: Option<Box<dyn Detector>>,
    kind: Option<DetectorKind>,
    generation: u64,
}

pub struct Supervisor {
    engine: Arc<LockEngine>,
    platform: Platform,
    clock: Arc<dyn Clock>,
    counters: RestartCounters,
    active: Mutex<Active>,
    generation: AtomicU64,
    state_tx: watch::Sender<SupervisorState>,
    failures_tx: mpsc::UnboundedSender<BackendFailure>,
    failures_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<BackendFailure>>>,
}

impl Supervisor {
    pub fn new(engine: Arc<LockEngine>, platform: Platform, clock: Arc<dyn Clock>) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Stopped);
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            platform,
            clock,
            counters: RestartCounters::new(),
            active: Mutex::new(Active {
                detector: None,
                kind: None,
                generation: 0,
            }),
            generation: AtomicU64::new(0),
            state_tx,
            failures_tx,
            failures_rx: parking_lot::Mutex::new(Some(failures_rx)),
        }
    }

    pub fn engine(&self) -> &Arc<LockEngine> {
        &self.engine
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn counters(&self) -> &RestartCounters {
        &self.counters
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    fn policy(&self) -> UnlockPolicy {
        self.engine.registry().policy()
    }

    fn set_state(&self, state: SupervisorState) {
        debug!(?state, "supervisor state");
        self.state_tx.send_replace(state);
    }

    /// Kind of the live detector, if any.
    pub async fn active_kind(&self) -> Option<DetectorKind> {
        self.active.lock().await.kind
    }

    /// Start the backend the policy asks for.
    pub async fn start(&self) -> SupervisorState {
        let backend = self.policy().active_backend;
        self.start_backend(backend).await
    }

    /// Explicitly start `backend`, replacing whatever runs now.
    pub async fn start_backend(&self, backend: Backend) -> SupervisorState {
        let mut active = self.active.lock().await;
        self.launch(&mut active, backend, BTreeSet::new(), StartCause::Explicit)
            .await
    }

    /// The owning process was killed and recreated for `backend`. Refuses
    /// once the backend has been force-restarted more than the policy allows.
    pub async fn on_forced_restart(
        &self,
        backend: Backend,
    ) -> Result<SupervisorState, SupervisorError> {
        let limit = self.policy().max_forced_restarts;
        let count = self.counters.record_restart(backend);
        let mut active = self.active.lock().await;
        if count > limit {
            self.stop_active(&mut active).await;
            self.set_state(SupervisorState::Failed { backend });
            error!(%backend, count, limit, "restart limit reached, not restarting");
            return Err(SupervisorError::RestartLimit {
                backend,
                count,
                limit,
            });
        }
        info!(%backend, count, "forced restart");
        Ok(self
            .launch(&mut active, backend, BTreeSet::new(), StartCause::Forced)
            .await)
    }

    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.stop_active(&mut active).await;
        self.set_state(SupervisorState::Stopped);
    }

    /// React to a detector whose event loop ended on its own.
    pub async fn handle_failure(&self, failure: BackendFailure) {
        let mut active = self.active.lock().await;
        if active.kind != Some(failure.kind) || active.generation != failure.generation {
            debug!(kind = ?failure.kind, "stale detector failure ignored");
            return;
        }
        let backend = failure.kind.backend();
        match failure.reason {
            FailureReason::ModeChanged => {
                info!(%backend, "privileged sub-mode changed, restarting");
                self.launch(&mut active, backend, BTreeSet::new(), StartCause::Forced)
                    .await;
            }
            reason => {
                warn!(%backend, ?reason, "backend lost while running");
                self.stop_active(&mut active).await;
                self.set_state(SupervisorState::Failed { backend });
                let attempted = BTreeSet::from([backend]);
                if let Some(fallback) = self.fallback_for(backend, &attempted) {
                    self.set_state(SupervisorState::FallingBack {
                        from: backend,
                        to: fallback,
                    });
                    self.launch(&mut active, fallback, attempted, StartCause::Forced)
                        .await;
                } else {
                    error!(%backend, "no usable fallback, lock enforcement inactive");
                }
            }
        }
    }

    /// Spawn the loop that feeds detector failures into
    /// [`handle_failure`](Self::handle_failure). Only the first call spawns.
    pub fn spawn_failure_monitor(self: &Arc<Self>) -> Option<TaskHandle> {
        let mut failures = self.failures_rx.lock().take()?;
        let supervisor = Arc::clone(self);
        Some(TaskHandle::spawn("failure-monitor", move |mut shutdown| async move {
            loop {
                let failure = tokio::select! {
                    biased;
                    _ = shutdown.requested() => return,
                    failure = failures.recv() => failure,
                };
                match failure {
                    Some(failure) => supervisor.handle_failure(failure).await,
                    None => return,
                }
            }
        }))
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = self.state();
        let cache = self.engine.cache().snapshot();
        SupervisorStatus {
            state,
            active_backend: state.running_backend(),
            requested_backend: self.policy().active_backend,
            restart_counts: self.counters.snapshot(),
            unlocked_apps: cache.unlocked_apps,
            bypassed_package: cache.bypassed_package,
        }
    }

    fn fallback_for(&self, failed: Backend, attempted: &BTreeSet<Backend>) -> Option<Backend> {
        self.policy()
            .fallback_backend
            .filter(|fallback| *fallback != failed && !attempted.contains(fallback))
    }

    async fn stop_active(&self, active: &mut Active) {
        if let Some(mut detector) = active.detector.take() {
            let backend = detector.kind().backend();
            self.set_state(SupervisorState::Stopping { backend });
            detector.stop().await;
            if let Some(keep_alive) = &self.platform.keep_alive {
                keep_alive.release();
            }
            info!(%backend, "backend stopped");
        }
        active.kind = None;
    }

    fn try_start(&self, backend: Backend, generation: u64) -> Result<Box<dyn Detector>, DetectorError> {
        let policy = self.policy();
        let mut detector = build_detector(&self.platform, backend, &policy)?;
        let ctx = DetectorContext {
            engine: self.engine.clone(),
            clock: self.clock.clone(),
            self_package: self.platform.self_package.clone(),
            generation,
            failures: self.failures_tx.clone(),
        };
        detector.start(ctx)?;
        Ok(detector)
    }

    async fn launch(
        &self,
        active: &mut Active,
        mut backend: Backend,
        mut attempted: BTreeSet<Backend>,
        cause: StartCause,
    ) -> SupervisorState {
        loop {
            attempted.insert(backend);
            // Only one detector may be live: stop the current one first.
            self.stop_active(active).await;
            self.set_state(SupervisorState::Starting { backend });

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            match self.try_start(backend, generation) {
                Ok(detector) => {
                    active.kind = Some(detector.kind());
                    active.generation = generation;
                    active.detector = Some(detector);
                    if cause == StartCause::Explicit {
                        self.counters.reset(backend);
                    }
                    if let Some(keep_alive) = &self.platform.keep_alive {
                        keep_alive.hold(backend);
                    }
                    let state = SupervisorState::Running { backend };
                    self.set_state(state);
                    info!(%backend, kind = ?active.kind, "backend running");
                    return state;
                }
                Err(err) => {
                    warn!(%backend, error = %err, "backend failed to start");
                    self.set_state(SupervisorState::Failed { backend });
                    let Some(fallback) = self.fallback_for(backend, &attempted) else {
                        error!(%backend, "no usable fallback, lock enforcement inactive");
                        return SupervisorState::Failed { backend };
                    };
                    self.set_state(SupervisorState::FallingBack {
                        from: backend,
                        to: fallback,
                    });
                    backend = fallback;
                }
            }
        }
    }
}
