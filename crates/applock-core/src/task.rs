//! Cancellable background tasks for detector loops.
//!
//! A [`TaskHandle`] owns a tokio task and a shutdown channel. `stop()` signals
//! shutdown and then awaits the task, so once it returns the loop body will
//! never run again. Stopping twice, or stopping a task that already ended on
//! its own, is a no-op.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receiving side of a task's shutdown request.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the handle is dropped.
    pub async fn requested(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct TaskHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `body` with a shutdown signal it must observe.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fut = body(ShutdownSignal { rx: shutdown_rx });
        let handle = tokio::spawn(fut);
        debug!(task = name, "task spawned");
        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Run `tick` every `interval`, first tick immediately. The loop ends when
    /// `tick` returns `Break` or shutdown is requested. Shutdown always wins
    /// over a due tick.
    pub fn spawn_periodic<F>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        Self::spawn(name, move |mut shutdown| async move {
            info!(task = name, interval_ms = interval.as_millis() as u64, "periodic task started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => {
                        debug!(task = name, "periodic task shutting down");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                if shutdown.is_requested() {
                    return;
                }
                if tick().is_break() {
                    info!(task = name, "periodic task ended itself");
                    return;
                }
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Request shutdown and wait for the task to exit.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = handle.await {
            if err.is_panic() {
                warn!(task = self.name, "task panicked before stop");
            }
        }
        debug!(task = self.name, "task stopped");
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(true);
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut task = TaskHandle::spawn_periodic("noop", Duration::from_millis(5), || {
            ControlFlow::Continue(())
        });
        task.stop().await;
        task.stop().await;
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn no_ticks_after_stop_returns() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut task = TaskHandle::spawn_periodic("count", Duration::from_millis(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn break_ends_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut task = TaskHandle::spawn_periodic("once", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Break(())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.is_finished());
        task.stop().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
