//! Cancellable waits for the run sequencer.
//!
//! Every pause in a run (start offsets, dwell periods) goes through a [`Clock`].
//! [`TokioClock`] sleeps on the tokio timer and wakes early when the operator
//! trips the [`CancelHandle`]. [`VirtualClock`] advances a counter instead of
//! sleeping, so tests and dry runs observe timing without waiting for it.

use crate::error::{PumpError, PumpResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Source of waits and elapsed time for a run.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Wait for `duration`.
    ///
    /// # Errors
    /// [`PumpError::Cancelled`] if the run was cancelled before or during the wait.
    async fn sleep(&self, duration: Duration) -> PumpResult<()>;

    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;

    /// Whether cancellation has been requested.
    fn is_cancelled(&self) -> bool;
}

/// Operator-side switch that interrupts waits on the clocks it was paired with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a linked cancel handle and receiver.
fn cancel_pair() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, rx)
}

/// Wall-clock waits on the tokio timer.
pub struct TokioClock {
    started: tokio::time::Instant,
    cancelled: watch::Receiver<bool>,
}

impl TokioClock {
    /// Create a clock and the handle that cancels its waits.
    pub fn new() -> (Self, CancelHandle) {
        let (handle, cancelled) = cancel_pair();
        (
            Self {
                started: tokio::time::Instant::now(),
                cancelled,
            },
            handle,
        )
    }
}

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) -> PumpResult<()> {
        let mut cancelled = self.cancelled.clone();
        if *cancelled.borrow_and_update() {
            return Err(PumpError::Cancelled);
        }
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                changed = cancelled.changed() => match changed {
                    Ok(()) if *cancelled.borrow() => return Err(PumpError::Cancelled),
                    Ok(()) => continue,
                    // Sender dropped without cancelling; nobody can cancel any more.
                    Err(_) => {
                        tokio::time::sleep_until(deadline).await;
                        return Ok(());
                    }
                },
            }
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

/// Clock that advances instantly and records every wait.
#[derive(Clone)]
pub struct VirtualClock {
    now: Arc<Mutex<Duration>>,
    waits: Arc<Mutex<Vec<Duration>>>,
    cancelled: watch::Receiver<bool>,
    /// Cancel once virtual time reaches this point.
    cancel_at: Option<Duration>,
    handle: CancelHandle,
}

impl VirtualClock {
    /// Create a virtual clock at t = 0 and its cancel handle.
    pub fn new() -> (Self, CancelHandle) {
        let (handle, cancelled) = cancel_pair();
        (
            Self {
                now: Arc::new(Mutex::new(Duration::ZERO)),
                waits: Arc::new(Mutex::new(Vec::new())),
                cancelled,
                cancel_at: None,
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// Simulate an operator interrupt once virtual time reaches `at`.
    ///
    /// The wait that would cross `at` advances the clock to `at` and fails with
    /// [`PumpError::Cancelled`].
    pub fn cancel_at(mut self, at: Duration) -> Self {
        self.cancel_at = Some(at);
        self
    }

    /// Every wait requested so far, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    fn now(&self) -> Duration {
        self.now.lock().map(|n| *n).unwrap_or_default()
    }

    fn set_now(&self, value: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = value;
        }
    }
}

#[async_trait]
impl Clock for VirtualClock {
    async fn sleep(&self, duration: Duration) -> PumpResult<()> {
        if self.is_cancelled() {
            return Err(PumpError::Cancelled);
        }
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
        let target = self.now() + duration;
        if let Some(at) = self.cancel_at {
            if target >= at {
                self.set_now(at.max(self.now()));
                self.handle.cancel();
                return Err(PumpError::Cancelled);
            }
        }
        self.set_now(target);
        tokio::task::yield_now().await;
        Ok(())
    }

    fn elapsed(&self) -> Duration {
        self.now()
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}
