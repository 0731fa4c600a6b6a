//! Self-rescheduling periodic task.
//!
//! A `PeriodicTask` owns the one background tokio task that drives the
//! vitals forward. The task re-arms only after the previous firing has
//! returned, so at most one invocation is ever pending or running.
//!
//! ```text
//! Idle --arm--> Armed --timer--> Running --+--> Armed    (stop flag clear)
//!                 |                        +--> Stopped  (stop flag raised or cancelled)
//!                 +--cancel--> Stopped
//! ```
//!
//! # Blocking Lock Usage
//!
//! Phase transitions go through `watch::Sender::send_if_modified`, which
//! runs the transition closure under the channel's internal lock. Cancellation,
//! the stop-flag check and the re-arm decision therefore never interleave.
//! The `JoinHandle` sits behind a `parking_lot::Mutex` that is never held
//! across an `.await`.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::TaskError;

/// Unit of work executed on every firing
pub trait PeriodicWork: Send + Sync + 'static {
    /// Run one invocation. Must not block for long; it delays the next tick.
    fn fire(&self);
}

/// Observable state of the periodic task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Constructed, never armed
    Idle,
    /// An invocation is scheduled and waiting for its timer
    Armed,
    /// An invocation is executing
    Running,
    /// No invocation is pending and none will be scheduled again
    Stopped,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Idle => write!(f, "idle"),
            TaskPhase::Armed => write!(f, "armed"),
            TaskPhase::Running => write!(f, "running"),
            TaskPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Shutdown request shared between the lifecycle and the task.
///
/// Raised once, never cleared.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Proof that the periodic task has stopped and its background context exited.
///
/// Only `PeriodicTask::await_stopped` can produce one.
#[must_use = "the drained token gates release of the shared state"]
#[derive(Debug)]
pub struct Drained {
    fired: u64,
}

impl Drained {
    /// Total number of completed firings
    pub fn fired(&self) -> u64 {
        self.fired
    }
}

/// Owned handle to the single periodic invocation
pub struct PeriodicTask {
    work: Arc<dyn PeriodicWork>,
    stop: StopFlag,
    phase_tx: Arc<watch::Sender<TaskPhase>>,
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
    joined_tx: watch::Sender<bool>,
}

impl fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("phase", &self.phase())
            .field("fired", &self.fired())
            .field("stop_raised", &self.stop.is_raised())
            .finish_non_exhaustive()
    }
}

impl PeriodicTask {
    /// Create an idle task that will run `work` on each firing and consult
    /// `stop` before re-arming.
    pub fn new(work: Arc<dyn PeriodicWork>, stop: StopFlag) -> Self {
        let (phase_tx, _phase_rx) = watch::channel(TaskPhase::Idle);
        Self {
            work,
            stop,
            phase_tx: Arc::new(phase_tx),
            cancelled: Arc::new(AtomicBool::new(false)),
            fired: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
            joined_tx: watch::channel(true).0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> TaskPhase {
        *self.phase_tx.borrow()
    }

    /// Number of completed firings
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Acquire)
    }

    /// Schedule the first invocation `interval` from now.
    ///
    /// Must be called from within a tokio runtime. Subsequent invocations are
    /// re-armed by the task itself with the same interval.
    pub fn arm(&self, interval: Duration) -> Result<(), TaskError> {
        // Held across the transition and the spawn so `await_stopped` always
        // finds the handle once the phase has left `Idle`.
        let mut slot = self.handle.lock();

        let mut observed = TaskPhase::Idle;
        self.phase_tx.send_if_modified(|phase| {
            observed = *phase;
            if *phase == TaskPhase::Idle {
                *phase = TaskPhase::Armed;
                true
            } else {
                false
            }
        });
        match observed {
            TaskPhase::Idle => {}
            TaskPhase::Stopped => return Err(TaskError::Stopped),
            TaskPhase::Armed | TaskPhase::Running => return Err(TaskError::AlreadyArmed),
        }

        let handle = tokio::spawn(run_periodic(
            Arc::clone(&self.work),
            self.stop.clone(),
            Arc::clone(&self.phase_tx),
            Arc::clone(&self.cancelled),
            Arc::clone(&self.fired),
            interval,
        ));
        *slot = Some(handle);
        self.joined_tx.send_replace(false);
        tracing::debug!(?interval, "Periodic task armed");
        Ok(())
    }

    /// Prevent any not-yet-started invocation from firing.
    ///
    /// An invocation that is already running finishes normally and then
    /// stops instead of re-arming.
    pub fn cancel(&self) {
        let cancelled = &self.cancelled;
        let mut before = TaskPhase::Idle;
        self.phase_tx.send_if_modified(|phase| {
            before = *phase;
            cancelled.store(true, Ordering::SeqCst);
            match phase {
                TaskPhase::Idle | TaskPhase::Armed => {
                    *phase = TaskPhase::Stopped;
                    true
                }
                TaskPhase::Running | TaskPhase::Stopped => false,
            }
        });
        tracing::debug!(phase = %before, "Periodic task cancel requested");
    }

    /// Wait until the task is stopped and its background context has exited.
    ///
    /// Any number of callers may wait concurrently; each returns only after
    /// the background context has been joined. Never returns for a task that
    /// stays armed forever; call `cancel` or raise the stop flag first.
    pub async fn await_stopped(&self) -> Drained {
        let mut phase_rx = self.phase_tx.subscribe();
        stopped(&mut phase_rx).await;

        let mut joined_rx = self.joined_tx.subscribe();
        loop {
            let taken = self.handle.lock().take();
            if let Some(handle) = taken {
                let mut rejoin = Rejoin {
                    slot: &self.handle,
                    joined_tx: &self.joined_tx,
                    handle: Some(handle),
                };
                rejoin.join().await;
                break;
            }
            // Another caller holds the handle; it either finishes the join or
            // puts the handle back.
            if *joined_rx.borrow() {
                break;
            }
            if joined_rx.changed().await.is_err() {
                break;
            }
        }

        Drained {
            fired: self.fired(),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.phase_tx.send_replace(TaskPhase::Stopped);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

/// A `JoinHandle` taken out of its slot for joining. Returned to the slot if
/// the joining future is dropped before the join completes.
struct Rejoin<'a> {
    slot: &'a Mutex<Option<JoinHandle<()>>>,
    joined_tx: &'a watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Rejoin<'_> {
    async fn join(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::warn!("Periodic work panicked before shutdown: {err}");
                }
            }
        }
        self.handle = None;
        self.joined_tx.send_replace(true);
    }
}

impl Drop for Rejoin<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self.slot.lock() = Some(handle);
            // Wake waiters so one of them picks the handle up.
            self.joined_tx.send_replace(false);
        }
    }
}

/// Forces `Stopped` when the background context exits, including by panic.
struct StopOnExit(Arc<watch::Sender<TaskPhase>>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.send_if_modified(|phase| {
            let changed = *phase != TaskPhase::Stopped;
            *phase = TaskPhase::Stopped;
            changed
        });
    }
}

/// Resolves once the phase is `Stopped` (or every sender is gone).
async fn stopped(phase_rx: &mut watch::Receiver<TaskPhase>) {
    loop {
        if *phase_rx.borrow_and_update() == TaskPhase::Stopped {
            return;
        }
        if phase_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_periodic(
    work: Arc<dyn PeriodicWork>,
    stop: StopFlag,
    phase_tx: Arc<watch::Sender<TaskPhase>>,
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
    interval: Duration,
) {
    let _exit = StopOnExit(Arc::clone(&phase_tx));
    let mut phase_rx = phase_tx.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut phase_rx) => break,
            _ = tokio::time::sleep(interval) => {}
        }

        // Armed -> Running, unless a cancel won the race with the timer.
        let started = phase_tx.send_if_modified(|phase| {
            if *phase == TaskPhase::Armed {
                *phase = TaskPhase::Running;
                true
            } else {
                false
            }
        });
        if !started {
            break;
        }

        work.fire();
        let count = fired.fetch_add(1, Ordering::AcqRel) + 1;

        let mut rearmed = false;
        phase_tx.send_modify(|phase| {
            if stop.is_raised() || cancelled.load(Ordering::SeqCst) {
                *phase = TaskPhase::Stopped;
            } else {
                *phase = TaskPhase::Armed;
                rearmed = true;
            }
        });
        tracing::trace!(count, rearmed, "Periodic task fired");
        if !rearmed {
            break;
        }
    }
    tracing::debug!(fired = fired.load(Ordering::Acquire), "Periodic task stopped");
}
