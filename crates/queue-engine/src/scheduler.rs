//! Visibility scheduler: cancellable delayed actions on a dedicated worker pool.
//!
//! Every scheduled action is guarded by a [`CancelToken`]. The token moves
//! from pending to exactly one of fired or cancelled, and that transition is
//! a single compare-and-swap, so an action that has started running can no
//! longer be cancelled and a cancelled action never starts.

use crate::error::QueueError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

// ============================================================================
// Cancel Token
// ============================================================================

/// Handle on one scheduled action
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<TokenState>,
}

#[derive(Debug)]
struct TokenState {
    state: AtomicU8,
    wake: Notify,
}

impl CancelToken {
    /// Create a token that is not yet attached to any action.
    ///
    /// Useful when the token must be recorded somewhere before the action
    /// is armed; see [`VisibilityScheduler::schedule_with_token`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenState {
                state: AtomicU8::new(PENDING),
                wake: Notify::new(),
            }),
        }
    }

    /// True once the action has started running
    pub fn has_fired(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FIRED
    }

    /// True once the action has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    fn try_cancel(&self) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            // notify_one keeps a permit if the timer task is not waiting yet
            self.inner.wake.notify_one();
        }
        won
    }

    fn try_fire(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of scheduler activity since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Actions handed to the scheduler
    pub scheduled: u64,
    /// Actions whose delay elapsed and which started running
    pub fired: u64,
    /// Actions cancelled before firing
    pub cancelled: u64,
    /// Fired actions that returned an error
    pub failed: u64,
}

impl SchedulerStats {
    /// Actions still waiting for their delay to elapse
    pub fn pending(&self) -> u64 {
        self.scheduled
            .saturating_sub(self.fired)
            .saturating_sub(self.cancelled)
    }
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    fired: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Fires actions after a delay on a pool of scheduler-owned worker threads.
///
/// The pool is a dedicated multi-threaded Tokio runtime, independent of any
/// runtime the caller happens to run on. Delays are measured from the moment
/// `schedule` is called.
#[derive(Debug)]
pub struct VisibilityScheduler {
    runtime: Mutex<Option<Runtime>>,
    counters: Arc<Counters>,
}

impl VisibilityScheduler {
    /// Start a scheduler backed by `worker_threads` threads
    pub fn new(worker_threads: usize) -> Result<Self, QueueError> {
        if worker_threads == 0 {
            return Err(QueueError::out_of_range(
                "scheduler_worker_threads",
                "must be at least 1",
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("visibility-scheduler")
            .enable_time()
            .build()
            .map_err(|e| QueueError::SchedulerUnavailable {
                message: format!("failed to start worker pool: {e}"),
            })?;

        debug!(worker_threads, "Started visibility scheduler");

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Run `action` once `delay` has elapsed, unless cancelled first
    pub fn schedule<F, E>(&self, delay: Duration, action: F) -> Result<CancelToken, QueueError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let token = CancelToken::new();
        self.schedule_with_token(token.clone(), delay, action)?;
        Ok(token)
    }

    /// Arm a token created up front with [`CancelToken::new`].
    ///
    /// A token that was already cancelled stays cancelled and its action is
    /// dropped without running.
    pub fn schedule_with_token<F, E>(
        &self,
        token: CancelToken,
        delay: Duration,
        action: F,
    ) -> Result<(), QueueError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let handle = self.handle()?;
        let counters = Arc::clone(&self.counters);
        counters.scheduled.fetch_add(1, Ordering::Relaxed);

        handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.inner.wake.notified() => {}
            }

            if !token.try_fire() {
                return;
            }
            counters.fired.fetch_add(1, Ordering::Relaxed);

            if let Err(e) = action.await {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Scheduled action failed");
            }
        });

        Ok(())
    }

    /// Cancel the action behind `token`.
    ///
    /// Returns true only if the action had not started and now never will.
    /// Cancelling an action that already fired, or cancelling twice, is a
    /// no-op returning false.
    pub fn cancel(&self, token: &CancelToken) -> bool {
        let cancelled = token.try_cancel();
        if cancelled {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        cancelled
    }

    /// Current activity counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            fired: self.counters.fired.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// True until [`shutdown`](Self::shutdown) has been called
    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the worker pool, dropping every action that has not fired.
    ///
    /// Does not wait for running actions; safe to call from async code.
    pub fn shutdown(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(runtime) = runtime {
            let pending = self.stats().pending();
            if pending > 0 {
                warn!(pending, "Shutting down with unfired scheduled actions");
            }
            runtime.shutdown_background();
        }
    }

    fn handle(&self) -> Result<Handle, QueueError> {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|runtime| runtime.handle().clone())
            .ok_or_else(|| QueueError::SchedulerUnavailable {
                message: "scheduler has been shut down".to_string(),
            })
    }
}

impl Drop for VisibilityScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
