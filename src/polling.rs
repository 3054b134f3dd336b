//! Fixed-interval polling until a terminal status.
//!
//! [`StatusTracker`] is the state machine: it owns the current target id and
//! the latest applied status, and hands out a [`PollTicket`] per target.
//! Results carrying a stale ticket (target changed, or the tracker stopped)
//! are dropped. [`PollLoop`] drives a tracker: fetch, apply, sleep, repeat.
//! Fetch failures are logged and retried on the next tick; only a terminal
//! status from the backend ends the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ClientError;

/// Task-status interval for the recommendation flow.
pub const TASK_POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// Refresh interval for the debug-run tracker.
pub const RUN_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// A status value that may end polling.
pub trait Pollable {
    fn is_terminal(&self) -> bool;
}

/// Shared cancellation flag, checked before any poll result is applied.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Captured at poll start; identifies which target a result belongs to.
#[derive(Debug, Clone)]
pub struct PollTicket {
    target: String,
    generation: u64,
    cancel: CancelFlag,
}

impl PollTicket {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Result belonged to a superseded target or a stopped tracker
    Stale,
    Progress,
    Terminal,
}

#[derive(Debug)]
pub struct StatusTracker<T> {
    target: Option<String>,
    generation: u64,
    cancel: CancelFlag,
    latest: Option<T>,
}

impl<T> Default for StatusTracker<T> {
    fn default() -> Self {
        Self {
            target: None,
            generation: 0,
            cancel: CancelFlag::new(),
            latest: None,
        }
    }
}

impl<T: Pollable> StatusTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the tracker at a new target. Any ticket for the previous target
    /// is cancelled and its late results will be ignored.
    pub fn retarget(&mut self, target: impl Into<String>) -> PollTicket {
        self.cancel.cancel();
        self.cancel = CancelFlag::new();
        self.generation += 1;
        self.latest = None;
        let target = target.into();
        self.target = Some(target.clone());
        PollTicket {
            target,
            generation: self.generation,
            cancel: self.cancel.clone(),
        }
    }

    /// Stop tracking; outstanding tickets become stale.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.target = None;
    }

    pub fn apply(&mut self, ticket: &PollTicket, status: T) -> Applied {
        if ticket.is_cancelled()
            || ticket.generation != self.generation
            || self.target.as_deref() != Some(ticket.target.as_str())
        {
            return Applied::Stale;
        }
        if self.is_finished() {
            return Applied::Stale;
        }

        let terminal = status.is_terminal();
        self.latest = Some(status);
        if terminal {
            Applied::Terminal
        } else {
            Applied::Progress
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Latest applied status; `None` means nothing observed yet ("starting").
    pub fn latest(&self) -> Option<&T> {
        self.latest.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.latest.as_ref().is_some_and(Pollable::is_terminal)
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Finished(T),
    Cancelled,
    /// The tracker moved to another target while this loop was running
    Superseded,
    /// Deadline passed; carries the last observed status
    TimedOut(Option<T>),
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone)]
pub struct PollLoop<S = ThreadSleeper> {
    interval: Duration,
    max_wait: Option<Duration>,
    sleeper: S,
}

impl PollLoop<ThreadSleeper> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
            sleeper: ThreadSleeper,
        }
    }
}

impl<S: Sleeper> PollLoop<S> {
    pub fn with_sleeper(interval: Duration, sleeper: S) -> Self {
        Self {
            interval,
            max_wait: None,
            sleeper,
        }
    }

    pub fn max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `fetch` for `ticket`'s target until a terminal status.
    ///
    /// `on_progress` sees every applied non-terminal status; the terminal one
    /// is returned in [`PollOutcome::Finished`] instead.
    pub fn run<T, F, P>(
        &self,
        tracker: &mut StatusTracker<T>,
        ticket: &PollTicket,
        mut fetch: F,
        mut on_progress: P,
    ) -> PollOutcome<T>
    where
        T: Pollable + Clone,
        F: FnMut(&str) -> Result<T, ClientError>,
        P: FnMut(&T),
    {
        // A deadline too far out to represent means no deadline.
        let deadline = self
            .max_wait
            .and_then(|wait| Instant::now().checked_add(wait));

        loop {
            if ticket.is_cancelled() {
                return PollOutcome::Cancelled;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::info!(target_id = ticket.target(), "polling timed out");
                return PollOutcome::TimedOut(tracker.latest().cloned());
            }

            match fetch(ticket.target()) {
                Ok(status) => match tracker.apply(ticket, status) {
                    Applied::Stale if ticket.is_cancelled() => return PollOutcome::Cancelled,
                    Applied::Stale => return PollOutcome::Superseded,
                    Applied::Progress => {
                        if let Some(latest) = tracker.latest() {
                            on_progress(latest);
                        }
                    }
                    Applied::Terminal => {
                        if let Some(latest) = tracker.latest() {
                            tracing::info!(target_id = ticket.target(), "polling reached terminal status");
                            return PollOutcome::Finished(latest.clone());
                        }
                    }
                },
                Err(err) => {
                    tracing::warn!(target_id = ticket.target(), error = %err, "poll failed, retrying");
                }
            }

            self.sleeper.sleep(self.interval);
        }
    }
}
