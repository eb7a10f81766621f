//! Cooperative watchdog for long-running compilations.
//!
//! The CFG traversals are bounded by the reachable node count, but a
//! malformed or pathologically large graph can still make a compilation
//! crawl. Instead of hard timeouts on individual algorithmic steps, the
//! unbounded-looking loops call [`CompilationAlarm::check_progress`] at
//! fixed step intervals; once the configured step budget or deadline is
//! exceeded, the check raises a retryable [`Error::Bailout`](crate::Error::Bailout)
//! that aborts the current compilation unit without touching the host
//! process.
//!
//! This is a cancellation point, not a concurrency primitive: the engine is
//! single-threaded and the alarm is just a periodic counter/deadline check.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use crate::{Error, Result};

/// How many steps pass between wall-clock deadline checks. Counting is cheap,
/// `Instant::now` is not.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Cooperative progress watchdog checked inside the engine's graph walks.
///
/// An alarm can be unbounded (the default), limited by a total step budget,
/// limited by a wall-clock deadline, or both. Every traversal loop in the
/// engine accounts one step per iteration.
///
/// # Examples
///
/// ```rust
/// use irflow::utils::CompilationAlarm;
///
/// let alarm = CompilationAlarm::with_step_budget(1_000_000);
/// assert!(alarm.check_progress().is_ok());
/// ```
#[derive(Debug)]
pub struct CompilationAlarm {
    /// Total steps accounted so far.
    steps: AtomicU64,
    /// Maximum number of steps before the alarm trips, if any.
    step_budget: Option<u64>,
    /// Wall-clock deadline, if any.
    deadline: Option<Instant>,
}

impl CompilationAlarm {
    /// Creates an alarm that never trips.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            steps: AtomicU64::new(0),
            step_budget: None,
            deadline: None,
        }
    }

    /// Creates an alarm that trips after the given number of traversal steps.
    #[must_use]
    pub fn with_step_budget(budget: u64) -> Self {
        Self {
            steps: AtomicU64::new(0),
            step_budget: Some(budget),
            deadline: None,
        }
    }

    /// Creates an alarm that trips once the given wall-clock duration has
    /// elapsed, measured from this call.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            steps: AtomicU64::new(0),
            step_budget: None,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Accounts one traversal step and checks the alarm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bailout`] once the step budget or the deadline is
    /// exceeded. The condition is retryable: the caller should abandon the
    /// current compilation, not the process.
    pub fn check_progress(&self) -> Result<()> {
        let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(budget) = self.step_budget {
            if steps > budget {
                return Err(Error::Bailout {
                    message: format!(
                        "compilation watchdog expired after {steps} traversal steps (budget {budget})"
                    ),
                });
            }
        }

        if let Some(deadline) = self.deadline {
            if steps % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() > deadline {
                return Err(Error::Bailout {
                    message: format!("compilation watchdog deadline exceeded after {steps} steps"),
                });
            }
        }

        Ok(())
    }

    /// Returns the number of steps accounted so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }
}

impl Default for CompilationAlarm {
    fn default() -> Self {
        Self::unbounded()
    }
}
