//! Failed-attempt lockout policy for authentication.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::coordinator::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    /// The failure count is over the threshold; the caller should be told
    /// about the lockout.
    LockoutEntered,
    StillOpen,
}

/// Tracks consecutive authentication failures and derives the
/// locked/unlocked state with a self-resetting timer.
///
/// The timer never mutates state directly: firing posts
/// [`Command::LockoutTimerFired`] onto the coordinator queue, and the
/// worker applies the reset when it gets there. Re-arming aborts any
/// pending timer, so each over-threshold failure pushes the unlock time
/// further out.
pub(crate) struct LockoutTracker {
    threshold: u32,
    duration: Duration,
    failed_attempts: u32,
    locked_until: Option<Instant>,
    reset_timer: Option<AbortHandle>,
    commands: UnboundedSender<Command>,
}

impl LockoutTracker {
    pub(crate) fn new(
        threshold: u32,
        duration: Duration,
        commands: UnboundedSender<Command>,
    ) -> Self {
        Self {
            threshold,
            duration,
            failed_attempts: 0,
            locked_until: None,
            reset_timer: None,
            commands,
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.failed_attempts > self.threshold
    }

    pub(crate) fn locked_until(&self) -> Option<Instant> {
        self.locked_until
    }

    pub(crate) fn record_failure(&mut self) -> LockoutStatus {
        self.failed_attempts += 1;
        if self.failed_attempts > self.threshold {
            self.arm_reset_timer();
            LockoutStatus::LockoutEntered
        } else {
            LockoutStatus::StillOpen
        }
    }

    /// A successful match clears the count immediately. A reset timer that
    /// is still pending is left to fire; its later reset is a no-op.
    pub(crate) fn record_success(&mut self) {
        if self.is_locked() {
            debug!("reset lockout after successful match");
        }
        self.failed_attempts = 0;
        self.locked_until = None;
    }

    /// Applied by the worker when the posted timer firing reaches the
    /// front of the queue.
    pub(crate) fn handle_timer_fired(&mut self) {
        if self.is_locked() {
            debug!("lockout timer fired; reopening authentication");
        }
        self.failed_attempts = 0;
        self.locked_until = None;
        self.reset_timer = None;
    }

    fn arm_reset_timer(&mut self) {
        if let Some(pending) = self.reset_timer.take() {
            pending.abort();
        }
        self.locked_until = Some(Instant::now() + self.duration);
        let commands = self.commands.clone();
        let duration = self.duration;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = commands.send(Command::LockoutTimerFired);
        });
        self.reset_timer = Some(timer.abort_handle());
    }
}
