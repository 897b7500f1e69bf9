//! Cancellation and deadline plumbing for a run.
//!
//! A [`RunContext`] bundles a `CancellationToken` with an optional
//! deadline. Orchestrators layer deadlines on top of the caller's
//! context (wall clock for the whole run, per-agent timeout inside it)
//! and report which layer fired. Child contexts never outlive their
//! parent's deadline: `with_deadline` clamps to the tighter of the two.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Why a context stopped being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextCause {
    /// The deadline elapsed.
    DeadlineExceeded,
    /// The token was cancelled externally.
    Cancelled,
}

/// A cancellable scope with an optional deadline.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// A fresh context with no deadline.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Wrap an externally owned token, e.g. one cancelled from a ctrl-c
    /// handler.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Derive a child context whose deadline is `timeout` from now,
    /// clamped to the parent's own deadline. Cancelling the parent
    /// cancels the child; not the other way around.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        let child = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => Some(parent.min(child)),
            None => Some(child),
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Non-blocking poll: why this context is dead, if it is.
    ///
    /// The deadline is checked first so a run that blew its wall clock
    /// reports `DeadlineExceeded` even if the caller also cancelled
    /// while tearing down.
    pub fn cause(&self) -> Option<ContextCause> {
        if self.deadline_exceeded() {
            Some(ContextCause::DeadlineExceeded)
        } else if self.is_cancelled() {
            Some(ContextCause::Cancelled)
        } else {
            None
        }
    }

    /// Resolve when the context dies, reporting the cause. Pends forever
    /// on a context with no deadline that is never cancelled.
    pub async fn done(&self) -> ContextCause {
        match self.deadline {
            Some(deadline) => {
                let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
                tokio::select! {
                    _ = self.cancel.cancelled() => ContextCause::Cancelled,
                    _ = sleep => ContextCause::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.cancelled().await;
                ContextCause::Cancelled
            }
        }
    }
}
