//! Cancellation and deadline scope for a request.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a request context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextErrorKind {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for ContextErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextErrorKind::Cancelled => write!(f, "request cancelled"),
            ContextErrorKind::DeadlineExceeded => write!(f, "request deadline exceeded"),
        }
    }
}

/// Error returned when a request is abandoned because its context ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextError {
    pub kind: ContextErrorKind,
    /// Number of attempts that were started.
    pub attempts: usize,
    /// Message of the last failed attempt, if one failed before the context ended.
    pub last_error: Option<String>,
}

impl ContextError {
    pub fn is_cancelled(&self) -> bool {
        self.kind == ContextErrorKind::Cancelled
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.kind == ContextErrorKind::DeadlineExceeded
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} attempt(s)", self.kind, self.attempts)?;
        if let Some(last) = &self.last_error {
            write!(f, ", last error: {}", last)?;
        }
        Ok(())
    }
}

impl std::error::Error for ContextError {}

/// Cancellation token plus optional deadline bound to one request.
///
/// Cloning shares the token, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context that is cancelled together with `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns why the context ended, or `None` while it is still live.
    pub fn status(&self) -> Option<ContextErrorKind> {
        if self.token.is_cancelled() {
            return Some(ContextErrorKind::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(ContextErrorKind::DeadlineExceeded)
            }
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextErrorKind {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ContextErrorKind::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextErrorKind::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextErrorKind::Cancelled
            }
        }
    }
}
