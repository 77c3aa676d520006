//! Caller-supplied deadline and cancellation for storage operations.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::TypeError;

/// Deadline and cancellation signal carried into every storage operation.
///
/// Backends check [`OpContext::check`] before starting work and poll
/// [`OpContext::is_done`] while a statement runs so that a cancelled caller
/// aborts the in-flight operation instead of letting it finish in the
/// background. Cloning shares the same cancellation token.
#[derive(Clone, Debug)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl OpContext {
    /// A context with no deadline and a fresh, never-cancelled token.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a context that also expires at `deadline`.
    ///
    /// The earlier of the existing and the new deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Derive a context that expires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a context whose cancellation follows `token`.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            deadline: self.deadline,
            cancel: token,
        }
    }

    /// The cancellation token observed by this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with the reason the context is done, or `Ok(())` if it is live.
    pub fn check(&self) -> Result<(), TypeError> {
        if self.cancel.is_cancelled() {
            return Err(TypeError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(TypeError::DeadlineExceeded);
        }
        Ok(())
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        let cx = OpContext::background();
        assert!(!cx.is_done());
        assert_eq!(cx.check(), Ok(()));
        assert!(cx.deadline().is_none());
    }

    #[test]
    fn cancellation_is_observed() {
        let cx = OpContext::background();
        cx.cancellation_token().cancel();
        assert!(cx.is_done());
        assert_eq!(cx.check(), Err(TypeError::Cancelled));
    }

    #[test]
    fn clones_share_the_token() {
        let cx = OpContext::background();
        let child = cx.with_timeout(Duration::from_secs(60));
        cx.cancellation_token().cancel();
        assert_eq!(child.check(), Err(TypeError::Cancelled));
    }

    #[test]
    fn unrepresentable_timeout_means_no_deadline() {
        let cx = OpContext::background().with_timeout(Duration::MAX);
        assert!(cx.deadline().is_none());
        assert!(!cx.is_done());
    }

    #[test]
    fn elapsed_deadline_is_reported() {
        let cx = OpContext::background().with_deadline(Instant::now());
        assert!(cx.is_done());
        assert_eq!(cx.check(), Err(TypeError::DeadlineExceeded));
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let cx = OpContext::background()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(50));
        assert_eq!(cx.deadline(), Some(now + Duration::from_secs(5)));
    }
}
