//! Cancellable, optionally deadline-bound execution contexts.
//!
//! A [`JobContext`] is threaded through every job of a batch. It wraps a
//! [`CancellationToken`] and adds two things the token lacks: an optional
//! deadline and a record of *why* the context ended.
//!
//! Contexts form a tree. Cancelling a context cancels all of its descendants,
//! never its ancestors. The first recorded cause wins: once a context reports
//! [`ContextError::DeadlineExceeded`], a later `cancel()` does not turn it into
//! [`ContextError::Cancelled`].

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`JobContext`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ContextError {
    /// The context, or one of its ancestors, was cancelled explicitly.
    #[error("context cancelled")]
    Cancelled,

    /// The context's deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation signal with an optional deadline.
///
/// Cloning is cheap and every clone observes the same signal.
///
/// # Examples
///
/// ```
/// use parallel_jobs::{ContextError, JobContext};
///
/// let parent = JobContext::new();
/// let child = parent.child();
///
/// parent.cancel();
/// assert!(child.is_done());
/// assert_eq!(child.err(), Some(ContextError::Cancelled));
/// ```
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: OnceLock<ContextError>,
    parent: Option<JobContext>,
}

impl JobContext {
    /// Creates a root context that ends only when cancelled.
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wraps an existing token. Cancelling the token externally is reported
    /// as [`ContextError::Cancelled`].
    pub fn from_token(token: CancellationToken) -> Self {
        Self::from_parts(token, None, None)
    }

    fn from_parts(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<JobContext>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                token,
                deadline,
                cause: OnceLock::new(),
                parent,
            }),
        }
    }

    /// Derives a child that can be cancelled without affecting this context.
    ///
    /// The child inherits this context's deadline, if any.
    pub fn child(&self) -> Self {
        Self::from_parts(
            self.inner.token.child_token(),
            self.inner.deadline,
            Some(self.clone()),
        )
    }

    /// Derives a child that expires `timeout` from now.
    ///
    /// A timeout too large to be represented as an instant leaves the child
    /// bounded only by this context, as [`child`](Self::child) does.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derives a child that expires at `deadline`.
    ///
    /// An earlier deadline inherited from this context still applies.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(inherited) if inherited < deadline => inherited,
            _ => deadline,
        };
        let ctx = Self::from_parts(
            self.inner.token.child_token(),
            Some(deadline),
            Some(self.clone()),
        );
        ctx.spawn_deadline_timer(deadline);
        ctx
    }

    // Cancels the token at the deadline so that raw token holders and child
    // tokens see the expiry. Without a runtime the deadline is still enforced
    // lazily by `err` and `done`.
    fn spawn_deadline_timer(&self, deadline: Instant) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let ctx = self.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = ctx.inner.token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    ctx.cancel_with(ContextError::DeadlineExceeded);
                }
            }
        });
    }

    /// Cancels this context and all of its descendants. Idempotent.
    pub fn cancel(&self) {
        self.cancel_with(ContextError::Cancelled);
    }

    fn cancel_with(&self, cause: ContextError) {
        let cause = self.parent_err().unwrap_or(cause);
        let _ = self.inner.cause.set(cause);
        self.inner.token.cancel();
    }

    fn parent_err(&self) -> Option<ContextError> {
        self.inner.parent.as_ref().and_then(JobContext::err)
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns why the context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(*cause);
        }
        if let Some(cause) = self.parent_err() {
            self.inner.token.cancel();
            return Some(*self.inner.cause.get_or_init(|| cause));
        }
        if self.deadline_passed() {
            self.cancel_with(ContextError::DeadlineExceeded);
            return self.inner.cause.get().copied();
        }
        if self.inner.token.is_cancelled() {
            return Some(*self.inner.cause.get_or_init(|| ContextError::Cancelled));
        }
        None
    }

    /// Returns `true` once the context has been cancelled or has expired.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Fails fast when the context has already ended.
    ///
    /// Intended for the top of a job body:
    ///
    /// ```
    /// use parallel_jobs::{ContextError, JobContext};
    ///
    /// fn step(ctx: &JobContext) -> Result<u32, ContextError> {
    ///     ctx.check()?;
    ///     Ok(42)
    /// }
    ///
    /// let ctx = JobContext::new();
    /// assert_eq!(step(&ctx), Ok(42));
    /// ctx.cancel();
    /// assert_eq!(step(&ctx), Err(ContextError::Cancelled));
    /// ```
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Waits until the context is cancelled or its deadline elapses.
    pub async fn done(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.cancel_with(ContextError::DeadlineExceeded);
                    }
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }

    /// The instant at which this context expires, if bounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline, if bounded. Zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The underlying token, for interop with code that speaks
    /// [`CancellationToken`].
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Returns a guard that cancels this context when dropped.
    pub fn guard(&self) -> ContextGuard {
        ContextGuard {
            ctx: Some(self.clone()),
        }
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}

/// Releases a derived context.
///
/// The context is cancelled when the guard is released or dropped, so every
/// exit path (including unwinding) releases it exactly once.
#[must_use = "dropping the guard cancels its context immediately"]
#[derive(Debug)]
pub struct ContextGuard {
    ctx: Option<JobContext>,
}

impl ContextGuard {
    /// Cancels the guarded context now.
    pub fn release(mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.cancel();
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_live() {
        let ctx = JobContext::new();
        assert!(!ctx.is_done());
        assert_eq!(ctx.err(), None);
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancel_reaches_children_not_parents() {
        let parent = JobContext::new();
        let child = parent.child();
        let grandchild = child.child();

        child.cancel();

        assert!(!parent.is_done());
        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert_eq!(grandchild.err(), Some(ContextError::Cancelled));
        assert!(grandchild.token().is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let ctx = JobContext::new();
        ctx.cancel();
        ctx.cancel();
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
    }

    #[test]
    fn test_external_token_cancellation() {
        let token = CancellationToken::new();
        let ctx = JobContext::from_token(token.clone());
        token.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let ctx = JobContext::new();
        {
            let _guard = ctx.guard();
            assert!(!ctx.is_done());
        }
        assert!(ctx.is_done());
    }

    #[test]
    fn test_guard_release_after_parent_cancel() {
        let parent = JobContext::new();
        let child = parent.child();
        let guard = child.guard();

        parent.cancel();
        guard.release();

        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = JobContext::new().with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.remaining(), Some(Duration::from_millis(50)));

        ctx.done().await;

        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cause_wins() {
        let ctx = JobContext::new().with_timeout(Duration::from_millis(5));
        ctx.done().await;
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_reports_parent_deadline() {
        let parent = JobContext::new().with_timeout(Duration::from_millis(10));
        let child = parent.child();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
        child.cancel();
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_inherited_deadline_applies() {
        let parent = JobContext::new().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_is_unbounded() {
        let ctx = JobContext::new().with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_done());

        let bounded = JobContext::new().with_timeout(Duration::from_millis(10));
        let child = bounded.with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), bounded.deadline());

        bounded.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cancels_token() {
        let ctx = JobContext::new().with_timeout(Duration::from_millis(10));
        let token = ctx.token().clone();

        token.cancelled().await;

        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_wakes_on_cancel() {
        let ctx = JobContext::new();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };

        ctx.cancel();

        waiter.await.unwrap();
        assert!(ctx.is_done());
    }
}
