//! Cancellation and deadline context supplied by the caller of an invocation.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-owned cancellation token plus an optional absolute deadline.
#[derive(Debug, Clone, Default)]
pub struct InvokeContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl InvokeContext {
    /// A context with no deadline that only ends when cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// A child context: cancelled with this one, optionally tighter deadline.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let ctx = Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        };
        match timeout {
            Some(t) => ctx.with_deadline(Instant::now() + t),
            None => ctx,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_done_fires_on_deadline() {
        let ctx = InvokeContext::with_timeout(Duration::from_secs(30));
        let started = Instant::now();
        ctx.done().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_deadline_only_cancel_ends() {
        let ctx = InvokeContext::new();
        assert!(tokio::time::timeout(Duration::from_secs(3600), ctx.done())
            .await
            .is_err());
        ctx.cancel();
        ctx.done().await;
    }

    #[tokio::test]
    async fn test_child_is_cancelled_with_parent() {
        let parent = InvokeContext::new();
        let child = parent.child(Some(Duration::from_secs(60)));
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), child.done())
            .await
            .expect("cancellation should propagate");
    }

    #[tokio::test]
    async fn test_cancelling_child_leaves_parent_running() {
        let parent = InvokeContext::new();
        let child = parent.child(None);
        child.cancel();
        child.done().await;
        assert!(
            tokio::time::timeout(Duration::from_millis(50), parent.done())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tighter_deadline_wins() {
        let ctx = InvokeContext::with_timeout(Duration::from_secs(1));

        let looser = ctx.child(Some(Duration::from_secs(60)));
        let started = Instant::now();
        looser.done().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));

        let ctx = InvokeContext::with_timeout(Duration::from_secs(10));
        let tighter = ctx.child(Some(Duration::from_millis(100)));
        let started = Instant::now();
        tighter.done().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_secs(1));
        assert!(tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .is_err());
    }
}
