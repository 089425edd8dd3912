use crate::storage::{StorageError, StorageResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation carried into every storage call.
///
/// Derived contexts get a child cancellation token: cancelling a parent
/// cancels every context derived from it, never the other way round.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl QueryContext {
    /// A context with no deadline that is never cancelled unless asked to.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that expires after `timeout`, or at the parent's
    /// deadline if that comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    /// Derive a context that can be cancelled independently of this one.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` until it completes, the deadline passes, or the context is
    /// cancelled. An already-expired or cancelled context never polls `fut`.
    pub(crate) async fn run<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) if deadline <= Instant::now() => Err(StorageError::Timeout),
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| StorageError::Timeout)?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StorageError::Cancelled),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_background_has_no_deadline() {
        let ctx = QueryContext::background();
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = QueryContext::background().with_timeout(Duration::from_millis(100));
        let child = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline().unwrap() < parent.deadline().unwrap());
    }

    #[test]
    fn test_cancellation_flows_to_children_only() {
        let parent = QueryContext::background();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_context_never_polls_future() {
        let ctx = QueryContext::background();
        ctx.cancel();

        let polled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&polled);
        let result = ctx
            .run(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_expired_deadline_never_polls_future() {
        let ctx = QueryContext::background().with_deadline(Instant::now());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let polled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&polled);
        let result = ctx
            .run(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StorageError::Timeout)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_slow_call() {
        let ctx = QueryContext::background().with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StorageError::Timeout)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let ctx = QueryContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_completed_call_passes_result_through() {
        let ctx = QueryContext::background().with_timeout(Duration::from_secs(1));
        let value = ctx.run(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);

        let err = ctx
            .run(async { Err::<(), _>(StorageError::NotFound) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
