//! Run cancellation token.
//!
//! A token is a chain of watch signals: its own plus every ancestor's. It
//! reports cancelled once any signal in the chain is set, so cancelling a
//! parent reaches every child while a child never affects its parent.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    signals: Vec<Arc<watch::Sender<bool>>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Root token.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            signals: vec![Arc::new(tx)],
        }
    }

    /// Token cancelled with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        let (tx, _) = watch::channel(false);
        let mut signals = self.signals.clone();
        signals.push(Arc::new(tx));
        Self { signals }
    }

    /// Cancel this token and its children. Idempotent.
    pub fn cancel(&self) {
        if let Some(own) = self.signals.last() {
            own.send_replace(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.iter().any(|s| *s.borrow())
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let waits = self.signals.iter().map(|signal| {
            let mut rx = signal.subscribe();
            Box::pin(async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    std::future::pending::<()>().await;
                }
            })
        });
        futures::future::select_all(waits).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancels_child_but_not_reverse() {
        let parent = CancelToken::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), sibling.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_cancel_wakes_pending_poll() {
        let token = CancelToken::new();
        let mut waiting = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(waiting.poll());

        token.cancel();
        assert!(waiting.is_woken());
        tokio_test::assert_ready!(waiting.poll());
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let token = CancelToken::new().child().child();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
