//! Single-flight execution of token refresh work.

use std::future::Future;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::ui_error::{error_codes, UIError};

type Outcome = Result<(), UIError>;

#[derive(Default)]
struct Inner {
    in_progress: bool,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

/// Ensures only one refresh runs at a time.
///
/// The first caller becomes the leader and runs the work. Callers arriving while
/// it runs are queued and receive the leader's outcome without running anything
/// themselves.
#[derive(Default)]
pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
}

/// Clears the in-progress flag when the leader's future finishes, is cancelled or
/// unwinds. Dropping the queued senders wakes orphaned waiters.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let waiters = self.coordinator.take_waiters();
        if !waiters.is_empty() {
            warn!(
                "Refresh leader ended without an outcome, releasing {} waiter(s)",
                waiters.len()
            );
        }
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` unless a run is already in flight, in which case wait for that
    /// run's outcome instead.
    pub async fn execute<F, Fut>(&self, work: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let receiver = {
            let mut inner = self.lock();
            if inner.in_progress {
                let (sender, receiver) = oneshot::channel();
                inner.waiters.push(sender);
                Some(receiver)
            } else {
                inner.in_progress = true;
                None
            }
        };

        if let Some(receiver) = receiver {
            debug!("Refresh already in progress, waiting for its outcome");
            return receiver.await.unwrap_or_else(|_| Err(abandoned()));
        }

        let guard = LeaderGuard { coordinator: self };
        let outcome = work().await;

        let waiters = self.take_waiters();
        std::mem::forget(guard);
        debug!("Refresh finished, notifying {} waiter(s)", waiters.len());
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    /// True while a leader is running.
    pub fn in_progress(&self) -> bool {
        self.lock().in_progress
    }

    fn take_waiters(&self) -> Vec<oneshot::Sender<Outcome>> {
        let mut inner = self.lock();
        inner.in_progress = false;
        std::mem::take(&mut inner.waiters)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn abandoned() -> UIError {
    UIError::new(
        "Token",
        error_codes::TOKEN_RENEWAL_ERROR,
        "A technical problem occurred during token processing",
    )
    .with_details("The token renewal was abandoned before it completed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui_error::ErrorFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_caller_runs_work() {
        let coordinator = RefreshCoordinator::new();
        let result = coordinator.execute(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert!(!coordinator.in_progress());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = coordinator.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .execute(|| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!coordinator.in_progress());
    }

    #[tokio::test]
    async fn test_error_fans_out_to_every_waiter() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .execute(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Err(ErrorFactory::from_exception("refresh exploded"))
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let waiter_runs = Arc::new(AtomicUsize::new(0));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                let waiter_runs = waiter_runs.clone();
                tokio::spawn(async move {
                    coordinator
                        .execute(|| async move {
                            waiter_runs.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();
        while coordinator.lock().waiters.len() < 3 {
            tokio::task::yield_now().await;
        }
        release_tx.send(()).unwrap();

        let leader_error = leader.await.unwrap().unwrap_err();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap_err(), leader_error);
        }
        assert_eq!(waiter_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .execute(|| async move {
                        let _ = started_tx.send(());
                        std::future::pending::<()>().await;
                        Ok(())
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.execute(|| async { Ok(()) }).await })
        };
        while coordinator.lock().waiters.is_empty() {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let error = waiter.await.unwrap().unwrap_err();
        assert_eq!(error.error_code(), error_codes::TOKEN_RENEWAL_ERROR);
        assert!(!coordinator.in_progress());

        let next = coordinator.execute(|| async { Ok(()) }).await;
        assert!(next.is_ok());
    }
}
