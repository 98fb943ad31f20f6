//! Cancellable periodic maintenance tasks
//!
//! Background sweeps (index persistence, context expiry, backup cleanup) run
//! on fixed intervals, independent of request handling. Each task is tied to
//! a cancellation token and stops deterministically on shutdown instead of
//! being left as an untracked timer. Sweep failures are the sweep's problem:
//! they get logged inside the closure and never reach in-flight requests.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run `task` every `interval` until `token` is cancelled
///
/// The first run happens one full interval after spawning. Ticks missed
/// while a run is in progress are skipped rather than bursted.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of tokio's interval fires immediately; consume it
        // so the task waits a full period before its first run
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task = name, "Maintenance task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    task().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_periodic_task_runs_and_stops() {
        let token = CancellationToken::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let handle = spawn_periodic(
            "test_sweep",
            Duration::from_millis(10),
            token.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        token.cancel();
        handle.await.unwrap();

        let after_cancel = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() {
        let token = CancellationToken::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let handle = spawn_periodic(
            "never_runs",
            Duration::from_secs(3600),
            token.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        token.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
