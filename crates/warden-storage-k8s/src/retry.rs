//! Retrying read-modify-write cycles that lose optimistic concurrency races.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use warden_storage::{StorageError, StorageResult};

use crate::shutdown::ShutdownSignal;

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Runs `attempt` until it returns something other than `Conflict`.
///
/// Each attempt must redo the whole read, transform and write sequence with
/// fresh state. Between attempts the loop sleeps with jittered exponential
/// backoff. Once `budget` has elapsed the last conflict is reported as
/// `ConflictRetryExhausted`.
///
/// # Errors
///
/// Returns the first non-conflict error of an attempt,
/// `ConflictRetryExhausted` when the budget runs out, or `Cancelled` if the
/// storage is closed while waiting.
pub async fn retry_on_conflict<T, F, Fut>(
    budget: Duration,
    shutdown: &ShutdownSignal,
    kind: &str,
    name: &str,
    mut attempt: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match attempt().await {
            Err(StorageError::Conflict { .. }) => {}
            other => return other,
        }

        let elapsed = started.elapsed();
        if elapsed >= budget {
            tracing::warn!(
                kind,
                name,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Giving up after repeated update conflicts"
            );
            return Err(StorageError::conflict_retry_exhausted(kind, name, elapsed));
        }

        let delay = jitter(backoff).min(budget - elapsed);
        tracing::debug!(
            kind,
            name,
            attempts,
            delay_ms = delay.as_millis() as u64,
            "Update conflict, retrying"
        );
        if !shutdown.sleep(delay).await {
            return Err(StorageError::Cancelled);
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Picks a delay uniformly from `[base / 2, base]`.
fn jitter(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let low = base_ms / 2;
    Duration::from_millis(rand::thread_rng().gen_range(low..=base_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_conflicts() {
        let (_trigger, signal) = shutdown::channel();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry_on_conflict(Duration::from_secs(2), &signal, "k", "n", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(StorageError::conflict("k", "n"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let (_trigger, signal) = shutdown::channel();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = retry_on_conflict::<(), _, _>(Duration::from_secs(2), &signal, "k", "n", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::not_found("k", "n"))
        })
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted() {
        let (_trigger, signal) = shutdown::channel();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = retry_on_conflict::<(), _, _>(
            Duration::from_millis(200),
            &signal,
            "refreshtokens",
            "rt-1",
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::conflict("refreshtokens", "rt-1"))
            },
        )
        .await
        .unwrap_err();

        match err {
            StorageError::ConflictRetryExhausted { kind, name, elapsed } => {
                assert_eq!(kind, "refreshtokens");
                assert_eq!(name, "rt-1");
                assert!(elapsed >= Duration::from_millis(200));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_backing_off() {
        let (trigger, signal) = shutdown::channel();
        let calls = AtomicU32::new(0);

        let err = retry_on_conflict::<(), _, _>(Duration::from_secs(60), &signal, "k", "n", || {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                trigger.trigger();
            }
            async { Err(StorageError::conflict("k", "n")) }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let delay = jitter(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }
}
