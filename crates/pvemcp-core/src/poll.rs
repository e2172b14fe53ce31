//! Bounded polling

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout_at};

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Ready(T),
    Pending,
}

/// Call `probe` every `interval` until it is ready or `deadline` passes
///
/// Each probe is itself cut off at the deadline. Returns `None` when the
/// deadline is reached first.
pub async fn poll_until<T, F, Fut>(interval: Duration, deadline: Instant, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    loop {
        match timeout_at(deadline, probe()).await {
            Ok(Probe::Ready(value)) => return Some(value),
            Ok(Probe::Pending) => {}
            Err(_) => return None,
        }

        match Instant::now().checked_add(interval) {
            Some(next) if next <= deadline => sleep_until(next).await,
            _ => {
                sleep_until(deadline).await;
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_probe() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = Instant::now();

        let value = poll_until(
            Duration::from_millis(500),
            start + Duration::from_secs(30),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                        Probe::Ready("done")
                    } else {
                        Probe::Pending
                    }
                }
            },
        )
        .await;

        assert_eq!(value, Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = Instant::now();

        let value: Option<()> = poll_until(
            Duration::from_millis(500),
            start + Duration::from_secs(2),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Probe::Pending }
            },
        )
        .await;

        assert_eq!(value, None);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        // probes at 0, 0.5, 1.0, 1.5 and 2.0
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_is_cut_off() {
        let start = Instant::now();
        let value: Option<()> = poll_until(
            Duration::from_millis(500),
            start + Duration::from_secs(3),
            || async {
                std::future::pending::<()>().await;
                Probe::Pending
            },
        )
        .await;

        assert_eq!(value, None);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_interval_waits_for_deadline() {
        let start = Instant::now();
        let value: Option<()> = poll_until(Duration::MAX, start + Duration::from_secs(1), || async {
            Probe::Pending
        })
        .await;

        assert_eq!(value, None);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }
}
