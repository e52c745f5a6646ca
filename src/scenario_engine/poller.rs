use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::errors::{PilotError, PilotResult};

/// Attempt budget of one wait: `attempts` probes spaced by `interval`, plus
/// the final observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollSpec {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    pub const fn millis(attempts: u32, interval_ms: u64) -> Self {
        Self::new(attempts, Duration::from_millis(interval_ms))
    }
}

/// Waits and delays bound to one run's cancellation token.
#[derive(Debug, Clone)]
pub struct Poller {
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check(&self) -> PilotResult<()> {
        if self.cancel.is_cancelled() {
            Err(PilotError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless the run is cancelled first.
    pub async fn delay(&self, duration: Duration) -> PilotResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PilotError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Waits one interval, then probes; repeats `spec.attempts` times and
    /// returns the first `Some`. Once the budget is spent the probe runs one
    /// last time with `is_final = true` for logging, and the wait fails with
    /// [`PilotError::TimedOut`].
    ///
    /// Cancellation is checked before anything else on every iteration.
    pub async fn poll_until<T, F, Fut>(
        &self,
        what: &str,
        spec: PollSpec,
        mut probe: F,
    ) -> PilotResult<T>
    where
        F: FnMut(bool) -> Fut,
        Fut: Future<Output = PilotResult<Option<T>>>,
    {
        let started = Instant::now();
        let mut remaining = spec.attempts;
        loop {
            self.check()?;

            if remaining == 0 {
                if let Err(e) = probe(true).await {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    tracing::debug!(what, error = %e, "final probe failed");
                }
                let elapsed = started.elapsed();
                tracing::debug!(what, attempts = spec.attempts, ?elapsed, "wait timed out");
                return Err(PilotError::TimedOut {
                    what: what.to_string(),
                    attempts: spec.attempts,
                    elapsed,
                });
            }

            self.delay(spec.interval).await?;
            if let Some(value) = probe(false).await? {
                return Ok(value);
            }
            remaining -= 1;
        }
    }

    /// [`Self::poll_until`] for plain conditions.
    pub async fn poll<F, Fut>(
        &self,
        what: &str,
        spec: PollSpec,
        mut predicate: F,
    ) -> PilotResult<()>
    where
        F: FnMut(bool) -> Fut,
        Fut: Future<Output = PilotResult<bool>>,
    {
        self.poll_until(what, spec, |is_final| {
            let fut = predicate(is_final);
            async move { Ok(fut.await?.then_some(())) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn spec(attempts: u32) -> PollSpec {
        PollSpec::millis(attempts, 1)
    }

    #[tokio::test]
    async fn exhausted_budget_calls_the_predicate_attempts_plus_one_times() {
        let poller = Poller::new(CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));
        let finals = Arc::new(AtomicU32::new(0));

        let result = poller
            .poll("never", spec(3), |is_final| {
                let calls = calls.clone();
                let finals = finals.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if is_final {
                        finals.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(false)
                }
            })
            .await;

        assert!(matches!(result, Err(PilotError::TimedOut { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(finals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_wins_before_the_first_probe() {
        let token = CancellationToken::new();
        token.cancel();
        let poller = Poller::new(token);
        let calls = Arc::new(AtomicU32::new(0));

        let result = poller
            .poll("anything", spec(5), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            })
            .await;

        assert!(matches!(result, Err(PilotError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn returns_the_first_value() {
        let poller = Poller::new(CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));

        let value = poller
            .poll_until("third", spec(10), |_| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok((n == 3).then_some(n * 10))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_only_makes_the_final_observation() {
        let poller = Poller::new(CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));
        let result = poller
            .poll("instant", spec(0), |is_final| {
                let calls = calls.clone();
                async move {
                    assert!(is_final);
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            })
            .await;
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelling_interrupts_a_long_wait() {
        let token = CancellationToken::new();
        let poller = Poller::new(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = Instant::now();
        let result = poller
            .poll("slow", PollSpec::millis(100, 10_000), |_| async { Ok(false) })
            .await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(PilotError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
