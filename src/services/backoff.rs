use crate::error::{RelayError, RelayResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay policy applied between failed poll cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay after every failure
    Fixed(Duration),
    /// Doubling delay capped at `max`, with jitter over the upper half
    Exponential { initial: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Upper bound of the delay before retry `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(delay) => *delay,
            BackoffPolicy::Exponential { initial, max } => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(*max)
            }
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(delay) => *delay,
            BackoffPolicy::Exponential { .. } => {
                let ceiling = self.ceiling(attempt);
                let half = ceiling / 2;
                let spread = (ceiling - half).as_millis() as u64;
                half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
            }
        }
    }
}

/// Retries `operation` on transient errors until it succeeds or `cancel` fires.
///
/// Returns `Ok(None)` when cancelled, and the first non-transient error as-is.
pub async fn retry_transient<T, F, Fut>(
    label: &str,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> RelayResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        match operation().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.is_transient() => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    error = %e,
                    error_kind = e.kind(),
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    "{} failed, retrying",
                    label
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = BackoffPolicy::Fixed(Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_ceiling_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
        };
        assert_eq!(policy.ceiling(1), Duration::from_secs(5));
        assert_eq!(policy.ceiling(2), Duration::from_secs(10));
        assert_eq!(policy.ceiling(4), Duration::from_secs(40));
        assert_eq!(policy.ceiling(5), Duration::from_secs(60));
        assert_eq!(policy.ceiling(500), Duration::from_secs(60));
    }

    #[test]
    fn test_exponential_delay_stays_in_upper_half() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_secs(4),
            max: Duration::from_secs(60),
        };
        for attempt in 1..10 {
            let ceiling = policy.ceiling(attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?}");
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?}");
        }
    }

    #[tokio::test]
    async fn test_retry_transient_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy::Fixed(Duration::from_millis(1));

        let result = retry_transient("head fetch", policy, &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RelayError::Connectivity("connection refused".into()))
            } else {
                Ok(105u64)
            }
        })
        .await;

        assert_eq!(result.unwrap(), Some(105));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_transient_surfaces_fatal_errors() {
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy::Fixed(Duration::from_millis(1));

        let result: RelayResult<Option<u64>> = retry_transient("head lookup", policy, &cancel, || async {
            Err(RelayError::ConfigError("no bytecode".into()))
        })
        .await;

        assert!(matches!(result, Err(RelayError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_retry_transient_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = BackoffPolicy::Fixed(Duration::from_secs(60));

        let result: RelayResult<Option<u64>> = retry_transient("head fetch", policy, &cancel, || async {
            Err(RelayError::Connectivity("unreachable".into()))
        })
        .await;

        assert_eq!(result.unwrap(), None);
    }
}
