//! Bounded retry with exponential backoff
//!
//! Wraps every external collaborator call. Each attempt races a per-attempt
//! deadline and the caller's cancellation token; only errors classified as
//! retryable are attempted again.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Deadline for a single attempt. `None` waits indefinitely.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: Option<u64>,
}

fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 200 }
fn default_max_backoff_ms() -> u64 { 5_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_attempt_timeout_ms() -> Option<u64> { Some(30_000) }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_multiplier(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl RetryConfig {
    /// One attempt, no deadline.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout_ms: None,
            ..Self::default()
        }
    }

    /// Exponential schedule between attempts: starts at the initial backoff,
    /// grows by the multiplier, never exceeds the cap.
    pub fn policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_factor(self.backoff_multiplier.max(1.0) as f32)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Delays the policy will sleep, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.policy().build().collect()
    }
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let attempt_timeout = config.attempt_timeout_ms.map(Duration::from_millis);
    let attempt = || {
        let call = operation();
        async move {
            match attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(CollaboratorError::Timeout(limit))),
                None => call.await,
            }
        }
    };

    let mut retries = 0u32;
    let retrying = attempt
        .retry(config.policy())
        .when(CollaboratorError::is_retryable)
        .notify(|err, delay| {
            retries += 1;
            warn!(call = label, retry = retries, error = %err, delay_ms = delay.as_millis() as u64, "retrying collaborator call");
        });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
        result = retrying => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            attempt_timeout_ms: Some(200),
        }
    }

    #[test]
    fn test_policy_grows_and_caps() {
        let ms = |v: &[u64]| v.iter().map(|m| Duration::from_millis(*m)).collect::<Vec<_>>();
        assert_eq!(RetryConfig::default().delays(), ms(&[200, 400]));

        let long = RetryConfig { max_attempts: 7, ..RetryConfig::default() };
        assert_eq!(long.delays(), ms(&[200, 400, 800, 1_600, 3_200, 5_000]));

        assert!(RetryConfig::none().delays().is_empty());
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: RetryConfig = toml::from_str("").unwrap();
        assert_eq!(config, RetryConfig::default());
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(&fast(), &CancellationToken::new(), "flaky", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CollaboratorError::Unavailable("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), &CancellationToken::new(), "pool", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Rejected("no".into()))
        })
        .await;
        assert_eq!(result, Err(CollaboratorError::Rejected("no".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), &CancellationToken::new(), "down", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Unavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(CollaboratorError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_timeout_and_cancellation() {
        let config = RetryConfig { max_attempts: 1, attempt_timeout_ms: Some(10), ..fast() };
        let result: Result<(), _> = with_retry(&config, &CancellationToken::new(), "slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(CollaboratorError::Timeout(Duration::from_millis(10))));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_retry(&fast(), &cancel, "cancelled", || async { Ok(()) }).await;
        assert_eq!(result, Err(CollaboratorError::Cancelled));
    }
}
