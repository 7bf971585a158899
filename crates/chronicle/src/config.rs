//! Ledger configuration.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chronicle_store::StoreError;

use crate::error::{LedgerError, Result};

/// Exponential backoff for transient store failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run a store operation, retrying transient failures with backoff.
    pub async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> std::result::Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let mut retry = 0;
        loop {
            match f().await {
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    let delay = self.backoff(retry);
                    tracing::warn!(op, retry = retry + 1, ?delay, error = %e, "transient store failure, retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 20,
            max_backoff_ms: 1_000,
        }
    }
}

/// Configuration for the Ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How many times an append is rebuilt after losing a race for the tail.
    pub max_append_attempts: u32,

    /// Retries for transient store failures on reads and writes.
    pub retry: RetryPolicy,

    /// Chains whose tail is kept in memory.
    pub cache_capacity: usize,

    /// Events fetched per page when scanning a chain.
    pub page_size: u32,

    /// Chains verified concurrently by organization-wide operations.
    pub verify_concurrency: usize,

    /// Upper bound on one organization-wide verification or export.
    pub verify_timeout_ms: u64,
}

impl LedgerConfig {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    /// Reject settings the ledger cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_append_attempts == 0 {
            return Err(LedgerError::Config("max_append_attempts must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(LedgerError::Config("page_size must be at least 1".into()));
        }
        if self.verify_concurrency == 0 {
            return Err(LedgerError::Config("verify_concurrency must be at least 1".into()));
        }
        if self.verify_timeout_ms == 0 {
            return Err(LedgerError::Config("verify_timeout_ms must be positive".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(LedgerError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_attempts: 5,
            retry: RetryPolicy::default(),
            cache_capacity: 10_000,
            page_size: 500,
            verify_concurrency: 8,
            verify_timeout_ms: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        LedgerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let config = LedgerConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));

        let config = LedgerConfig {
            verify_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(50));
        assert_eq!(policy.backoff(40), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_run_retries_transient_failures() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        };

        let mut calls = 0;
        let result: std::result::Result<u32, StoreError> = policy
            .run("test", || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(StoreError::Unavailable("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);

        let mut calls = 0;
        let result: std::result::Result<(), StoreError> = policy
            .run("test", || {
                calls += 1;
                async { Err(StoreError::Unavailable("down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_permanent_failures() {
        let mut calls = 0;
        let result: std::result::Result<(), StoreError> = RetryPolicy::default()
            .run("test", || {
                calls += 1;
                async { Err(StoreError::InvalidData("corrupt".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"page_size": 10, "retry": {"max_retries": 0}}"#).unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.initial_backoff_ms, 20);
        assert_eq!(config.verify_concurrency, 8);
    }
}
