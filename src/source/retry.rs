//! Bounded retries around a row source
//!
//! Only transient failures (`SourceUnavailable`) are retried; query errors
//! and cancellation pass straight through. With `max_attempts == 1` the
//! decorator is a plain pass-through.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::SourceConfig;
use crate::error::Result;

use super::{QuerySpec, RowPage, RowSource};

/// Retry schedule for source calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = calculate_backoff(
                        attempt,
                        self.initial_delay,
                        self.max_delay,
                        self.multiplier,
                    );
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt + 1,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Row source decorator applying a [`RetryPolicy`] to every call
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: RowSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: RowSource> RowSource for RetryingSource<S> {
    async fn count(&self, query: &QuerySpec) -> Result<u64> {
        self.policy
            .run("Row count", || self.inner.count(query))
            .await
    }

    async fn fetch(&self, query: &QuerySpec, offset: u64, limit: u64) -> Result<RowPage> {
        let what = format!("Fetch at offset {offset}");
        self.policy
            .run(&what, || self.inner.fetch(query, offset, limit))
            .await
    }
}

/// Exponential backoff with ±25% jitter
fn calculate_backoff(
    attempt: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
) -> Duration {
    let base_delay = initial_delay.as_millis() as f64 * multiplier.powi(attempt as i32);
    let capped_delay = base_delay.min(max_delay.as_millis() as f64);

    let jitter = (rand_simple() * 0.5 - 0.25) * capped_delay;
    let final_delay = (capped_delay + jitter).max(0.0);

    Duration::from_millis(final_delay as u64)
}

/// Cheap pseudo-random number in `[0, 1)`
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use crate::source::Schema;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        permanent: bool,
    }

    #[async_trait]
    impl RowSource for Flaky {
        async fn count(&self, _query: &QuerySpec) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.permanent {
                    return Err(ExtractError::Query("Unrecognized name: cepp".into()));
                }
                return Err(ExtractError::SourceUnavailable("HTTP 503".into()));
            }
            Ok(7)
        }

        async fn fetch(&self, _query: &QuerySpec, _offset: u64, _limit: u64) -> Result<RowPage> {
            Ok(RowPage {
                schema: Schema::new(vec![]),
                rows: vec![],
                end_of_data: true,
            })
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn flaky(failures: u32, permanent: bool) -> Flaky {
        Flaky {
            failures,
            calls: AtomicU32::new(0),
            permanent,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = RetryingSource::new(flaky(2, false), policy(3));
        let spec = QuerySpec::new("SELECT 1", "t");
        assert_eq!(source.count(&spec).await.unwrap(), 7);
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let source = RetryingSource::new(flaky(5, false), policy(2));
        let spec = QuerySpec::new("SELECT 1", "t");
        assert!(matches!(
            source.count(&spec).await,
            Err(ExtractError::SourceUnavailable(_))
        ));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_query_errors_are_not_retried() {
        let source = RetryingSource::new(flaky(1, true), policy(5));
        let spec = QuerySpec::new("SELECT 1", "t");
        assert!(matches!(source.count(&spec).await, Err(ExtractError::Query(_))));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_is_pass_through() {
        let source = RetryingSource::new(flaky(1, false), RetryPolicy::default());
        let spec = QuerySpec::new("SELECT 1", "t");
        assert!(source.count(&spec).await.is_err());
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 0..10 {
            let delay = calculate_backoff(
                attempt,
                Duration::from_millis(100),
                Duration::from_millis(1000),
                2.0,
            );
            assert!(delay <= Duration::from_millis(1250));
        }
        let first = calculate_backoff(0, Duration::from_millis(100), Duration::from_secs(1), 2.0);
        assert!(first >= Duration::from_millis(75));
    }
}
