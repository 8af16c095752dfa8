//! Retry with exponential backoff around any provider

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::{HistoryProvider, OddsProvider, OddsSnapshot, ResultsProvider};
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::types::{HistoricalMatch, MatchFixture, MatchOutcome};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Delay before the second attempt; doubles afterwards
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Exhausted transient failures come back as `Unavailable`.
    pub async fn run<T, F, Fut>(&self, provider: &str, op_name: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.backoff;
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ProviderError::Transient { reason, .. }) => {
                    debug!(provider, op = op_name, attempt, reason = %reason, "transient provider failure");
                    last_reason = reason;
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(provider, op = op_name, attempts, "provider retries exhausted");
        Err(ProviderError::unavailable(
            provider,
            format!("{} failed after {} attempt(s): {}", op_name, attempts, last_reason),
        ))
    }
}

/// Provider wrapper adding retries to every call
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: OddsProvider> OddsProvider for Retrying<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn snapshot(&self, fixture: &MatchFixture) -> Result<OddsSnapshot, ProviderError> {
        self.policy
            .run(self.inner.name(), "odds", || self.inner.snapshot(fixture))
            .await
    }
}

#[async_trait]
impl<P: ResultsProvider> ResultsProvider for Retrying<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn final_result(&self, fixture: &MatchFixture) -> Result<MatchOutcome, ProviderError> {
        self.policy
            .run(self.inner.name(), "results", || self.inner.final_result(fixture))
            .await
    }
}

#[async_trait]
impl<P: HistoryProvider> HistoryProvider for Retrying<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn league_history(
        &self,
        league: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<HistoricalMatch>, ProviderError> {
        self.policy
            .run(self.inner.name(), "history", || {
                self.inner.league_history(league, before)
            })
            .await
    }

    async fn upcoming_fixtures(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MatchFixture>, ProviderError> {
        self.policy
            .run(self.inner.name(), "fixtures", || {
                self.inner.upcoming_fixtures(from, until)
            })
            .await
    }
}
