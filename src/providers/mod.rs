//! External data providers (odds, community votes, results, history)
//!
//! The core only ever receives data or `ProviderError::Unavailable`.
//! Transient failures are retried with backoff by [`Retrying`].

mod local;
mod retry;

pub use local::LocalProvider;
pub use retry::{RetryPolicy, Retrying};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::{CommunityVotes, HistoricalMatch, MarketQuote, MatchFixture, MatchOutcome};

/// Current offers for one fixture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    #[serde(default)]
    pub quotes: Vec<MarketQuote>,
    #[serde(default)]
    pub community: Option<CommunityVotes>,
}

/// Odds and community-prediction source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn snapshot(&self, fixture: &MatchFixture) -> Result<OddsSnapshot, ProviderError>;
}

/// Final results source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Final score, or `NotFinished`
    async fn final_result(&self, fixture: &MatchFixture) -> Result<MatchOutcome, ProviderError>;
}

/// Raw match history and the fixture calendar
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every match of `league` played before `before`
    async fn league_history(
        &self,
        league: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<HistoricalMatch>, ProviderError>;

    /// Fixtures kicking off within [from, until)
    async fn upcoming_fixtures(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MatchFixture>, ProviderError>;
}
