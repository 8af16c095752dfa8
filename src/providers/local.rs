//! File-backed provider reading a data directory:
//!
//! - `history.csv`  played matches (optional closing 1X2 odds)
//! - `fixtures.json` upcoming fixtures
//! - `odds.json`     fixture id -> { quotes, community }
//! - `results.json`  fixture id -> final score
//!
//! Missing files are treated as empty.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

use super::{HistoryProvider, OddsProvider, OddsSnapshot, ResultsProvider};
use crate::error::{ProviderError, Result};
use crate::types::{
    ClosingOdds, FinalScore, FixtureId, HistoricalMatch, MatchFixture, MatchOutcome, TeamId,
};

const NAME: &str = "local";

/// Flat CSV row of `history.csv`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub fixture_id: String,
    pub league: String,
    pub played_at: DateTime<Utc>,
    pub home: String,
    pub away: String,
    pub home_goals: u8,
    pub away_goals: u8,
    #[serde(default)]
    pub odds_home: Option<f64>,
    #[serde(default)]
    pub odds_draw: Option<f64>,
    #[serde(default)]
    pub odds_away: Option<f64>,
}

impl From<HistoryRow> for HistoricalMatch {
    fn from(row: HistoryRow) -> Self {
        let closing_odds = match (row.odds_home, row.odds_draw, row.odds_away) {
            (Some(home), Some(draw), Some(away)) => Some(ClosingOdds { home, draw, away }),
            _ => None,
        };
        HistoricalMatch {
            fixture_id: FixtureId::new(row.fixture_id),
            league: row.league,
            played_at: row.played_at,
            home: TeamId::new(row.home),
            away: TeamId::new(row.away),
            home_goals: row.home_goals,
            away_goals: row.away_goals,
            closing_odds,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalProvider {
    history: Vec<HistoricalMatch>,
    fixtures: Vec<MatchFixture>,
    odds: HashMap<FixtureId, OddsSnapshot>,
    results: HashMap<FixtureId, FinalScore>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut provider = Self::new();

        let history_path = dir.join("history.csv");
        if history_path.exists() {
            let mut reader = csv::Reader::from_path(&history_path)?;
            for row in reader.deserialize::<HistoryRow>() {
                provider.history.push(row?.into());
            }
        }
        provider.fixtures = read_json(&dir.join("fixtures.json"))?.unwrap_or_default();
        provider.odds = read_json(&dir.join("odds.json"))?.unwrap_or_default();
        provider.results = read_json(&dir.join("results.json"))?.unwrap_or_default();

        info!(
            dir = %dir.display(),
            history = provider.history.len(),
            fixtures = provider.fixtures.len(),
            odds = provider.odds.len(),
            results = provider.results.len(),
            "local provider loaded"
        );
        Ok(provider)
    }

    pub fn with_history(mut self, history: Vec<HistoricalMatch>) -> Self {
        self.history = history;
        self
    }

    pub fn with_fixture(mut self, fixture: MatchFixture) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn with_odds(mut self, fixture_id: FixtureId, snapshot: OddsSnapshot) -> Self {
        self.odds.insert(fixture_id, snapshot);
        self
    }

    pub fn with_result(mut self, fixture_id: FixtureId, score: FinalScore) -> Self {
        self.results.insert(fixture_id, score);
        self
    }

    pub fn history(&self) -> &[HistoricalMatch] {
        &self.history
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

#[async_trait]
impl OddsProvider for LocalProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn snapshot(&self, fixture: &MatchFixture) -> std::result::Result<OddsSnapshot, ProviderError> {
        self.odds
            .get(&fixture.id)
            .cloned()
            .ok_or_else(|| ProviderError::unavailable(NAME, format!("no odds for {}", fixture.id)))
    }
}

#[async_trait]
impl ResultsProvider for LocalProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn final_result(
        &self,
        fixture: &MatchFixture,
    ) -> std::result::Result<MatchOutcome, ProviderError> {
        if let Some(score) = self.results.get(&fixture.id) {
            return Ok(MatchOutcome::Final(*score));
        }
        Ok(self
            .history
            .iter()
            .find(|m| m.fixture_id == fixture.id)
            .map(|m| MatchOutcome::Final(m.score()))
            .unwrap_or(MatchOutcome::NotFinished))
    }
}

#[async_trait]
impl HistoryProvider for LocalProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn league_history(
        &self,
        league: &str,
        before: DateTime<Utc>,
    ) -> std::result::Result<Vec<HistoricalMatch>, ProviderError> {
        Ok(self
            .history
            .iter()
            .filter(|m| m.league == league && m.played_at < before)
            .cloned()
            .collect())
    }

    async fn upcoming_fixtures(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> std::result::Result<Vec<MatchFixture>, ProviderError> {
        let mut fixtures: Vec<MatchFixture> = self
            .fixtures
            .iter()
            .filter(|f| f.kickoff >= from && f.kickoff < until)
            .cloned()
            .collect();
        fixtures.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.id.cmp(&b.id)));
        Ok(fixtures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("oddsbreaker_local_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn loads_history_csv_and_json_files() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("history.csv"),
            "fixture_id,league,played_at,home,away,home_goals,away_goals,odds_home,odds_draw,odds_away\n\
             m1,EPL,2024-01-06T15:00:00Z,ARS,CHE,2,1,1.9,3.5,4.2\n\
             m2,EPL,2024-01-13T15:00:00Z,CHE,LIV,0,0,,,\n",
        )
        .unwrap();
        let kickoff = Utc.with_ymd_and_hms(2024, 2, 1, 20, 0, 0).unwrap();
        let fixture = MatchFixture {
            id: FixtureId::new("f1"),
            home: TeamId::new("ARS"),
            away: TeamId::new("LIV"),
            kickoff,
            league: "EPL".into(),
        };
        fs::write(
            dir.join("fixtures.json"),
            serde_json::to_string(&vec![fixture.clone()]).unwrap(),
        )
        .unwrap();

        let provider = LocalProvider::load(&dir).unwrap();
        assert_eq!(provider.history().len(), 2);
        assert!(provider.history()[0].closing_odds.is_some());
        assert!(provider.history()[1].closing_odds.is_none());

        let upcoming = provider
            .upcoming_fixtures(kickoff - Duration::days(1), kickoff + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(upcoming, vec![fixture.clone()]);

        // No odds file: typed unavailability, not a panic
        assert!(provider.snapshot(&fixture).await.is_err());
        assert_eq!(
            provider.final_result(&fixture).await.unwrap(),
            MatchOutcome::NotFinished
        );
        let _ = fs::remove_dir_all(&dir);
    }
}
