//! Feature Extractor - per-team statistical snapshots
//!
//! Aggregates a bounded window of each team's most recent matches with
//! exponential recency weighting (weight = exp(-xi * days_ago)):
//! - Scoring / conceding rates, overall and split by venue
//! - Head-to-head summary against the upcoming opponent
//! - League home/away goal averages used as the normalizing base
//!
//! Teams with fewer than `min_matches` matches fall back to league-average
//! rates. A team with no history at all is `DataUnavailable`.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::FeaturesConfig;
use crate::error::{EngineError, Result};
use crate::types::{
    HeadToHead, HistoricalMatch, MatchFixture, MatchupFeatures, TeamId, TeamStatsSnapshot,
    VenueSplit,
};

/// Floor on rates relative to the league so a clean-sheet streak never
/// produces a zero strength
const MIN_RELATIVE_RATE: f64 = 0.05;

/// Stateless snapshot builder
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeaturesConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeaturesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeaturesConfig {
        &self.config
    }

    /// Build the snapshot for `team` from matches played strictly before
    /// `as_of`. `opponent` adds a head-to-head summary.
    pub fn snapshot(
        &self,
        team: &TeamId,
        league: &str,
        as_of: DateTime<Utc>,
        history: &[HistoricalMatch],
        opponent: Option<&TeamId>,
    ) -> Result<TeamStatsSnapshot> {
        let mut played: Vec<&HistoricalMatch> = history
            .iter()
            .filter(|m| m.played_at < as_of && m.involves(team))
            .collect();

        if played.is_empty() {
            return Err(EngineError::data_unavailable(
                team,
                format!("no matches before {}", as_of.format("%Y-%m-%d")),
            ));
        }

        // Most recent first
        played.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        played.truncate(self.config.window_matches);

        let (league_home_goals, league_away_goals) = self.league_averages(league, as_of, history);
        let league_per_team = (league_home_goals + league_away_goals) / 2.0;

        let mut overall = WeightedRates::default();
        let mut home = WeightedRates::default();
        let mut away = WeightedRates::default();

        for m in &played {
            let Some((scored, conceded, at_home)) = m.perspective(team) else {
                continue;
            };
            let weight = self.recency_weight(as_of, m.played_at);
            overall.add(weight, scored, conceded);
            if at_home {
                home.add(weight, scored, conceded);
            } else {
                away.add(weight, scored, conceded);
            }
        }

        let league_fallback = played.len() < self.config.min_matches;
        let (scored_rate, conceded_rate) = if league_fallback {
            debug!(
                team = %team,
                matches = played.len(),
                min = self.config.min_matches,
                "thin history, using league averages"
            );
            (league_per_team, league_per_team)
        } else {
            (overall.scored_rate(), overall.conceded_rate())
        };

        let head_to_head = opponent.and_then(|opp| head_to_head(team, opp, as_of, history));

        Ok(TeamStatsSnapshot {
            team: team.clone(),
            league: league.to_string(),
            as_of,
            matches_used: played.len(),
            effective_weight: overall.weight,
            scored_rate,
            conceded_rate,
            home: home.split(),
            away: away.split(),
            league_home_goals,
            league_away_goals,
            head_to_head,
            league_fallback,
        })
    }

    /// Snapshots for both sides of a fixture, as of kickoff
    pub fn fixture_snapshots(
        &self,
        fixture: &MatchFixture,
        history: &[HistoricalMatch],
    ) -> Result<(TeamStatsSnapshot, TeamStatsSnapshot)> {
        let home = self.snapshot(
            &fixture.home,
            &fixture.league,
            fixture.kickoff,
            history,
            Some(&fixture.away),
        )?;
        let away = self.snapshot(
            &fixture.away,
            &fixture.league,
            fixture.kickoff,
            history,
            Some(&fixture.home),
        )?;
        Ok((home, away))
    }

    /// League home/away goals per match before `as_of`, or the configured
    /// defaults when the league has no history
    pub fn league_averages(
        &self,
        league: &str,
        as_of: DateTime<Utc>,
        history: &[HistoricalMatch],
    ) -> (f64, f64) {
        let (mut n, mut home_goals, mut away_goals) = (0usize, 0u64, 0u64);
        for m in history
            .iter()
            .filter(|m| m.league == league && m.played_at < as_of)
        {
            n += 1;
            home_goals += m.home_goals as u64;
            away_goals += m.away_goals as u64;
        }

        if n == 0 || home_goals + away_goals == 0 {
            return (self.config.default_home_goals, self.config.default_away_goals);
        }
        (home_goals as f64 / n as f64, away_goals as f64 / n as f64)
    }

    fn recency_weight(&self, as_of: DateTime<Utc>, played_at: DateTime<Utc>) -> f64 {
        let days = (as_of - played_at).num_seconds().max(0) as f64 / 86_400.0;
        (-self.config.recency_decay_per_day * days).exp()
    }
}

/// Relative strengths of a pairing, the numeric input of the predictor
pub fn matchup(home: &TeamStatsSnapshot, away: &TeamStatsSnapshot) -> MatchupFeatures {
    let base = home.league_goals_per_team().max(f64::EPSILON);
    let rel = |rate: f64| (rate / base).max(MIN_RELATIVE_RATE);
    MatchupFeatures {
        base_goals: base,
        home_attack: rel(home.scored_rate),
        home_defense: rel(home.conceded_rate),
        away_attack: rel(away.scored_rate),
        away_defense: rel(away.conceded_rate),
        home_samples: home.matches_used,
        away_samples: away.matches_used,
    }
}

fn head_to_head(
    team: &TeamId,
    opponent: &TeamId,
    as_of: DateTime<Utc>,
    history: &[HistoricalMatch],
) -> Option<HeadToHead> {
    let mut h2h = HeadToHead {
        opponent: opponent.clone(),
        meetings: 0,
        wins: 0,
        draws: 0,
        losses: 0,
        goals_for: 0,
        goals_against: 0,
    };

    for m in history
        .iter()
        .filter(|m| m.played_at < as_of && m.involves(opponent))
    {
        let Some((gf, ga, _)) = m.perspective(team) else {
            continue;
        };
        h2h.meetings += 1;
        h2h.goals_for += gf as u32;
        h2h.goals_against += ga as u32;
        match gf.cmp(&ga) {
            std::cmp::Ordering::Greater => h2h.wins += 1,
            std::cmp::Ordering::Equal => h2h.draws += 1,
            std::cmp::Ordering::Less => h2h.losses += 1,
        }
    }

    (h2h.meetings > 0).then_some(h2h)
}

#[derive(Debug, Default)]
struct WeightedRates {
    matches: usize,
    weight: f64,
    scored: f64,
    conceded: f64,
}

impl WeightedRates {
    fn add(&mut self, weight: f64, scored: u8, conceded: u8) {
        self.matches += 1;
        self.weight += weight;
        self.scored += weight * scored as f64;
        self.conceded += weight * conceded as f64;
    }

    fn scored_rate(&self) -> f64 {
        if self.weight > 0.0 {
            self.scored / self.weight
        } else {
            0.0
        }
    }

    fn conceded_rate(&self) -> f64 {
        if self.weight > 0.0 {
            self.conceded / self.weight
        } else {
            0.0
        }
    }

    fn split(&self) -> VenueSplit {
        VenueSplit {
            matches: self.matches,
            scored_rate: self.scored_rate(),
            conceded_rate: self.conceded_rate(),
        }
    }
}
