//! Value detection: predicted probability against offered odds
//!
//! edge = p × odds − 1. A quote is a value bet when the edge clears the
//! threshold and both teams have enough matches behind the prediction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

use crate::config::ValueConfig;
use crate::ml_engine::predictor::ModelPrediction;
use crate::types::{
    BetKey, CommunityVotes, FixtureId, MarketKind, MarketQuote, MatchupFeatures, Selection,
};

pub const COMMUNITY_PROVIDER: &str = "community";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueGrade {
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl ValueGrade {
    /// None for non-positive edges
    pub fn from_edge(edge: f64) -> Option<Self> {
        if edge > 0.20 {
            Some(ValueGrade::Diamond)
        } else if edge > 0.10 {
            Some(ValueGrade::Gold)
        } else if edge > 0.05 {
            Some(ValueGrade::Silver)
        } else if edge > 0.0 {
            Some(ValueGrade::Bronze)
        } else {
            None
        }
    }
}

impl fmt::Display for ValueGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueGrade::Diamond => write!(f, "DIAMOND"),
            ValueGrade::Gold => write!(f, "GOLD"),
            ValueGrade::Silver => write!(f, "SILVER"),
            ValueGrade::Bronze => write!(f, "BRONZE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeQuote {
    pub p_model: f64,
    pub odds: f64,
    pub implied: f64,
    pub edge: f64,
}

pub fn compute_edge(p_model: f64, odds: f64) -> EdgeQuote {
    EdgeQuote {
        p_model,
        odds,
        implied: if odds > 0.0 { 1.0 / odds } else { 0.0 },
        edge: p_model * odds - 1.0,
    }
}

/// A flagged candidate, ready for the executor
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBet {
    pub quote: MarketQuote,
    pub probability: f64,
    pub edge: f64,
    pub grade: ValueGrade,
    /// p(1 - p) of the selected outcome
    pub variance: f64,
    /// Bookmaker margin on the quote's market, when the provider quoted
    /// the complete outcome set
    pub margin: Option<f64>,
    /// Margin-free implied probability
    pub fair_probability: Option<f64>,
    pub parameter_version: u64,
    pub matchup: MatchupFeatures,
    pub sample_size: usize,
}

impl ValueBet {
    pub fn key(&self) -> BetKey {
        self.quote.key()
    }
}

/// Executor order: higher edge, then earlier quote, then lower variance
pub fn compare_candidates(a: &ValueBet, b: &ValueBet) -> Ordering {
    b.edge
        .partial_cmp(&a.edge)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.quote.quoted_at.cmp(&b.quote.quoted_at))
        .then_with(|| a.variance.partial_cmp(&b.variance).unwrap_or(Ordering::Equal))
}

/// Overround of a complete quote set: Σ 1/odds − 1
pub fn bookmaker_margin(odds: &[f64]) -> Option<f64> {
    if odds.is_empty() || odds.iter().any(|o| !o.is_finite() || *o <= 1.0) {
        return None;
    }
    Some(odds.iter().map(|o| 1.0 / o).sum::<f64>() - 1.0)
}

/// Implied probability with the margin removed
pub fn fair_probability(odds: f64, margin: f64) -> f64 {
    (1.0 / odds) / (1.0 + margin)
}

/// Synthetic 1X2 quotes from community vote shares: odds = 1 / (share + margin)
pub fn community_quotes(
    fixture_id: &FixtureId,
    votes: &CommunityVotes,
    config: &ValueConfig,
    at: DateTime<Utc>,
) -> Vec<MarketQuote> {
    if votes.total() < config.community_min_votes {
        return Vec::new();
    }
    let Some((home, draw, away)) = votes.shares() else {
        return Vec::new();
    };

    [
        (Selection::Home, home),
        (Selection::Draw, draw),
        (Selection::Away, away),
    ]
    .into_iter()
    .filter_map(|(selection, share)| {
        let odds = 1.0 / (share + config.community_margin);
        (odds.is_finite() && odds > 1.0).then(|| MarketQuote {
            fixture_id: fixture_id.clone(),
            provider: COMMUNITY_PROVIDER.to_string(),
            market: MarketKind::MatchResult,
            selection,
            odds,
            quoted_at: at,
        })
    })
    .collect()
}

#[derive(Debug, Clone)]
pub struct ValueDetector {
    config: ValueConfig,
}

impl ValueDetector {
    pub fn new(config: ValueConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValueConfig {
        &self.config
    }

    /// Value bets for one fixture, in executor order, at most one per
    /// (fixture, market) and at most `max_bets_per_fixture`
    pub fn detect(&self, prediction: &ModelPrediction, quotes: &[MarketQuote]) -> Vec<ValueBet> {
        let sample_size = prediction.sample_size();
        if sample_size < self.config.min_sample_size {
            debug!(
                fixture = %prediction.fixture_id,
                sample_size,
                min = self.config.min_sample_size,
                "prediction below confidence bar, no value bets"
            );
            return Vec::new();
        }

        let valid: Vec<&MarketQuote> = quotes
            .iter()
            .filter(|q| {
                if q.fixture_id != prediction.fixture_id {
                    warn!(
                        fixture = %prediction.fixture_id,
                        quote_fixture = %q.fixture_id,
                        "discarding quote for another fixture"
                    );
                    return false;
                }
                match q.validate() {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(provider = %q.provider, error = %e, "discarding quote");
                        false
                    }
                }
            })
            .collect();

        let margins = margins_by_book(&valid, prediction.matrix.max_goals());

        let mut candidates: Vec<ValueBet> = valid
            .iter()
            .filter_map(|q| {
                let margin = margins.get(&(q.provider.as_str(), q.market)).copied();
                self.evaluate(prediction, q, margin)
            })
            .collect();
        candidates.sort_by(compare_candidates);

        // Only one bet can be open per (fixture, market)
        let mut seen = HashMap::new();
        candidates.retain(|c| seen.insert(c.key(), ()).is_none());
        candidates.truncate(self.config.max_bets_per_fixture);

        for c in &candidates {
            debug!(
                fixture = %prediction.fixture_id,
                market = %c.quote.market,
                selection = %c.quote.selection,
                odds = c.quote.odds,
                p = c.probability,
                edge = c.edge,
                grade = %c.grade,
                "value bet"
            );
        }
        candidates
    }

    /// Score one already-validated quote
    pub fn evaluate(
        &self,
        prediction: &ModelPrediction,
        quote: &MarketQuote,
        margin: Option<f64>,
    ) -> Option<ValueBet> {
        let p = prediction.probability(&quote.market, &quote.selection);
        let edge = compute_edge(p, quote.odds);
        if edge.edge <= self.config.edge_threshold {
            return None;
        }
        let grade = ValueGrade::from_edge(edge.edge)?;

        Some(ValueBet {
            quote: quote.clone(),
            probability: p,
            edge: edge.edge,
            grade,
            variance: p * (1.0 - p),
            margin,
            fair_probability: margin.map(|m| fair_probability(quote.odds, m)),
            parameter_version: prediction.parameter_version,
            matchup: prediction.matchup,
            sample_size: prediction.sample_size(),
        })
    }
}

/// Margin per (provider, market) where the provider quoted every outcome.
/// Correct score is never complete enough to price a margin.
fn margins_by_book<'a>(
    quotes: &[&'a MarketQuote],
    max_goals: u8,
) -> HashMap<(&'a str, MarketKind), f64> {
    let mut books: BTreeMap<(&'a str, MarketKind), BTreeMap<Selection, f64>> = BTreeMap::new();
    for q in quotes.iter().copied() {
        books
            .entry((q.provider.as_str(), q.market))
            .or_default()
            .entry(q.selection)
            .and_modify(|o| *o = o.max(q.odds))
            .or_insert(q.odds);
    }

    books
        .into_iter()
        .filter(|((_, market), _)| *market != MarketKind::CorrectScore)
        .filter_map(|(key, prices)| {
            let complete = key
                .1
                .selections(max_goals)
                .iter()
                .all(|s| prices.contains_key(s));
            if !complete {
                return None;
            }
            let odds: Vec<f64> = prices.values().copied().collect();
            bookmaker_margin(&odds).map(|m| (key, m))
        })
        .collect()
}
