//! Calibration - estado de calibración versionado
//!
//! `ModelParameters` is one immutable link of an append-only chain. Each
//! version is derived from exactly one parent plus one learning batch.
//! Also holds the proper scoring rules used to grade predictions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::LearningConfig;

/// Lower bound for probabilities fed to log-loss
const LOG_LOSS_EPS: f64 = 1e-6;

/// Proper scoring rule for a Bernoulli outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringRule {
    LogLoss,
    Brier,
}

impl ScoringRule {
    /// Loss of predicting `p` for an event that did (`true`) or did not happen
    pub fn score(&self, p: f64, happened: bool) -> f64 {
        match self {
            ScoringRule::LogLoss => log_loss(p, happened),
            ScoringRule::Brier => brier(p, happened),
        }
    }
}

impl fmt::Display for ScoringRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringRule::LogLoss => write!(f, "log_loss"),
            ScoringRule::Brier => write!(f, "brier"),
        }
    }
}

pub fn log_loss(p: f64, happened: bool) -> f64 {
    let p = p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
    if happened {
        -p.ln()
    } else {
        -(1.0 - p).ln()
    }
}

pub fn brier(p: f64, happened: bool) -> f64 {
    let y = if happened { 1.0 } else { 0.0 };
    (p - y).powi(2)
}

/// Expected calibration error over equal-width probability bins
pub fn expected_calibration_error(predictions: &[f64], outcomes: &[bool], n_bins: usize) -> f64 {
    if predictions.is_empty() || predictions.len() != outcomes.len() || n_bins == 0 {
        return 0.0;
    }

    let mut bins = vec![(0usize, 0.0f64, 0usize); n_bins];
    for (p, won) in predictions.iter().zip(outcomes) {
        let idx = ((p.clamp(0.0, 1.0) * n_bins as f64) as usize).min(n_bins - 1);
        bins[idx].0 += 1;
        bins[idx].1 += p;
        if *won {
            bins[idx].2 += 1;
        }
    }

    let n = predictions.len() as f64;
    bins.iter()
        .filter(|(count, _, _)| *count > 0)
        .map(|(count, sum_p, wins)| {
            let c = *count as f64;
            (c / n) * ((sum_p / c) - (*wins as f64 / c)).abs()
        })
        .sum()
}

/// Hard limits on each calibration factor
#[derive(Debug, Clone, Copy)]
pub struct ParameterBounds {
    pub home_advantage: (f64, f64),
    pub attack_weight: (f64, f64),
    pub defense_weight: (f64, f64),
    pub confidence_weight: (f64, f64),
    pub low_score_dependence: (f64, f64),
}

pub const PARAMETER_BOUNDS: ParameterBounds = ParameterBounds {
    home_advantage: (0.8, 1.8),
    attack_weight: (0.3, 1.7),
    defense_weight: (0.3, 1.7),
    confidence_weight: (0.5, 20.0),
    low_score_dependence: (-0.2, 0.2),
};

/// One version of the calibration state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Strictly increasing; genesis is 1
    pub version: u64,
    /// Version this one was derived from (None for genesis)
    pub parent_version: Option<u64>,
    pub updated_at: DateTime<Utc>,
    /// Multiplier on the home side's expected goals
    pub home_advantage: f64,
    /// Exponent on attack strength (1.0 = raw strength)
    pub attack_weight: f64,
    /// Exponent on opponent defensive weakness
    pub defense_weight: f64,
    /// Pseudo-matches of league-average prior shrinking thin samples
    pub confidence_weight: f64,
    /// Dixon-Coles rho (0.0 = independent Poisson)
    pub low_score_dependence: f64,
    /// Settled bets consumed by all learning batches so far
    pub observed_bets: u64,
    /// Mean batch loss that produced this version
    #[serde(default)]
    pub batch_loss: Option<f64>,
}

impl ModelParameters {
    pub fn genesis(config: &LearningConfig) -> Self {
        Self {
            version: 1,
            parent_version: None,
            updated_at: Utc::now(),
            home_advantage: config.genesis_home_advantage,
            attack_weight: config.genesis_attack_weight,
            defense_weight: config.genesis_defense_weight,
            confidence_weight: config.genesis_confidence_weight,
            low_score_dependence: config.genesis_low_score_dependence,
            observed_bets: 0,
            batch_loss: None,
        }
        .clamped()
    }

    /// Calibration factors the learner adjusts, in a fixed order
    pub fn factors(&self) -> [f64; 4] {
        [
            self.home_advantage,
            self.attack_weight,
            self.defense_weight,
            self.confidence_weight,
        ]
    }

    /// Copy with the learned factors replaced (version untouched)
    pub fn with_factors(&self, factors: [f64; 4]) -> Self {
        Self {
            home_advantage: factors[0],
            attack_weight: factors[1],
            defense_weight: factors[2],
            confidence_weight: factors[3],
            ..self.clone()
        }
        .clamped()
    }

    /// Next link of the chain: version + 1, parent = this version
    pub fn successor(
        &self,
        factors: [f64; 4],
        consumed_bets: u64,
        batch_loss: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: self.version + 1,
            parent_version: Some(self.version),
            updated_at: at,
            observed_bets: self.observed_bets + consumed_bets,
            batch_loss: Some(batch_loss),
            ..self.with_factors(factors)
        }
    }

    pub fn clamped(mut self) -> Self {
        let b = PARAMETER_BOUNDS;
        self.home_advantage = self.home_advantage.clamp(b.home_advantage.0, b.home_advantage.1);
        self.attack_weight = self.attack_weight.clamp(b.attack_weight.0, b.attack_weight.1);
        self.defense_weight = self.defense_weight.clamp(b.defense_weight.0, b.defense_weight.1);
        self.confidence_weight = self
            .confidence_weight
            .clamp(b.confidence_weight.0, b.confidence_weight.1);
        self.low_score_dependence = self
            .low_score_dependence
            .clamp(b.low_score_dependence.0, b.low_score_dependence.1);
        self
    }
}

impl fmt::Display for ModelParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} home_adv={:.4} att={:.4} def={:.4} conf={:.3} rho={:.3} observed={}",
            self.version,
            self.home_advantage,
            self.attack_weight,
            self.defense_weight,
            self.confidence_weight,
            self.low_score_dependence,
            self.observed_bets
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_rules_reward_confident_correct_predictions() {
        assert!(log_loss(0.9, true) < log_loss(0.6, true));
        assert!(log_loss(0.9, false) > log_loss(0.6, false));
        assert!((brier(0.7, true) - 0.09).abs() < 1e-12);
        assert!(log_loss(0.0, true).is_finite());
    }

    #[test]
    fn successor_links_to_parent() {
        let genesis = ModelParameters::genesis(&LearningConfig::default());
        let next = genesis.successor(genesis.factors(), 12, 0.6, Utc::now());
        assert_eq!(next.version, 2);
        assert_eq!(next.parent_version, Some(1));
        assert_eq!(next.observed_bets, 12);
        assert_eq!(genesis.version, 1);
    }

    #[test]
    fn factors_are_clamped() {
        let genesis = ModelParameters::genesis(&LearningConfig::default());
        let wild = genesis.with_factors([5.0, 0.0, 1.0, 100.0]);
        assert_eq!(wild.home_advantage, 1.8);
        assert_eq!(wild.attack_weight, 0.3);
        assert_eq!(wild.confidence_weight, 20.0);
    }

    #[test]
    fn ece_of_perfect_calibration_is_zero() {
        let preds = vec![0.25, 0.25, 0.25, 0.25];
        let outcomes = vec![true, false, false, false];
        assert!(expected_calibration_error(&preds, &outcomes, 10).abs() < 1e-12);
    }
}
