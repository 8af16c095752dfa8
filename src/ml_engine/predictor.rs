//! Poisson predictor - de estadísticas a probabilidades de mercado
//!
//! λ_home = base · s(att_home)^a · s(def_away)^d · home_advantage
//! λ_away = base · s(att_away)^a · s(def_home)^d
//!
//! where s() shrinks a relative strength toward 1.0 by
//! n / (n + confidence_weight). Pure: identical features and parameters
//! always give the identical prediction.

use serde::{Deserialize, Serialize};

use crate::betting::market::{settle, Settlement};
use crate::config::PredictionConfig;
use crate::features;
use crate::ml_engine::calibration::ModelParameters;
use crate::ml_engine::poisson::ScorelineMatrix;
use crate::types::{
    FinalScore, FixtureId, MarketKind, MatchupFeatures, Selection, TeamStatsSnapshot,
};

/// Bounds on any expected-goals rate
pub const MIN_LAMBDA: f64 = 0.05;
pub const MAX_LAMBDA: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedGoals {
    pub home: f64,
    pub away: f64,
}

/// Win / push / loss mass of one selection
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutcomeProbabilities {
    pub win: f64,
    pub push: f64,
    pub loss: f64,
}

/// Probabilities of a mutually-exclusive outcome set. `push` holds the
/// mass landing exactly on a whole-number line.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDistribution {
    pub market: MarketKind,
    pub outcomes: Vec<(Selection, f64)>,
    pub push: f64,
}

impl MarketDistribution {
    pub fn total(&self) -> f64 {
        self.outcomes.iter().map(|(_, p)| p).sum::<f64>() + self.push
    }

    pub fn probability(&self, selection: &Selection) -> Option<f64> {
        self.outcomes
            .iter()
            .find(|(s, _)| s == selection)
            .map(|(_, p)| *p)
    }
}

/// Prediction for one fixture under one parameter version
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPrediction {
    pub fixture_id: FixtureId,
    pub parameter_version: u64,
    pub expected_goals: ExpectedGoals,
    pub matchup: MatchupFeatures,
    pub matrix: ScorelineMatrix,
}

impl ModelPrediction {
    /// Win/push/loss mass for `selection`, through the settlement table
    pub fn outcome(&self, market: &MarketKind, selection: &Selection) -> OutcomeProbabilities {
        if let Selection::Score { home, away } = selection {
            let win = self.matrix.get(*home, *away);
            return OutcomeProbabilities {
                win,
                push: 0.0,
                loss: 1.0 - win,
            };
        }

        let mut out = OutcomeProbabilities::default();
        for (h, a, p) in self.matrix.iter() {
            match settle(market, selection, FinalScore::new(h, a)) {
                Settlement::Win => out.win += p,
                Settlement::Push => out.push += p,
                Settlement::Loss => out.loss += p,
            }
        }
        out
    }

    /// Probability that `selection` wins
    pub fn probability(&self, market: &MarketKind, selection: &Selection) -> f64 {
        if !market.accepts(selection) {
            return 0.0;
        }
        self.outcome(market, selection).win
    }

    /// Full outcome set of `market`
    pub fn distribution(&self, market: &MarketKind) -> MarketDistribution {
        let selections = market.selections(self.matrix.max_goals());
        let mut push = 0.0;
        let outcomes = selections
            .iter()
            .enumerate()
            .map(|(i, sel)| {
                let o = self.outcome(market, sel);
                if i == 0 {
                    push = o.push;
                }
                (*sel, o.win)
            })
            .collect();
        MarketDistribution {
            market: *market,
            outcomes,
            push,
        }
    }

    /// Smallest match sample behind either team
    pub fn sample_size(&self) -> usize {
        self.matchup.sample_size()
    }
}

#[derive(Debug, Clone)]
pub struct PoissonPredictor {
    config: PredictionConfig,
}

impl PoissonPredictor {
    pub fn new(config: PredictionConfig) -> Self {
        Self { config }
    }

    pub fn max_goals(&self) -> u8 {
        self.config.max_goals
    }

    /// Predict a fixture from both team snapshots
    pub fn predict(
        &self,
        fixture_id: &FixtureId,
        home: &TeamStatsSnapshot,
        away: &TeamStatsSnapshot,
        params: &ModelParameters,
    ) -> ModelPrediction {
        self.predict_matchup(fixture_id, features::matchup(home, away), params)
    }

    pub fn predict_matchup(
        &self,
        fixture_id: &FixtureId,
        matchup: MatchupFeatures,
        params: &ModelParameters,
    ) -> ModelPrediction {
        let expected_goals = self.expected_goals(&matchup, params);
        ModelPrediction {
            fixture_id: fixture_id.clone(),
            parameter_version: params.version,
            expected_goals,
            matchup,
            matrix: ScorelineMatrix::build(
                expected_goals.home,
                expected_goals.away,
                params.low_score_dependence,
                self.config.max_goals,
            ),
        }
    }

    /// Prediction straight from known rates
    pub fn predict_rates(
        &self,
        fixture_id: &FixtureId,
        expected_goals: ExpectedGoals,
        params: &ModelParameters,
    ) -> ModelPrediction {
        ModelPrediction {
            fixture_id: fixture_id.clone(),
            parameter_version: params.version,
            expected_goals,
            matchup: MatchupFeatures {
                base_goals: (expected_goals.home + expected_goals.away) / 2.0,
                home_attack: 1.0,
                home_defense: 1.0,
                away_attack: 1.0,
                away_defense: 1.0,
                home_samples: usize::MAX,
                away_samples: usize::MAX,
            },
            matrix: ScorelineMatrix::build(
                expected_goals.home,
                expected_goals.away,
                params.low_score_dependence,
                self.config.max_goals,
            ),
        }
    }

    pub fn expected_goals(&self, m: &MatchupFeatures, params: &ModelParameters) -> ExpectedGoals {
        let shrink = |strength: f64, samples: usize| {
            let n = samples as f64;
            let k = n / (n + params.confidence_weight.max(0.0));
            1.0 + (strength - 1.0) * k
        };
        let term = |strength: f64, samples: usize, weight: f64| {
            shrink(strength, samples).max(f64::EPSILON).powf(weight)
        };

        let home = m.base_goals
            * term(m.home_attack, m.home_samples, params.attack_weight)
            * term(m.away_defense, m.away_samples, params.defense_weight)
            * params.home_advantage;
        let away = m.base_goals
            * term(m.away_attack, m.away_samples, params.attack_weight)
            * term(m.home_defense, m.home_samples, params.defense_weight);

        ExpectedGoals {
            home: home.clamp(MIN_LAMBDA, MAX_LAMBDA),
            away: away.clamp(MIN_LAMBDA, MAX_LAMBDA),
        }
    }

    /// Win probability of a single selection, used to re-price settled bets
    pub fn probability(
        &self,
        matchup: &MatchupFeatures,
        params: &ModelParameters,
        market: &MarketKind,
        selection: &Selection,
    ) -> f64 {
        self.predict_matchup(&FixtureId::new(""), *matchup, params)
            .probability(market, selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearningConfig;
    use crate::types::Line;

    fn params() -> ModelParameters {
        ModelParameters::genesis(&LearningConfig::default())
    }

    fn scenario_a() -> ModelPrediction {
        PoissonPredictor::new(PredictionConfig { max_goals: 10 }).predict_rates(
            &FixtureId::new("a"),
            ExpectedGoals {
                home: 1.8,
                away: 1.1,
            },
            &params(),
        )
    }

    fn matchup(att_h: f64, def_a: f64, n: usize) -> MatchupFeatures {
        MatchupFeatures {
            base_goals: 1.3,
            home_attack: att_h,
            home_defense: 1.0,
            away_attack: 1.0,
            away_defense: def_a,
            home_samples: n,
            away_samples: n,
        }
    }

    #[test]
    fn match_result_probabilities() {
        let p = scenario_a();
        let d = p.distribution(&MarketKind::MatchResult);
        assert!((d.total() - 1.0).abs() < 1e-9);
        assert!((d.probability(&Selection::Home).unwrap() - 0.5376).abs() < 1e-3);
        assert!((d.probability(&Selection::Draw).unwrap() - 0.2314).abs() < 1e-3);
        assert!((d.probability(&Selection::Away).unwrap() - 0.2311).abs() < 1e-3);
    }

    #[test]
    fn every_market_sums_to_one() {
        let p = scenario_a();
        let markets = [
            MarketKind::MatchResult,
            MarketKind::BothTeamsToScore,
            MarketKind::TotalGoals {
                line: Line::new(2.5).unwrap(),
            },
            MarketKind::TotalGoals {
                line: Line::new(3.0).unwrap(),
            },
            MarketKind::Handicap {
                line: Line::new(-1.0).unwrap(),
            },
            MarketKind::Handicap {
                line: Line::new(0.5).unwrap(),
            },
            MarketKind::CorrectScore,
        ];
        for m in markets {
            let d = p.distribution(&m);
            assert!((d.total() - 1.0).abs() < 1e-6, "{m}: {}", d.total());
        }
    }

    #[test]
    fn whole_line_push_mass_is_exact_total() {
        let p = scenario_a();
        let d = p.distribution(&MarketKind::TotalGoals {
            line: Line::new(3.0).unwrap(),
        });
        assert!((d.push - 0.2237).abs() < 1e-3);
        let over_25 = p.probability(
            &MarketKind::TotalGoals {
                line: Line::new(2.5).unwrap(),
            },
            &Selection::Over,
        );
        assert!((over_25 - 0.5540).abs() < 1e-3);
    }

    #[test]
    fn stronger_attack_raises_home_rate() {
        let pr = PoissonPredictor::new(PredictionConfig::default());
        let weak = pr.expected_goals(&matchup(0.8, 1.0, 10), &params());
        let strong = pr.expected_goals(&matchup(1.4, 1.0, 10), &params());
        assert!(strong.home > weak.home);
        assert_eq!(strong.away, weak.away);
    }

    #[test]
    fn thin_samples_shrink_toward_average() {
        let pr = PoissonPredictor::new(PredictionConfig::default());
        let thin = pr.expected_goals(&matchup(2.0, 1.0, 1), &params());
        let deep = pr.expected_goals(&matchup(2.0, 1.0, 30), &params());
        assert!(thin.home < deep.home);
    }

    #[test]
    fn prediction_is_deterministic() {
        let pr = PoissonPredictor::new(PredictionConfig::default());
        let m = matchup(1.2, 0.9, 8);
        let p = params();
        let a = pr.predict_matchup(&FixtureId::new("x"), m, &p);
        let b = pr.predict_matchup(&FixtureId::new("x"), m, &p);
        assert_eq!(a, b);
    }

    #[test]
    fn rates_are_bounded() {
        let pr = PoissonPredictor::new(PredictionConfig::default());
        let eg = pr.expected_goals(&matchup(50.0, 50.0, 1000), &params());
        assert_eq!(eg.home, MAX_LAMBDA);
    }
}
