//! Monte Carlo bankroll simulation
//!
//! Repeats a fixed-edge bet (win probability, decimal odds, stake as a
//! fraction of the current bankroll) over many independent paths.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::sharpe;

/// Bankroll below this counts as ruined
pub const RUIN_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Independent paths
    pub paths: usize,
    /// Bets per path
    pub bets_per_path: usize,
    pub initial_bankroll: f64,
    pub win_probability: f64,
    /// Decimal odds of every bet
    pub odds: f64,
    /// Stake as a fraction of the current bankroll
    pub stake_fraction: f64,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            paths: 10_000,
            bets_per_path: 500,
            initial_bankroll: 1000.0,
            win_probability: 0.55,
            odds: 2.0,
            stake_fraction: 0.02,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub paths: usize,
    pub probability_of_ruin: f64,
    pub probability_of_profit: f64,
    pub final_bankroll_mean: f64,
    pub final_bankroll_median: f64,
    pub percentile_5: f64,
    pub percentile_25: f64,
    pub percentile_75: f64,
    pub percentile_95: f64,
    pub max_drawdown_mean: f64,
    /// Sharpe of per-bet bankroll returns over all paths
    pub sharpe_ratio: f64,
}

pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
}

impl MonteCarloSimulator {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self { config }
    }

    pub fn run(&self) -> MonteCarloResult {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.run_with(&mut rng)
    }

    pub fn run_with<R: Rng>(&self, rng: &mut R) -> MonteCarloResult {
        let cfg = &self.config;
        if cfg.paths == 0 {
            return MonteCarloResult::default();
        }
        let p = cfg.win_probability.clamp(0.0, 1.0);
        let fraction = cfg.stake_fraction.clamp(0.0, 1.0);

        let mut finals = Vec::with_capacity(cfg.paths);
        let mut drawdowns = Vec::with_capacity(cfg.paths);
        let mut returns = Vec::with_capacity(cfg.paths * cfg.bets_per_path);
        let mut ruined = 0usize;

        for _ in 0..cfg.paths {
            let mut bankroll = cfg.initial_bankroll;
            let mut peak = bankroll;
            let mut max_dd: f64 = 0.0;

            for _ in 0..cfg.bets_per_path {
                if bankroll < RUIN_THRESHOLD {
                    break;
                }
                let stake = bankroll * fraction;
                let pnl = if rng.gen_bool(p) {
                    stake * (cfg.odds - 1.0)
                } else {
                    -stake
                };
                returns.push(pnl / bankroll);
                bankroll += pnl;

                if bankroll > peak {
                    peak = bankroll;
                } else if peak > 0.0 {
                    max_dd = max_dd.max((peak - bankroll) / peak);
                }
            }

            if bankroll < RUIN_THRESHOLD {
                ruined += 1;
            }
            finals.push(bankroll);
            drawdowns.push(max_dd);
        }

        finals.sort_by(|a, b| a.total_cmp(b));
        let n = cfg.paths as f64;
        let pct = |q: usize| finals[(cfg.paths * q / 100).min(cfg.paths - 1)];

        MonteCarloResult {
            paths: cfg.paths,
            probability_of_ruin: ruined as f64 / n,
            probability_of_profit: finals.iter().filter(|&&b| b > cfg.initial_bankroll).count()
                as f64
                / n,
            final_bankroll_mean: finals.iter().sum::<f64>() / n,
            final_bankroll_median: pct(50),
            percentile_5: pct(5),
            percentile_25: pct(25),
            percentile_75: pct(75),
            percentile_95: pct(95),
            max_drawdown_mean: drawdowns.iter().sum::<f64>() / n,
            sharpe_ratio: sharpe(&returns),
        }
    }
}
