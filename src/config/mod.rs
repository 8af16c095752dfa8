//! Configuration management for OddsBreaker
//!
//! Loads from optional config files + environment variables via .env.
//! Every section is handed to the core as an explicit struct; the core
//! never reads globals.

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::ml_engine::calibration::ScoringRule;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub prediction: PredictionConfig,
    pub features: FeaturesConfig,
    pub value: ValueConfig,
    pub staking: StakingConfig,
    pub learning: LearningConfig,
    pub providers: ProvidersConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    /// Maximum goals per side in the scoreline matrix
    pub max_goals: u8,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self { max_goals: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    /// Most recent matches considered per team
    pub window_matches: usize,
    /// Exponential recency decay per day (weight = exp(-xi * days))
    pub recency_decay_per_day: f64,
    /// Below this many matches the team falls back to league averages
    pub min_matches: usize,
    /// League home goals per match when the league has no history
    pub default_home_goals: f64,
    /// League away goals per match when the league has no history
    pub default_away_goals: f64,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            window_matches: 8,
            recency_decay_per_day: 0.0065,
            min_matches: 3,
            default_home_goals: 1.5,
            default_away_goals: 1.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueConfig {
    /// Minimum edge (p * odds - 1) to flag a value bet
    pub edge_threshold: f64,
    /// Minimum matches behind both teams before any bet is flagged
    pub min_sample_size: usize,
    /// Maximum value bets handed to the executor per fixture
    pub max_bets_per_fixture: usize,
    /// Derive 1X2 quotes from community votes when no bookmaker quotes exist
    pub community_fallback: bool,
    /// Minimum votes before community shares are trusted
    pub community_min_votes: u64,
    /// Margin added to community shares when building synthetic odds
    pub community_margin: f64,
}

impl Default for ValueConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 0.05,
            min_sample_size: 5,
            max_bets_per_fixture: 3,
            community_fallback: true,
            community_min_votes: 100,
            community_margin: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StakingConfig {
    /// Starting capital; current capital adds settled P&L
    pub initial_capital: f64,
    /// Maximum stake per bet as a share of current capital
    pub bankroll_fraction: f64,
    /// Maximum total stake across pending bets
    pub max_open_exposure: f64,
    /// Fraction of full Kelly to stake (0.25 = quarter Kelly)
    pub kelly_fraction: f64,
    pub policy: StakingPolicy,
    /// Stake used by the flat policy
    pub flat_stake: f64,
    /// Shrink an oversized stake to the cap instead of rejecting it
    pub reduce_to_cap: bool,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1000.0,
            bankroll_fraction: 0.05,
            max_open_exposure: 250.0,
            kelly_fraction: 0.25,
            policy: StakingPolicy::Kelly,
            flat_stake: 10.0,
            reduce_to_cap: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    /// Step size before any bet has been observed
    pub initial_step: f64,
    /// Observed bets after which the step has halved
    pub decay_horizon_bets: f64,
    /// Per-component clip on a single adjustment
    pub max_step: f64,
    /// Attempts at appending a version before the cycle fails
    pub max_retries: usize,
    pub scoring_rule: ScoringRule,
    pub genesis_home_advantage: f64,
    pub genesis_attack_weight: f64,
    pub genesis_defense_weight: f64,
    pub genesis_confidence_weight: f64,
    pub genesis_low_score_dependence: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            initial_step: 0.05,
            decay_horizon_bets: 200.0,
            max_step: 0.05,
            max_retries: 3,
            scoring_rule: ScoringRule::LogLoss,
            genesis_home_advantage: 1.15,
            genesis_attack_weight: 1.0,
            genesis_defense_weight: 1.0,
            genesis_confidence_weight: 3.0,
            genesis_low_score_dependence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Attempts per provider call before reporting unavailability
    pub max_attempts: usize,
    /// Initial backoff; doubles on each retry
    pub backoff_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory (ledger, parameter history, provider files, journal)
    pub data_dir: String,
    /// Append one CSV row per settlement
    pub journal_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            journal_enabled: true,
        }
    }
}

impl PersistenceConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Prediction defaults
            .set_default("prediction.max_goals", 10)?
            // Features defaults
            .set_default("features.window_matches", 8)?
            .set_default("features.recency_decay_per_day", 0.0065)?
            .set_default("features.min_matches", 3)?
            .set_default("features.default_home_goals", 1.5)?
            .set_default("features.default_away_goals", 1.15)?
            // Value defaults
            .set_default("value.edge_threshold", 0.05)?
            .set_default("value.min_sample_size", 5)?
            .set_default("value.max_bets_per_fixture", 3)?
            .set_default("value.community_fallback", true)?
            .set_default("value.community_min_votes", 100)?
            .set_default("value.community_margin", 0.05)?
            // Staking defaults
            .set_default("staking.initial_capital", 1000.0)?
            .set_default("staking.bankroll_fraction", 0.05)?
            .set_default("staking.max_open_exposure", 250.0)?
            .set_default("staking.kelly_fraction", 0.25)?
            .set_default("staking.policy", "kelly")?
            .set_default("staking.flat_stake", 10.0)?
            .set_default("staking.reduce_to_cap", false)?
            // Learning defaults
            .set_default("learning.initial_step", 0.05)?
            .set_default("learning.decay_horizon_bets", 200.0)?
            .set_default("learning.max_step", 0.05)?
            .set_default("learning.max_retries", 3)?
            .set_default("learning.scoring_rule", "log_loss")?
            .set_default("learning.genesis_home_advantage", 1.15)?
            .set_default("learning.genesis_attack_weight", 1.0)?
            .set_default("learning.genesis_defense_weight", 1.0)?
            .set_default("learning.genesis_confidence_weight", 3.0)?
            .set_default("learning.genesis_low_score_dependence", 0.0)?
            // Provider defaults
            .set_default("providers.max_attempts", 3)?
            .set_default("providers.backoff_ms", 250)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.journal_enabled", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ODDSBREAKER_*)
            .add_source(Environment::with_prefix("ODDSBREAKER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject values the core cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.prediction.max_goals == 0 {
            bail!("prediction.max_goals must be at least 1");
        }
        if self.features.window_matches == 0 {
            bail!("features.window_matches must be at least 1");
        }
        if self.features.recency_decay_per_day < 0.0 {
            bail!("features.recency_decay_per_day must not be negative");
        }
        if !(0.0..=1.0).contains(&self.staking.bankroll_fraction) {
            bail!("staking.bankroll_fraction must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.staking.kelly_fraction) {
            bail!("staking.kelly_fraction must be within [0, 1]");
        }
        if self.staking.initial_capital <= 0.0 || self.staking.max_open_exposure < 0.0 {
            bail!("staking.initial_capital must be positive and max_open_exposure non-negative");
        }
        if self.learning.decay_horizon_bets <= 0.0 || self.learning.max_step <= 0.0 {
            bail!("learning.decay_horizon_bets and learning.max_step must be positive");
        }
        if self.learning.max_retries == 0 || self.providers.max_attempts == 0 {
            bail!("learning.max_retries and providers.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Short one-line summary for logging
    pub fn digest(&self) -> String {
        format!(
            "max_goals={} edge>{:.3} fraction={:.3} exposure<={:.2} policy={} rule={} data_dir={}",
            self.prediction.max_goals,
            self.value.edge_threshold,
            self.staking.bankroll_fraction,
            self.staking.max_open_exposure,
            self.staking.policy,
            self.learning.scoring_rule,
            self.persistence.data_dir
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.prediction.max_goals, 10);
        assert_eq!(cfg.staking.policy, StakingPolicy::Kelly);
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        let mut cfg = AppConfig::default();
        cfg.staking.bankroll_fraction = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn policy_parses_lowercase() {
        let policy: StakingPolicy = serde_json::from_str("\"flat\"").unwrap();
        assert_eq!(policy, StakingPolicy::Flat);
    }
}
