//! Configuration types and re-exports

use serde::Deserialize;
use std::fmt;

pub use super::{
    AppConfig, FeaturesConfig, LearningConfig, PersistenceConfig, PredictionConfig,
    ProvidersConfig, StakingConfig, ValueConfig,
};

/// How stakes are sized before the bankroll caps apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakingPolicy {
    /// Fractional Kelly on current capital
    Kelly,
    /// Fixed `flat_stake` per bet
    Flat,
}

impl fmt::Display for StakingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StakingPolicy::Kelly => write!(f, "kelly"),
            StakingPolicy::Flat => write!(f, "flat"),
        }
    }
}
