//! Error taxonomy for the prediction and staking core
//!
//! Callers branch on these variants: `DataUnavailable` skips a fixture,
//! `InvalidMarketQuote` drops one quote, `BankrollExceeded` drops one
//! candidate, `SettlementAmbiguous` leaves a bet pending and
//! `ParameterUpdateConflict` is retried a bounded number of times.

use std::fmt;

use thiserror::Error;

/// Failures reported by external data providers.
///
/// Only the retrying adapter ever sees `Transient`; the core receives
/// either data or `Unavailable`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("{provider} transient failure: {reason}")]
    Transient { provider: String, reason: String },
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        ProviderError::Transient {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// Which bankroll rule rejected a stake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankrollRule {
    /// Stake above `bankroll_fraction` of current capital
    StakeFraction,
    /// Total open stake would pass `max_open_exposure`
    OpenExposure,
    /// Capital is exhausted
    InsufficientCapital,
}

impl fmt::Display for BankrollRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankrollRule::StakeFraction => write!(f, "stake fraction"),
            BankrollRule::OpenExposure => write!(f, "open exposure"),
            BankrollRule::InsufficientCapital => write!(f, "insufficient capital"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no usable history for team {team}: {reason}")]
    DataUnavailable { team: String, reason: String },

    #[error("invalid market quote: {reason}")]
    InvalidMarketQuote { reason: String },

    #[error("bankroll exceeded ({rule}): stake {stake:.2} over limit {limit:.2}")]
    BankrollExceeded {
        stake: f64,
        limit: f64,
        rule: BankrollRule,
    },

    #[error("settlement ambiguous for bet {bet_id}: result not final")]
    SettlementAmbiguous { bet_id: String },

    #[error(
        "parameter update conflict: built on v{base_version}, latest is v{latest_version} after {attempts} attempt(s)"
    )]
    ParameterUpdateConflict {
        base_version: u64,
        latest_version: u64,
        attempts: usize,
    },

    #[error("invalid status transition for bet {bet_id}: {from} -> {to}")]
    InvalidTransition {
        bet_id: String,
        from: String,
        to: String,
    },

    #[error("bet {0} not found")]
    BetNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn data_unavailable(team: impl fmt::Display, reason: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            team: team.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_quote(reason: impl Into<String>) -> Self {
        EngineError::InvalidMarketQuote {
            reason: reason.into(),
        }
    }

    /// Errors confined to a single fixture, bet or quote; batches carry on.
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            EngineError::DataUnavailable { .. }
                | EngineError::InvalidMarketQuote { .. }
                | EngineError::BankrollExceeded { .. }
                | EngineError::SettlementAmbiguous { .. }
                | EngineError::Provider(ProviderError::Unavailable { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
