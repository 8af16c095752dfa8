//! Risk Manager - bankroll and exposure controls
//!
//! Implements:
//! - Stake sizing (fractional Kelly or flat)
//! - Per-bet cap as a fraction of current capital
//! - Total open exposure limit, enforced through reservations
//!
//! Current capital is the starting capital plus realized P&L of settled
//! bets; open exposure is the stake sum of pending bets.

use std::sync::Mutex;
use tracing::debug;

use crate::betting::kelly::compute_fractional_kelly;
use crate::config::{StakingConfig, StakingPolicy};
use crate::error::{BankrollRule, EngineError, Result};
use crate::types::BetRecord;

/// Stakes below this are not worth placing
pub const MIN_STAKE: f64 = 0.01;

/// Snapshot of bankroll figures
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BankrollState {
    /// Starting capital plus settled P&L
    pub capital: f64,
    /// Sum of stakes on pending bets (plus in-flight reservations)
    pub open_exposure: f64,
    pub open_bets: usize,
}

impl BankrollState {
    /// Rebuild from the ledger's bets
    pub fn from_bets(initial_capital: f64, bets: &[BetRecord]) -> Self {
        let mut state = BankrollState {
            capital: initial_capital,
            ..Default::default()
        };
        for bet in bets {
            if bet.is_open() {
                state.open_exposure += bet.stake;
                state.open_bets += 1;
            } else if let Some(pnl) = bet.pnl() {
                state.capital += pnl;
            }
        }
        state
    }
}

/// Accepted stake holding exposure until placed or released
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub stake: f64,
    /// Stake was shrunk to fit a cap
    pub reduced: bool,
}

pub struct RiskManager {
    config: StakingConfig,
    state: Mutex<BankrollState>,
}

impl RiskManager {
    pub fn new(config: StakingConfig) -> Self {
        let state = BankrollState {
            capital: config.initial_capital,
            ..Default::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    pub fn snapshot(&self) -> BankrollState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Replace the tracked state (after re-reading the ledger)
    pub fn refresh(&self, state: BankrollState) {
        match self.state.lock() {
            Ok(mut s) => *s = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    /// Maximum stake per bet for the given capital
    pub fn stake_cap(&self, capital: f64) -> f64 {
        (capital * self.config.bankroll_fraction).max(0.0)
    }

    /// Stake the policy asks for, before caps
    pub fn size_stake(&self, probability: f64, odds: f64, capital: f64) -> f64 {
        match self.config.policy {
            StakingPolicy::Flat => self.config.flat_stake,
            StakingPolicy::Kelly => {
                compute_fractional_kelly(probability, odds, self.config.kelly_fraction, capital)
                    .stake
            }
        }
    }

    /// Check `requested` against both limits and, when accepted, add it to
    /// open exposure. The check and the increment happen under one lock.
    pub fn reserve(&self, requested: f64) -> Result<Reservation> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.capital <= 0.0 {
            return Err(EngineError::BankrollExceeded {
                stake: requested,
                limit: 0.0,
                rule: BankrollRule::InsufficientCapital,
            });
        }

        let mut stake = requested;
        let mut reduced = false;

        let cap = self.stake_cap(state.capital);
        if stake > cap {
            if !self.config.reduce_to_cap {
                return Err(EngineError::BankrollExceeded {
                    stake,
                    limit: cap,
                    rule: BankrollRule::StakeFraction,
                });
            }
            stake = cap;
            reduced = true;
        }

        let room = (self.config.max_open_exposure - state.open_exposure).max(0.0);
        if stake > room {
            if !self.config.reduce_to_cap || room < MIN_STAKE {
                return Err(EngineError::BankrollExceeded {
                    stake,
                    limit: room,
                    rule: BankrollRule::OpenExposure,
                });
            }
            stake = room;
            reduced = true;
        }

        state.open_exposure += stake;
        state.open_bets += 1;
        debug!(
            stake,
            open_exposure = state.open_exposure,
            capital = state.capital,
            reduced,
            "stake reserved"
        );
        Ok(Reservation { stake, reduced })
    }

    /// Give back a reservation that did not become a bet
    pub fn release(&self, reservation: &Reservation) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.open_exposure = (state.open_exposure - reservation.stake).max(0.0);
        state.open_bets = state.open_bets.saturating_sub(1);
    }
}
