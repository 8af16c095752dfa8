//! OddsBreaker Library
//!
//! Sports value-betting engine: Poisson match prediction, value detection
//! against bookmaker odds, bankroll-limited staking, settlement and
//! continual recalibration of the model from settled bets.

pub mod backtesting;
pub mod betting;
pub mod config;
pub mod cycle;
pub mod error;
pub mod features;
pub mod ml_engine;
pub mod persistence;
pub mod providers;
pub mod risk;
pub mod types;
