//! Betting - value detection, staking and settlement

pub mod edge_engine;
pub mod executor;
pub mod kelly;
pub mod market;
pub mod settlement;

pub use edge_engine::{ValueBet, ValueDetector, ValueGrade};
pub use executor::{AutoBetExecutor, PlacementOutcome, PlacementSummary};
pub use market::{settle, Settlement};
pub use settlement::{OutcomeVerifier, Verification};
