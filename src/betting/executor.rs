//! AutoBetExecutor - places flagged value bets under bankroll constraints
//!
//! Per candidate: size the stake, reserve it against the bankroll caps,
//! then create the bet in the ledger (atomic create-if-absent on the
//! fixture/market key). A reservation that does not turn into a bet is
//! released, so no partial or duplicate stake is ever counted.
//!
//! Placements share a read gate and a bankroll sync takes it exclusively,
//! so a sync never rebuilds exposure while a reservation is in flight.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::betting::edge_engine::ValueBet;
use crate::error::{EngineError, Result};
use crate::persistence::{BetLedger, CreateOutcome};
use crate::risk::{BankrollState, RiskManager, MIN_STAKE};
use crate::types::{BetId, BetRecord, BetStatus, MatchFixture};

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    Placed(BetRecord),
    /// An open bet already holds this fixture/market
    Duplicate(BetRecord),
    /// Policy sized the stake to nothing
    NoStake,
}

/// Tally of one fixture's placements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementSummary {
    pub placed: Vec<BetRecord>,
    pub duplicates: usize,
    pub rejected: usize,
    pub no_stake: usize,
}

pub struct AutoBetExecutor {
    risk: RiskManager,
    ledger: Arc<dyn BetLedger>,
    gate: RwLock<()>,
}

impl AutoBetExecutor {
    pub fn new(risk: RiskManager, ledger: Arc<dyn BetLedger>) -> Self {
        Self {
            risk,
            ledger,
            gate: RwLock::new(()),
        }
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Re-read capital and open exposure from the ledger
    pub async fn sync_bankroll(&self) -> Result<BankrollState> {
        let _exclusive = self.gate.write().await;
        let bets = self.ledger.list_all().await?;
        let state = BankrollState::from_bets(self.risk.config().initial_capital, &bets);
        self.risk.refresh(state);
        debug!(
            capital = state.capital,
            open_exposure = state.open_exposure,
            open_bets = state.open_bets,
            "bankroll synced"
        );
        Ok(state)
    }

    /// Place one candidate
    pub async fn place(&self, fixture: &MatchFixture, bet: &ValueBet) -> Result<PlacementOutcome> {
        let _shared = self.gate.read().await;
        let capital = self.risk.snapshot().capital;
        let requested = self.risk.size_stake(bet.probability, bet.quote.odds, capital);
        if requested < MIN_STAKE {
            debug!(fixture = %fixture.id, market = %bet.quote.market, "policy stake is zero");
            return Ok(PlacementOutcome::NoStake);
        }

        let reservation = self.risk.reserve(requested)?;
        let record = BetRecord {
            id: BetId::generate(),
            fixture: fixture.clone(),
            market: bet.quote.market,
            selection: bet.quote.selection,
            stake: reservation.stake,
            odds: bet.quote.odds,
            quote_provider: bet.quote.provider.clone(),
            quoted_at: bet.quote.quoted_at,
            predicted_probability: bet.probability,
            edge: bet.edge,
            parameter_version: bet.parameter_version,
            matchup: bet.matchup,
            placed_at: Utc::now(),
            status: BetStatus::Pending,
            settled_at: None,
            final_score: None,
            payout: None,
            learned_in_version: None,
        };

        match self.ledger.create(record).await {
            Ok(CreateOutcome::Created(placed)) => {
                info!(
                    bet_id = %placed.id,
                    fixture = %placed.fixture,
                    market = %placed.market,
                    selection = %placed.selection,
                    stake = placed.stake,
                    odds = placed.odds,
                    edge = placed.edge,
                    grade = %bet.grade,
                    reduced = reservation.reduced,
                    "bet placed"
                );
                Ok(PlacementOutcome::Placed(placed))
            }
            Ok(CreateOutcome::AlreadyOpen(existing)) => {
                self.risk.release(&reservation);
                debug!(key = %existing.key(), "open bet exists, skipping");
                Ok(PlacementOutcome::Duplicate(existing))
            }
            Err(e) => {
                self.risk.release(&reservation);
                Err(e)
            }
        }
    }

    /// Place candidates in the order given; a rejected candidate is
    /// dropped and the next one is tried
    pub async fn place_all(
        &self,
        fixture: &MatchFixture,
        bets: &[ValueBet],
    ) -> Result<PlacementSummary> {
        let mut summary = PlacementSummary::default();
        for bet in bets {
            match self.place(fixture, bet).await {
                Ok(PlacementOutcome::Placed(b)) => summary.placed.push(b),
                Ok(PlacementOutcome::Duplicate(_)) => summary.duplicates += 1,
                Ok(PlacementOutcome::NoStake) => summary.no_stake += 1,
                Err(e @ EngineError::BankrollExceeded { .. }) => {
                    warn!(
                        fixture = %fixture.id,
                        market = %bet.quote.market,
                        selection = %bet.quote.selection,
                        error = %e,
                        "candidate rejected"
                    );
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::betting::edge_engine::ValueGrade;
    use crate::config::{StakingConfig, StakingPolicy};
    use crate::error::BankrollRule;
    use crate::persistence::{LocalBetLedger, StatusUpdate};
    use crate::types::{
        FixtureId, MarketKind, MarketQuote, MatchupFeatures, Selection, TeamId,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    fn fixture(id: &str) -> MatchFixture {
        MatchFixture {
            id: FixtureId::new(id),
            home: TeamId::new("H"),
            away: TeamId::new("A"),
            kickoff: Utc::now(),
            league: "L".into(),
        }
    }

    fn candidate(fixture_id: &str, market: MarketKind, selection: Selection) -> ValueBet {
        ValueBet {
            quote: MarketQuote {
                fixture_id: FixtureId::new(fixture_id),
                provider: "book".into(),
                market,
                selection,
                odds: 2.5,
                quoted_at: Utc::now(),
            },
            probability: 0.5,
            edge: 0.25,
            grade: ValueGrade::Diamond,
            variance: 0.25,
            margin: None,
            fair_probability: None,
            parameter_version: 1,
            matchup: MatchupFeatures {
                base_goals: 1.3,
                home_attack: 1.0,
                home_defense: 1.0,
                away_attack: 1.0,
                away_defense: 1.0,
                home_samples: 8,
                away_samples: 8,
            },
            sample_size: 8,
        }
    }

    fn executor(config: StakingConfig) -> (AutoBetExecutor, Arc<LocalBetLedger>) {
        let ledger = Arc::new(LocalBetLedger::in_memory());
        (
            AutoBetExecutor::new(RiskManager::new(config), ledger.clone()),
            ledger,
        )
    }

    fn flat(stake: f64) -> StakingConfig {
        StakingConfig {
            policy: StakingPolicy::Flat,
            flat_stake: stake,
            ..StakingConfig::default()
        }
    }

    #[tokio::test]
    async fn oversize_stake_creates_nothing() {
        let (ex, ledger) = executor(flat(60.0));
        let err = ex
            .place(
                &fixture("f1"),
                &candidate("f1", MarketKind::MatchResult, Selection::Home),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::BankrollExceeded {
                rule: BankrollRule::StakeFraction,
                ..
            }
        ));
        assert!(ledger.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_releases_reservation() {
        let (ex, ledger) = executor(flat(10.0));
        let fx = fixture("f1");
        let c = candidate("f1", MarketKind::MatchResult, Selection::Home);
        assert!(matches!(
            ex.place(&fx, &c).await.unwrap(),
            PlacementOutcome::Placed(_)
        ));
        assert!(matches!(
            ex.place(&fx, &c).await.unwrap(),
            PlacementOutcome::Duplicate(_)
        ));
        assert_eq!(ex.risk().snapshot().open_exposure, 10.0);
        assert_eq!(ledger.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_fixtures_never_pass_exposure_cap() {
        let (ex, ledger) = executor(StakingConfig {
            max_open_exposure: 95.0,
            ..flat(20.0)
        });
        let ex = Arc::new(ex);
        let mut handles = Vec::new();
        for i in 0..12 {
            let ex = ex.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("f{i}");
                ex.place(
                    &fixture(&id),
                    &candidate(&id, MarketKind::MatchResult, Selection::Home),
                )
                .await
            }));
        }
        for h in handles {
            let _ = h.await.unwrap();
        }
        let open: f64 = ledger
            .list_pending()
            .await
            .unwrap()
            .iter()
            .map(|b| b.stake)
            .sum();
        assert_eq!(open, 80.0);
        assert!(open <= 95.0);
    }

    #[tokio::test]
    async fn rejected_candidate_does_not_stop_the_rest() {
        let (ex, _) = executor(StakingConfig {
            max_open_exposure: 15.0,
            ..flat(10.0)
        });
        let fx = fixture("f1");
        let bets = vec![
            candidate("f1", MarketKind::MatchResult, Selection::Home),
            candidate("f1", MarketKind::BothTeamsToScore, Selection::Yes),
        ];
        let summary = ex.place_all(&fx, &bets).await.unwrap();
        assert_eq!(summary.placed.len(), 1);
        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn sync_rebuilds_capital_from_settled_bets() {
        let (ex, ledger) = executor(flat(10.0));
        let fx = fixture("f1");
        let PlacementOutcome::Placed(bet) = ex
            .place(&fx, &candidate("f1", MarketKind::MatchResult, Selection::Home))
            .await
            .unwrap()
        else {
            panic!("expected placement");
        };
        ledger
            .update_status(
                &bet.id,
                crate::persistence::StatusUpdate {
                    status: BetStatus::Won,
                    settled_at: Utc::now(),
                    final_score: crate::types::FinalScore::new(1, 0),
                    payout: 25.0,
                },
            )
            .await
            .unwrap();
        let state = ex.sync_bankroll().await.unwrap();
        assert_eq!(state.capital, 1015.0);
        assert_eq!(state.open_exposure, 0.0);
    }

    /// Ledger whose writes take a while to land
    struct SlowLedger {
        inner: LocalBetLedger,
    }

    #[async_trait]
    impl BetLedger for SlowLedger {
        async fn create(&self, bet: BetRecord) -> Result<CreateOutcome> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.inner.create(bet).await
        }

        async fn get(&self, id: &BetId) -> Result<Option<BetRecord>> {
            self.inner.get(id).await
        }

        async fn update_status(&self, id: &BetId, update: StatusUpdate) -> Result<BetRecord> {
            self.inner.update_status(id, update).await
        }

        async fn list_pending(&self) -> Result<Vec<BetRecord>> {
            self.inner.list_pending().await
        }

        async fn list_unlearned(&self) -> Result<Vec<BetRecord>> {
            self.inner.list_unlearned().await
        }

        async fn claim_unlearned(&self) -> Result<Vec<BetRecord>> {
            self.inner.claim_unlearned().await
        }

        async fn release_claims(&self, ids: &[BetId]) -> Result<()> {
            self.inner.release_claims(ids).await
        }

        async fn mark_learned(&self, ids: &[BetId], version: u64) -> Result<()> {
            self.inner.mark_learned(ids, version).await
        }

        async fn list_all(&self) -> Result<Vec<BetRecord>> {
            self.inner.list_all().await
        }
    }

    #[tokio::test]
    async fn sync_during_placement_keeps_in_flight_exposure() {
        let ledger = Arc::new(SlowLedger {
            inner: LocalBetLedger::in_memory(),
        });
        let ex = Arc::new(AutoBetExecutor::new(
            RiskManager::new(StakingConfig {
                max_open_exposure: 60.0,
                ..flat(40.0)
            }),
            ledger.clone(),
        ));

        let first = {
            let ex = ex.clone();
            tokio::spawn(async move {
                ex.place(
                    &fixture("f1"),
                    &candidate("f1", MarketKind::MatchResult, Selection::Home),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        ex.sync_bankroll().await.unwrap();
        let second = ex
            .place(
                &fixture("f2"),
                &candidate("f2", MarketKind::MatchResult, Selection::Home),
            )
            .await;

        assert!(matches!(
            first.await.unwrap().unwrap(),
            PlacementOutcome::Placed(_)
        ));
        assert!(matches!(
            second,
            Err(EngineError::BankrollExceeded {
                rule: BankrollRule::OpenExposure,
                ..
            })
        ));
        let open: f64 = ledger
            .list_pending()
            .await
            .unwrap()
            .iter()
            .map(|b| b.stake)
            .sum();
        assert_eq!(open, 40.0);
        assert_eq!(ex.risk().snapshot().open_exposure, 40.0);
    }
}
