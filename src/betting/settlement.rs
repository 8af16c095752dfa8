//! OutcomeVerifier - settles pending bets against final results
//!
//! Won pays stake × odds, void returns the stake, lost pays nothing.
//! An already-settled bet is returned untouched. A fixture that is not
//! finished leaves the bet pending (`SettlementAmbiguous`).

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::betting::market::{settle, Settlement};
use crate::error::{EngineError, Result};
use crate::persistence::{BetLedger, SettlementJournal, StatusUpdate};
use crate::types::{BetRecord, BetStatus, FinalScore, MatchOutcome};

/// Terminal status and payout for a bet on a final score
pub fn settlement_for(bet: &BetRecord, score: FinalScore) -> Result<(BetStatus, f64)> {
    if !bet.market.accepts(&bet.selection) {
        return Err(EngineError::invalid_quote(format!(
            "bet {}: selection {} does not belong to market {}",
            bet.id, bet.selection, bet.market
        )));
    }
    Ok(match settle(&bet.market, &bet.selection, score) {
        Settlement::Win => (BetStatus::Won, bet.stake * bet.odds),
        Settlement::Push => (BetStatus::Void, bet.stake),
        Settlement::Loss => (BetStatus::Lost, 0.0),
    })
}

/// Pure resolution of one bet. Terminal bets come back unchanged.
pub fn resolve(bet: &BetRecord, outcome: MatchOutcome, at: DateTime<Utc>) -> Result<BetRecord> {
    if bet.status.is_terminal() {
        return Ok(bet.clone());
    }
    let MatchOutcome::Final(score) = outcome else {
        return Err(EngineError::SettlementAmbiguous {
            bet_id: bet.id.to_string(),
        });
    };

    let (status, payout) = settlement_for(bet, score)?;
    let mut settled = bet.clone();
    settled.status = status;
    settled.settled_at = Some(at);
    settled.final_score = Some(score);
    settled.payout = Some(payout);
    Ok(settled)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Moved from pending to a terminal state by this call
    Settled(BetRecord),
    /// Was already terminal; nothing changed
    AlreadySettled(BetRecord),
}

impl Verification {
    pub fn bet(&self) -> &BetRecord {
        match self {
            Verification::Settled(b) | Verification::AlreadySettled(b) => b,
        }
    }

    pub fn status(&self) -> BetStatus {
        self.bet().status
    }
}

pub struct OutcomeVerifier {
    ledger: Arc<dyn BetLedger>,
    journal: Option<Arc<SettlementJournal>>,
}

impl OutcomeVerifier {
    pub fn new(ledger: Arc<dyn BetLedger>) -> Self {
        Self {
            ledger,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<SettlementJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Settle `bet` against `outcome`. The ledger copy is authoritative:
    /// if it is already terminal, it is returned as is.
    pub async fn verify(&self, bet: &BetRecord, outcome: MatchOutcome) -> Result<Verification> {
        let stored = self
            .ledger
            .get(&bet.id)
            .await?
            .ok_or_else(|| EngineError::BetNotFound(bet.id.to_string()))?;
        if stored.status.is_terminal() {
            return Ok(Verification::AlreadySettled(stored));
        }

        let resolved = resolve(&stored, outcome, Utc::now())?;
        let (Some(settled_at), Some(final_score), Some(payout)) =
            (resolved.settled_at, resolved.final_score, resolved.payout)
        else {
            return Err(EngineError::SettlementAmbiguous {
                bet_id: stored.id.to_string(),
            });
        };

        let settled = self
            .ledger
            .update_status(
                &stored.id,
                StatusUpdate {
                    status: resolved.status,
                    settled_at,
                    final_score,
                    payout,
                },
            )
            .await?;

        info!(
            bet_id = %settled.id,
            fixture = %settled.fixture,
            market = %settled.market,
            selection = %settled.selection,
            score = %final_score,
            status = %settled.status,
            payout = payout,
            pnl = payout - settled.stake,
            "bet settled"
        );

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&settled).await {
                warn!(bet_id = %settled.id, error = %e, "failed to journal settlement");
            }
        }
        Ok(Verification::Settled(settled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::LocalBetLedger;
    use crate::types::{
        BetId, FixtureId, Line, MarketKind, MatchFixture, MatchupFeatures, Selection, TeamId,
    };

    fn pending(market: MarketKind, selection: Selection, stake: f64, odds: f64) -> BetRecord {
        BetRecord {
            id: BetId::generate(),
            fixture: MatchFixture {
                id: FixtureId::new(format!("f-{}", uuid::Uuid::new_v4())),
                home: TeamId::new("H"),
                away: TeamId::new("A"),
                kickoff: Utc::now(),
                league: "L".into(),
            },
            market,
            selection,
            stake,
            odds,
            quote_provider: "book".into(),
            quoted_at: Utc::now(),
            predicted_probability: 0.5,
            edge: 0.1,
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
            placed_at: Utc::now(),
            status: BetStatus::Pending,
            settled_at: None,
            final_score: None,
            payout: None,
            learned_in_version: None,
        }
    }

    fn final_score(h: u8, a: u8) -> MatchOutcome {
        MatchOutcome::Final(FinalScore::new(h, a))
    }

    #[test]
    fn home_win_pays_stake_times_odds() {
        let bet = pending(MarketKind::MatchResult, Selection::Home, 10.0, 2.5);
        let settled = resolve(&bet, final_score(2, 1), Utc::now()).unwrap();
        assert_eq!(settled.status, BetStatus::Won);
        assert_eq!(settled.payout, Some(25.0));
    }

    #[test]
    fn whole_line_push_returns_stake() {
        let line = Line::new(3.0).unwrap();
        let bet = pending(MarketKind::TotalGoals { line }, Selection::Over, 10.0, 1.9);
        let settled = resolve(&bet, final_score(2, 1), Utc::now()).unwrap();
        assert_eq!(settled.status, BetStatus::Void);
        assert_eq!(settled.payout, Some(10.0));
        assert_eq!(settled.pnl(), Some(0.0));
    }

    #[test]
    fn not_finished_stays_pending() {
        let bet = pending(MarketKind::MatchResult, Selection::Home, 10.0, 2.5);
        let err = resolve(&bet, MatchOutcome::NotFinished, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::SettlementAmbiguous { .. }));
    }

    #[tokio::test]
    async fn verifying_twice_changes_nothing() {
        let ledger = Arc::new(LocalBetLedger::in_memory());
        let verifier = OutcomeVerifier::new(ledger.clone());
        let bet = pending(MarketKind::MatchResult, Selection::Home, 10.0, 2.5);
        ledger.create(bet.clone()).await.unwrap();

        let first = verifier.verify(&bet, final_score(2, 1)).await.unwrap();
        let second = verifier.verify(&bet, final_score(2, 1)).await.unwrap();
        assert!(matches!(first, Verification::Settled(_)));
        assert!(matches!(second, Verification::AlreadySettled(_)));
        assert_eq!(first.bet(), second.bet());
        assert_eq!(second.bet().placed_at, bet.placed_at);
    }

    #[tokio::test]
    async fn pending_bet_survives_unfinished_result() {
        let ledger = Arc::new(LocalBetLedger::in_memory());
        let verifier = OutcomeVerifier::new(ledger.clone());
        let bet = pending(MarketKind::BothTeamsToScore, Selection::Yes, 5.0, 1.8);
        ledger.create(bet.clone()).await.unwrap();

        assert!(verifier
            .verify(&bet, MatchOutcome::NotFinished)
            .await
            .is_err());
        let stored = ledger.get(&bet.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BetStatus::Pending);
    }
}
