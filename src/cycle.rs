//! The two batch operations driven by an external scheduler:
//!
//! - `stake_batch`: features -> prediction -> value detection -> placement
//!   for a set of fixtures, processed concurrently with per-fixture
//!   failure isolation
//! - `verify_and_learn`: settle pending bets, then feed every settled but
//!   unlearned bet to the learning updater
//!
//! Neither holds state between invocations beyond what the ledger and
//! parameter store persist.

use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::betting::edge_engine::community_quotes;
use crate::betting::{AutoBetExecutor, OutcomeVerifier, ValueDetector, Verification};
use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::features::FeatureExtractor;
use crate::ml_engine::calibration::ModelParameters;
use crate::ml_engine::{LearningResult, LearningUpdater, PoissonPredictor};
use crate::persistence::{BetLedger, ParameterStore, SettlementJournal};
use crate::providers::{HistoryProvider, OddsProvider, ResultsProvider};
use crate::risk::RiskManager;
use crate::types::{BetId, BetRecord, FixtureId, MarketKind, MatchFixture};

/// Result of one stake batch
#[derive(Debug, Clone, Default)]
pub struct StakeReport {
    pub parameter_version: u64,
    pub fixtures: usize,
    /// Fixtures skipped, with the reason
    pub skipped: Vec<(FixtureId, String)>,
    pub value_bets: usize,
    pub placed: Vec<BetRecord>,
    pub duplicates: usize,
    pub rejected: usize,
}

impl StakeReport {
    pub fn total_staked(&self) -> f64 {
        self.placed.iter().map(|b| b.stake).sum()
    }
}

/// Result of one verify-and-learn batch
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub settled: Vec<BetRecord>,
    /// Bets whose fixture has no final result yet
    pub still_pending: usize,
    /// Bets whose result could not be fetched
    pub unavailable: usize,
    /// Listed as pending but already terminal in the ledger
    pub already_settled: usize,
    /// Bets that could not be settled, with the reason
    pub failed: Vec<(BetId, String)>,
    pub learned_bets: usize,
    /// Version produced by learning, if any
    pub new_version: Option<u64>,
}

struct FixtureOutcome {
    value_bets: usize,
    placed: Vec<BetRecord>,
    duplicates: usize,
    rejected: usize,
}

enum Resolution {
    Settled(BetRecord),
    AlreadySettled,
    Pending,
    Unavailable,
}

pub struct Engine {
    extractor: FeatureExtractor,
    predictor: PoissonPredictor,
    detector: ValueDetector,
    executor: AutoBetExecutor,
    verifier: OutcomeVerifier,
    learner: LearningUpdater,
    ledger: Arc<dyn BetLedger>,
    parameters: Arc<dyn ParameterStore>,
    odds: Arc<dyn OddsProvider>,
    results: Arc<dyn ResultsProvider>,
    history: Arc<dyn HistoryProvider>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AppConfig,
        ledger: Arc<dyn BetLedger>,
        parameters: Arc<dyn ParameterStore>,
        odds: Arc<dyn OddsProvider>,
        results: Arc<dyn ResultsProvider>,
        history: Arc<dyn HistoryProvider>,
        journal: Option<Arc<SettlementJournal>>,
    ) -> Self {
        let predictor = PoissonPredictor::new(config.prediction.clone());
        let mut verifier = OutcomeVerifier::new(ledger.clone());
        if let Some(journal) = journal {
            verifier = verifier.with_journal(journal);
        }
        Self {
            extractor: FeatureExtractor::new(config.features.clone()),
            detector: ValueDetector::new(config.value.clone()),
            executor: AutoBetExecutor::new(
                RiskManager::new(config.staking.clone()),
                ledger.clone(),
            ),
            verifier,
            learner: LearningUpdater::new(config.learning.clone(), predictor.clone()),
            predictor,
            ledger,
            parameters,
            odds,
            results,
            history,
        }
    }

    pub fn executor(&self) -> &AutoBetExecutor {
        &self.executor
    }

    /// Predict, detect and stake across `fixtures`. One fixture failing
    /// never aborts the others.
    pub async fn stake_batch(&self, fixtures: &[MatchFixture]) -> Result<StakeReport> {
        let params = self.parameters.latest().await?;
        self.executor.sync_bankroll().await?;
        info!(
            fixtures = fixtures.len(),
            version = params.version,
            "stake batch started"
        );

        let outcomes = join_all(
            fixtures
                .iter()
                .map(|fixture| self.stake_fixture(fixture, &params)),
        )
        .await;

        let mut report = StakeReport {
            parameter_version: params.version,
            fixtures: fixtures.len(),
            ..Default::default()
        };
        for (fixture, outcome) in fixtures.iter().zip(outcomes) {
            match outcome {
                Ok(o) => {
                    report.value_bets += o.value_bets;
                    report.duplicates += o.duplicates;
                    report.rejected += o.rejected;
                    report.placed.extend(o.placed);
                }
                Err(e) => {
                    if e.is_isolated() {
                        warn!(fixture = %fixture.id, error = %e, "fixture skipped");
                    } else {
                        error!(fixture = %fixture.id, error = %e, "fixture failed");
                    }
                    report.skipped.push((fixture.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            placed = report.placed.len(),
            staked = report.total_staked(),
            value_bets = report.value_bets,
            skipped = report.skipped.len(),
            rejected = report.rejected,
            "stake batch finished"
        );
        Ok(report)
    }

    async fn stake_fixture(
        &self,
        fixture: &MatchFixture,
        params: &ModelParameters,
    ) -> Result<FixtureOutcome> {
        let history = self
            .history
            .league_history(&fixture.league, fixture.kickoff)
            .await?;
        let (home, away) = self.extractor.fixture_snapshots(fixture, &history)?;
        let prediction = self.predictor.predict(&fixture.id, &home, &away, params);
        debug!(
            fixture = %fixture,
            lambda_home = prediction.expected_goals.home,
            lambda_away = prediction.expected_goals.away,
            "prediction ready"
        );

        let snapshot = self.odds.snapshot(fixture).await?;
        let mut quotes = snapshot.quotes;
        let cfg = self.detector.config();
        if cfg.community_fallback && !quotes.iter().any(|q| q.market == MarketKind::MatchResult) {
            if let Some(votes) = &snapshot.community {
                let synthetic = community_quotes(&fixture.id, votes, cfg, Utc::now());
                if !synthetic.is_empty() {
                    debug!(fixture = %fixture.id, votes = votes.total(), "using community quotes");
                }
                quotes.extend(synthetic);
            }
        }

        let value_bets = self.detector.detect(&prediction, &quotes);
        let summary = self.executor.place_all(fixture, &value_bets).await?;
        Ok(FixtureOutcome {
            value_bets: value_bets.len(),
            placed: summary.placed,
            duplicates: summary.duplicates,
            rejected: summary.rejected,
        })
    }

    /// Settle what can be settled, then learn from every settled bet not
    /// yet consumed. One bet failing to settle never aborts the batch. A
    /// learning failure is returned after settlements have been persisted;
    /// the unlearned bets stay queued.
    pub async fn verify_and_learn(&self) -> Result<VerifyReport> {
        let pending = self.ledger.list_pending().await?;
        info!(pending = pending.len(), "verify batch started");

        let resolutions = join_all(pending.iter().map(|bet| self.resolve_bet(bet))).await;

        let mut report = VerifyReport::default();
        for (bet, resolution) in pending.iter().zip(resolutions) {
            match resolution {
                Ok(Resolution::Settled(bet)) => report.settled.push(bet),
                Ok(Resolution::AlreadySettled) => report.already_settled += 1,
                Ok(Resolution::Pending) => report.still_pending += 1,
                Ok(Resolution::Unavailable) => report.unavailable += 1,
                Err(e) => {
                    warn!(bet_id = %bet.id, fixture = %bet.fixture.id, error = %e, "bet not settled");
                    report.failed.push((bet.id.clone(), e.to_string()));
                }
            }
        }

        let claimed = self.ledger.claim_unlearned().await?;
        if !claimed.is_empty() {
            let ids: Vec<_> = claimed.iter().map(|b| b.id.clone()).collect();
            match self.learn_claimed(&claimed, &ids).await {
                Ok(version) => {
                    report.new_version = version;
                    report.learned_bets = ids.len();
                }
                Err(e) => {
                    self.ledger.release_claims(&ids).await?;
                    return Err(e);
                }
            }
        }

        info!(
            settled = report.settled.len(),
            still_pending = report.still_pending,
            unavailable = report.unavailable,
            already_settled = report.already_settled,
            failed = report.failed.len(),
            learned = report.learned_bets,
            new_version = ?report.new_version,
            "verify batch finished"
        );
        Ok(report)
    }

    /// Learn from a claimed batch and mark it; the new version, if any
    async fn learn_claimed(&self, batch: &[BetRecord], ids: &[BetId]) -> Result<Option<u64>> {
        match self.learner.learn(batch, self.parameters.as_ref()).await? {
            LearningResult::Appended { parameters, .. } => {
                self.ledger.mark_learned(ids, parameters.version).await?;
                Ok(Some(parameters.version))
            }
            LearningResult::Skipped { .. } => {
                let latest = self.parameters.latest().await?;
                self.ledger.mark_learned(ids, latest.version).await?;
                Ok(None)
            }
        }
    }

    async fn resolve_bet(&self, bet: &BetRecord) -> Result<Resolution> {
        let outcome = match self.results.final_result(&bet.fixture).await {
            Ok(o) => o,
            Err(e) => {
                warn!(bet_id = %bet.id, fixture = %bet.fixture.id, error = %e, "result unavailable");
                return Ok(Resolution::Unavailable);
            }
        };
        match self.verifier.verify(bet, outcome).await {
            Ok(Verification::Settled(b)) => Ok(Resolution::Settled(b)),
            Ok(Verification::AlreadySettled(_)) => Ok(Resolution::AlreadySettled),
            Err(EngineError::SettlementAmbiguous { .. }) => {
                debug!(bet_id = %bet.id, "fixture not finished, bet stays pending");
                Ok(Resolution::Pending)
            }
            Err(e) => Err(e),
        }
    }
}
