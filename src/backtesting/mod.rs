//! Backtesting Module
//!
//! Tools for judging the engine on settled bets and on history:
//! - Performance metrics over any set of bets (ROI, drawdown, calibration)
//! - Historical replay against closing 1X2 odds with periodic retraining
//! - Monte Carlo bankroll simulation (`simulation`)

pub mod simulation;

pub use simulation::{MonteCarloConfig, MonteCarloResult, MonteCarloSimulator};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::betting::{AutoBetExecutor, OutcomeVerifier, ValueDetector, Verification};
use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::features::FeatureExtractor;
use crate::ml_engine::calibration::{brier, expected_calibration_error, log_loss, ModelParameters};
use crate::ml_engine::{LearningResult, LearningUpdater, PoissonPredictor};
use crate::persistence::{
    BetLedger, LocalBetLedger, LocalParameterStore, ParameterStore, SettlementRow,
};
use crate::risk::RiskManager;
use crate::types::{
    BetRecord, BetStatus, HistoricalMatch, MarketKind, MarketQuote, MatchFixture, MatchOutcome,
    Selection,
};

/// Provider name on quotes built from historical closing prices
pub const CLOSING_PROVIDER: &str = "closing";

const CALIBRATION_BINS: usize = 10;

/// Performance metrics over settled bets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Bets considered, any status
    pub total_bets: usize,
    pub settled: usize,
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    pub voids: usize,
    /// Total stake over settled bets
    pub staked: f64,
    pub profit: f64,
    /// profit / staked
    pub roi: f64,
    /// wins / (wins + losses)
    pub win_rate: f64,
    /// Gross profit / gross loss
    pub profit_factor: f64,
    /// Largest peak-to-trough fall of the equity curve, as a fraction
    pub max_drawdown: f64,
    /// Mean over standard deviation of per-bet returns (pnl / stake)
    pub sharpe_ratio: f64,
    pub avg_edge: f64,
    /// Mean Brier score on won/lost bets
    pub brier: f64,
    /// Mean log-loss on won/lost bets
    pub log_loss: f64,
    pub calibration_error: f64,
    /// Mean log-loss of the most recent graded bets
    pub recent_log_loss: Option<f64>,
}

impl PerformanceMetrics {
    /// Metrics over `bets`, with the equity curve starting at
    /// `initial_capital` and following settlement order.
    pub fn from_bets(bets: &[BetRecord], initial_capital: f64, recent_window: usize) -> Self {
        let mut settled: Vec<&BetRecord> = bets.iter().filter(|b| b.status.is_terminal()).collect();
        settled.sort_by(|a, b| {
            a.settled_at
                .cmp(&b.settled_at)
                .then(a.placed_at.cmp(&b.placed_at))
        });

        let mut metrics = PerformanceMetrics {
            total_bets: bets.len(),
            settled: settled.len(),
            pending: bets.iter().filter(|b| b.is_open()).count(),
            ..Default::default()
        };
        if settled.is_empty() {
            return metrics;
        }

        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut equity = initial_capital;
        let mut peak = initial_capital;
        let mut returns = Vec::with_capacity(settled.len());

        for bet in &settled {
            match bet.status {
                BetStatus::Won => metrics.wins += 1,
                BetStatus::Lost => metrics.losses += 1,
                BetStatus::Void => metrics.voids += 1,
                BetStatus::Pending => {}
            }
            let pnl = bet.pnl().unwrap_or(0.0);
            metrics.staked += bet.stake;
            metrics.profit += pnl;
            if pnl > 0.0 {
                gross_profit += pnl;
            } else {
                gross_loss += -pnl;
            }
            if bet.stake > 0.0 {
                returns.push(pnl / bet.stake);
            }

            equity += pnl;
            peak = peak.max(equity);
            if peak > 0.0 {
                metrics.max_drawdown = metrics.max_drawdown.max((peak - equity) / peak);
            }
        }

        metrics.roi = if metrics.staked > 0.0 {
            metrics.profit / metrics.staked
        } else {
            0.0
        };
        let decided = metrics.wins + metrics.losses;
        metrics.win_rate = if decided > 0 {
            metrics.wins as f64 / decided as f64
        } else {
            0.0
        };
        metrics.profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        metrics.sharpe_ratio = sharpe(&returns);
        metrics.avg_edge = settled.iter().map(|b| b.edge).sum::<f64>() / settled.len() as f64;

        let graded: Vec<(f64, bool)> = settled
            .iter()
            .filter(|b| b.status != BetStatus::Void)
            .map(|b| (b.predicted_probability, b.status == BetStatus::Won))
            .collect();
        if !graded.is_empty() {
            let n = graded.len() as f64;
            metrics.brier = graded.iter().map(|&(p, w)| brier(p, w)).sum::<f64>() / n;
            metrics.log_loss = graded.iter().map(|&(p, w)| log_loss(p, w)).sum::<f64>() / n;
            let (preds, outcomes): (Vec<f64>, Vec<bool>) = graded.iter().copied().unzip();
            metrics.calibration_error =
                expected_calibration_error(&preds, &outcomes, CALIBRATION_BINS);

            if recent_window > 0 {
                let recent = &graded[graded.len().saturating_sub(recent_window)..];
                metrics.recent_log_loss = Some(
                    recent.iter().map(|&(p, w)| log_loss(p, w)).sum::<f64>()
                        / recent.len() as f64,
                );
            }
        }
        metrics
    }
}

/// Mean over population standard deviation; 0 when flat
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

/// Replay configuration
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Retrain after this many newly settled bets (0 disables learning)
    pub retrain_every: usize,
    /// Window of the recent log-loss metric
    pub recent_window: usize,
    /// How long before kickoff the closing quotes are stamped
    pub quote_lead: Duration,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            retrain_every: 20,
            recent_window: 50,
            quote_lead: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub metrics: PerformanceMetrics,
    /// Every bet placed during the replay, settled
    pub bets: Vec<BetRecord>,
    /// Matches carrying closing odds
    pub fixtures_evaluated: usize,
    /// Matches skipped for missing history
    pub fixtures_skipped: usize,
    pub initial_version: u64,
    pub final_parameters: ModelParameters,
}

impl BacktestReport {
    /// Settled bets as settlement-journal CSV
    pub fn export_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for bet in &self.bets {
            writer.serialize(SettlementRow::from(bet))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Historical replay: walk matches in kickoff order, predict each from
/// strictly earlier matches, bet the closing prices, settle on the
/// recorded score and retrain every `retrain_every` settled bets.
pub struct Backtester {
    app: AppConfig,
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(app: AppConfig, config: BacktestConfig) -> Self {
        Self { app, config }
    }

    /// Replay `history` starting from `genesis`. Runs on private
    /// in-memory stores; nothing touches the live ledger.
    pub async fn run(
        &self,
        history: &[HistoricalMatch],
        genesis: ModelParameters,
    ) -> Result<BacktestReport> {
        let mut matches: Vec<&HistoricalMatch> = history.iter().collect();
        matches.sort_by(|a, b| {
            a.played_at
                .cmp(&b.played_at)
                .then(a.fixture_id.cmp(&b.fixture_id))
        });

        let ledger: Arc<dyn BetLedger> = Arc::new(LocalBetLedger::in_memory());
        let store = LocalParameterStore::in_memory(genesis.clone());
        let extractor = FeatureExtractor::new(self.app.features.clone());
        let predictor = PoissonPredictor::new(self.app.prediction.clone());
        let detector = ValueDetector::new(self.app.value.clone());
        let executor =
            AutoBetExecutor::new(RiskManager::new(self.app.staking.clone()), ledger.clone());
        let verifier = OutcomeVerifier::new(ledger.clone());
        let learner = LearningUpdater::new(self.app.learning.clone(), predictor.clone());

        let mut evaluated = 0;
        let mut skipped = 0;
        let mut since_training = 0;

        for m in &matches {
            let Some(closing) = m.closing_odds else {
                continue;
            };
            evaluated += 1;

            let fixture = MatchFixture {
                id: m.fixture_id.clone(),
                home: m.home.clone(),
                away: m.away.clone(),
                kickoff: m.played_at,
                league: m.league.clone(),
            };
            let (home, away) = match extractor.fixture_snapshots(&fixture, history) {
                Ok(s) => s,
                Err(e) => {
                    debug!(fixture = %fixture.id, error = %e, "replay skip");
                    skipped += 1;
                    continue;
                }
            };

            let params = store.latest().await?;
            let prediction = predictor.predict(&fixture.id, &home, &away, &params);
            let quoted_at = m.played_at - self.config.quote_lead;
            let quotes: Vec<MarketQuote> = [
                (Selection::Home, closing.home),
                (Selection::Draw, closing.draw),
                (Selection::Away, closing.away),
            ]
            .into_iter()
            .map(|(selection, odds)| MarketQuote {
                fixture_id: fixture.id.clone(),
                provider: CLOSING_PROVIDER.to_string(),
                market: MarketKind::MatchResult,
                selection,
                odds,
                quoted_at,
            })
            .collect();

            let candidates = detector.detect(&prediction, &quotes);
            if candidates.is_empty() {
                continue;
            }
            executor.sync_bankroll().await?;
            let summary = executor.place_all(&fixture, &candidates).await?;

            for bet in &summary.placed {
                if let Verification::Settled(_) =
                    verifier.verify(bet, MatchOutcome::Final(m.score())).await?
                {
                    since_training += 1;
                }
            }

            if self.config.retrain_every > 0 && since_training >= self.config.retrain_every {
                self.retrain(&learner, ledger.as_ref(), &store).await?;
                since_training = 0;
            }
        }

        if self.config.retrain_every > 0 && since_training > 0 {
            self.retrain(&learner, ledger.as_ref(), &store).await?;
        }

        let bets = ledger.list_all().await?;
        let metrics = PerformanceMetrics::from_bets(
            &bets,
            self.app.staking.initial_capital,
            self.config.recent_window,
        );
        let final_parameters = store.latest().await?;

        info!(
            evaluated,
            skipped,
            bets = bets.len(),
            roi = metrics.roi,
            profit = metrics.profit,
            log_loss = metrics.log_loss,
            version = final_parameters.version,
            "backtest finished"
        );

        Ok(BacktestReport {
            metrics,
            bets,
            fixtures_evaluated: evaluated,
            fixtures_skipped: skipped,
            initial_version: genesis.version,
            final_parameters,
        })
    }

    async fn retrain(
        &self,
        learner: &LearningUpdater,
        ledger: &dyn BetLedger,
        store: &LocalParameterStore,
    ) -> Result<()> {
        let batch = ledger.list_unlearned().await?;
        if batch.is_empty() {
            return Ok(());
        }
        let ids: Vec<_> = batch.iter().map(|b| b.id.clone()).collect();
        let version = match learner.learn(&batch, store).await? {
            LearningResult::Appended { parameters, summary } => {
                debug!(
                    version = parameters.version,
                    loss_before = summary.loss_before,
                    loss_after = summary.loss_after,
                    "replay retrained"
                );
                parameters.version
            }
            LearningResult::Skipped { voids } => {
                warn!(voids, "replay batch had nothing to learn from");
                store.latest().await?.version
            }
        };
        ledger.mark_learned(&ids, version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BetId, FinalScore, FixtureId, MatchupFeatures, TeamId,
    };
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn bet(day: u32, stake: f64, odds: f64, p: f64, status: BetStatus) -> BetRecord {
        let payout = match status {
            BetStatus::Won => Some(stake * odds),
            BetStatus::Void => Some(stake),
            BetStatus::Lost => Some(0.0),
            BetStatus::Pending => None,
        };
        BetRecord {
            id: BetId::generate(),
            fixture: MatchFixture {
                id: FixtureId::new(format!("f{day}")),
                home: TeamId::new("H"),
                away: TeamId::new("A"),
                kickoff: at(day),
                league: "L".into(),
            },
            market: MarketKind::MatchResult,
            selection: Selection::Home,
            stake,
            odds,
            quote_provider: "book".into(),
            quoted_at: at(day),
            predicted_probability: p,
            edge: p * odds - 1.0,
            parameter_version: 1,
            matchup: MatchupFeatures {
                base_goals: 1.3,
                home_attack: 1.0,
                home_defense: 1.0,
                away_attack: 1.0,
                away_defense: 1.0,
                home_samples: 10,
                away_samples: 10,
            },
            placed_at: at(day),
            status,
            settled_at: (status != BetStatus::Pending).then(|| at(day)),
            final_score: None,
            payout,
            learned_in_version: None,
        }
    }

    #[test]
    fn test_metrics_empty() {
        let metrics = PerformanceMetrics::from_bets(&[], 1000.0, 10);
        assert_eq!(metrics.settled, 0);
        assert_eq!(metrics.roi, 0.0);
        assert!(metrics.recent_log_loss.is_none());
    }

    #[test]
    fn test_metrics_mixed_results() {
        let bets = vec![
            bet(1, 10.0, 2.0, 0.6, BetStatus::Won),   // +10
            bet(2, 10.0, 2.0, 0.6, BetStatus::Lost),  // -10
            bet(3, 10.0, 2.0, 0.6, BetStatus::Lost),  // -10
            bet(4, 10.0, 3.0, 0.4, BetStatus::Won),   // +20
            bet(5, 10.0, 2.0, 0.5, BetStatus::Void),  // 0
            bet(6, 10.0, 2.0, 0.5, BetStatus::Pending),
        ];
        let m = PerformanceMetrics::from_bets(&bets, 100.0, 2);

        assert_eq!(m.total_bets, 6);
        assert_eq!(m.settled, 5);
        assert_eq!(m.pending, 1);
        assert_eq!((m.wins, m.losses, m.voids), (2, 2, 1));
        assert!((m.staked - 50.0).abs() < 1e-9);
        assert!((m.profit - 10.0).abs() < 1e-9);
        assert!((m.roi - 0.2).abs() < 1e-9);
        assert!((m.win_rate - 0.5).abs() < 1e-9);
        assert!((m.profit_factor - 1.5).abs() < 1e-9);
        // Peak 110 after bet 1, trough 90 after bet 3
        assert!((m.max_drawdown - 20.0 / 110.0).abs() < 1e-9);

        // Recent window covers the last two graded bets (3 and 4)
        let expected = (log_loss(0.6, false) + log_loss(0.4, true)) / 2.0;
        assert!((m.recent_log_loss.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_profit_factor_without_losses() {
        let m = PerformanceMetrics::from_bets(&[bet(1, 5.0, 2.5, 0.5, BetStatus::Won)], 100.0, 0);
        assert!(m.profit_factor.is_infinite());
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn test_sharpe_flat_returns() {
        assert_eq!(sharpe(&[0.5, 0.5, 0.5]), 0.0);
        assert_eq!(sharpe(&[1.0]), 0.0);
        assert!(sharpe(&[1.0, -1.0, 1.0]) > 0.0);
    }

    fn league_history() -> Vec<HistoricalMatch> {
        // STR beats everyone at home, WEA loses everywhere; the closing
        // price on STR stays generous.
        let mut out = Vec::new();
        let others = ["B", "C", "D", "E"];
        for round in 0..12u32 {
            let played_at = Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap()
                + Duration::days(7 * round as i64);
            let opp = others[(round as usize) % others.len()];
            out.push(HistoricalMatch {
                fixture_id: FixtureId::new(format!("s{round}")),
                league: "L".into(),
                played_at,
                home: TeamId::new("STR"),
                away: TeamId::new(opp),
                home_goals: 3,
                away_goals: 0,
                closing_odds: Some(crate::types::ClosingOdds {
                    home: 2.2,
                    draw: 3.4,
                    away: 3.6,
                }),
            });
            out.push(HistoricalMatch {
                fixture_id: FixtureId::new(format!("w{round}")),
                league: "L".into(),
                played_at: played_at + Duration::hours(2),
                home: TeamId::new(opp),
                away: TeamId::new("WEA"),
                home_goals: 1,
                away_goals: 1,
                closing_odds: None,
            });
        }
        out
    }

    #[tokio::test]
    async fn test_replay_bets_only_with_prior_history() {
        let mut app = AppConfig::default();
        app.staking.policy = crate::config::StakingPolicy::Flat;
        app.staking.flat_stake = 10.0;
        app.value.min_sample_size = 3;
        let genesis = ModelParameters::genesis(&app.learning);

        let backtester = Backtester::new(
            app,
            BacktestConfig {
                retrain_every: 3,
                ..Default::default()
            },
        );
        let report = backtester.run(&league_history(), genesis).await.unwrap();

        assert_eq!(report.fixtures_evaluated, 12);
        // First STR match has no history at all
        assert!(report.fixtures_skipped >= 1);
        assert!(!report.bets.is_empty());
        assert!(report.bets.iter().all(|b| b.status.is_terminal()));
        assert!(report.bets.iter().all(|b| b.final_score == Some(FinalScore::new(3, 0))));
        assert!(report.metrics.profit > 0.0);
        assert!(report.final_parameters.version > report.initial_version);
        assert!(report.export_csv().unwrap().starts_with("settled_at,bet_id"));
    }
}
