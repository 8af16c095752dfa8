//! Learning updater - reentrenamiento a partir de apuestas liquidadas
//!
//! Each settled bet is re-priced under the current parameters and graded
//! with a proper scoring rule (voids excluded). The batch mean loss is
//! differentiated numerically with respect to the calibration factors and
//! one bounded, decaying step is taken:
//!
//!   η = initial_step / (1 + observed_bets / decay_horizon_bets)
//!   Δθ_i = clip(-η · ∂L/∂θ_i, ±max_step)
//!
//! The result is appended as a new version; nothing is mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::LearningConfig;
use crate::error::{EngineError, Result};
use crate::ml_engine::calibration::ModelParameters;
use crate::ml_engine::predictor::PoissonPredictor;
use crate::persistence::ParameterStore;
use crate::types::{BetRecord, BetStatus};

/// Relative perturbation for central differences
const FD_REL_STEP: f64 = 1e-4;

/// Diagnostics for one proposed update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Bets graded (won or lost)
    pub scored: usize,
    /// Void bets left out of the loss
    pub voids: usize,
    pub loss_before: f64,
    pub loss_after: f64,
    pub step: f64,
    pub gradient: [f64; 4],
    pub adjustment: [f64; 4],
}

/// What a learning call did
#[derive(Debug, Clone, PartialEq)]
pub enum LearningResult {
    /// No gradable bets; no version written
    Skipped { voids: usize },
    Appended {
        parameters: ModelParameters,
        summary: BatchSummary,
    },
}

#[derive(Debug, Clone)]
pub struct LearningUpdater {
    config: LearningConfig,
    predictor: PoissonPredictor,
}

impl LearningUpdater {
    pub fn new(config: LearningConfig, predictor: PoissonPredictor) -> Self {
        Self { config, predictor }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Decaying step size for the given history length
    pub fn step_size(&self, observed_bets: u64) -> f64 {
        self.config.initial_step
            / (1.0 + observed_bets as f64 / self.config.decay_horizon_bets.max(f64::EPSILON))
    }

    /// Mean loss of the gradable bets under `params`, with the count used
    pub fn batch_loss(&self, batch: &[BetRecord], params: &ModelParameters) -> Option<(f64, usize)> {
        let mut total = 0.0;
        let mut n = 0usize;
        for bet in batch {
            let happened = match bet.status {
                BetStatus::Won => true,
                BetStatus::Lost => false,
                BetStatus::Void | BetStatus::Pending => continue,
            };
            let p = self
                .predictor
                .probability(&bet.matchup, params, &bet.market, &bet.selection);
            total += self.config.scoring_rule.score(p, happened);
            n += 1;
        }
        (n > 0).then(|| (total / n as f64, n))
    }

    /// Pure proposal of the next version derived from `current`.
    /// `None` when the batch holds nothing gradable.
    pub fn propose(
        &self,
        batch: &[BetRecord],
        current: &ModelParameters,
        at: DateTime<Utc>,
    ) -> Option<(ModelParameters, BatchSummary)> {
        let (loss_before, scored) = self.batch_loss(batch, current)?;
        let voids = batch
            .iter()
            .filter(|b| b.status == BetStatus::Void)
            .count();

        let factors = current.factors();
        let mut gradient = [0.0; 4];
        for (i, g) in gradient.iter_mut().enumerate() {
            let h = FD_REL_STEP * factors[i].abs().max(1.0);
            let up = self.loss_at(batch, current, i, h);
            let down = self.loss_at(batch, current, i, -h);
            *g = (up - down) / (2.0 * h);
        }

        let step = self.step_size(current.observed_bets);
        let max_step = self.config.max_step.abs();
        let mut adjustment = [0.0; 4];
        let mut next_factors = factors;
        for i in 0..4 {
            adjustment[i] = (-step * gradient[i]).clamp(-max_step, max_step);
            next_factors[i] += adjustment[i];
        }

        let next = current.successor(next_factors, scored as u64, loss_before, at);
        let loss_after = self
            .batch_loss(batch, &next)
            .map(|(l, _)| l)
            .unwrap_or(loss_before);

        Some((
            next,
            BatchSummary {
                scored,
                voids,
                loss_before,
                loss_after,
                step,
                gradient,
                adjustment,
            },
        ))
    }

    /// Propose against the latest version and append it, re-reading and
    /// retrying on a stale base up to `max_retries` attempts
    pub async fn learn(
        &self,
        batch: &[BetRecord],
        store: &dyn ParameterStore,
    ) -> Result<LearningResult> {
        let attempts = self.config.max_retries.max(1);
        let mut last_conflict = (0u64, 0u64);

        for attempt in 1..=attempts {
            let current = store.latest().await?;
            let Some((next, summary)) = self.propose(batch, &current, Utc::now()) else {
                let voids = batch
                    .iter()
                    .filter(|b| b.status == BetStatus::Void)
                    .count();
                info!(bets = batch.len(), voids, "no gradable bets, parameters unchanged");
                return Ok(LearningResult::Skipped { voids });
            };

            match store.append(current.version, next).await {
                Ok(stored) => {
                    info!(
                        version = stored.version,
                        parent = current.version,
                        scored = summary.scored,
                        voids = summary.voids,
                        loss_before = summary.loss_before,
                        loss_after = summary.loss_after,
                        step = summary.step,
                        "model parameters updated: {}",
                        stored
                    );
                    return Ok(LearningResult::Appended {
                        parameters: stored,
                        summary,
                    });
                }
                Err(EngineError::ParameterUpdateConflict {
                    base_version,
                    latest_version,
                    ..
                }) => {
                    warn!(
                        attempt,
                        max = attempts,
                        base_version,
                        latest_version,
                        "parameter version moved underneath learning batch, retrying"
                    );
                    last_conflict = (base_version, latest_version);
                }
                Err(e) => return Err(e),
            }
        }

        error!(
            attempts,
            base_version = last_conflict.0,
            latest_version = last_conflict.1,
            bets = batch.len(),
            "ALERT: learning cycle failed, parameter updates kept conflicting"
        );
        Err(EngineError::ParameterUpdateConflict {
            base_version: last_conflict.0,
            latest_version: last_conflict.1,
            attempts,
        })
    }

    fn loss_at(&self, batch: &[BetRecord], base: &ModelParameters, index: usize, delta: f64) -> f64 {
        let mut p = base.clone();
        match index {
            0 => p.home_advantage += delta,
            1 => p.attack_weight += delta,
            2 => p.defense_weight += delta,
            _ => p.confidence_weight += delta,
        }
        self.batch_loss(batch, &p).map(|(l, _)| l).unwrap_or(0.0)
    }
}
