//! Bet ledger - durable store of placed bets
//!
//! `create` is atomic create-if-absent on the (fixture, market) key: a
//! second open bet on the same key is never written. Status moves once,
//! from `Pending` to a terminal state. A settled bet is handed to at most
//! one learning batch at a time through `claim_unlearned`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::types::{BetId, BetKey, BetRecord, BetStatus, FinalScore};

/// Result of a create-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(BetRecord),
    /// An open bet already holds the key; nothing was written
    AlreadyOpen(BetRecord),
}

/// Terminal transition applied by the verifier
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: BetStatus,
    pub settled_at: DateTime<Utc>,
    pub final_score: FinalScore,
    pub payout: f64,
}

#[async_trait]
pub trait BetLedger: Send + Sync {
    async fn create(&self, bet: BetRecord) -> Result<CreateOutcome>;

    async fn get(&self, id: &BetId) -> Result<Option<BetRecord>>;

    /// Pending -> terminal only. Repeating the same terminal status is a
    /// no-op returning the stored record.
    async fn update_status(&self, id: &BetId, update: StatusUpdate) -> Result<BetRecord>;

    async fn list_pending(&self) -> Result<Vec<BetRecord>>;

    /// Settled bets not yet consumed by a learning batch
    async fn list_unlearned(&self) -> Result<Vec<BetRecord>>;

    /// Unlearned bets not held by another batch, claimed for the caller.
    /// Claims end with `mark_learned` or `release_claims`.
    async fn claim_unlearned(&self) -> Result<Vec<BetRecord>>;

    async fn release_claims(&self, ids: &[BetId]) -> Result<()>;

    async fn mark_learned(&self, ids: &[BetId], version: u64) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<BetRecord>>;
}

#[derive(Debug, Default)]
struct LedgerState {
    bets: HashMap<BetId, BetRecord>,
    open: HashMap<BetKey, BetId>,
    /// Held by a running learning batch; not persisted
    claimed: HashSet<BetId>,
}

impl LedgerState {
    fn from_records(records: Vec<BetRecord>) -> Self {
        let mut state = LedgerState::default();
        for bet in records {
            if bet.is_open() {
                state.open.insert(bet.key(), bet.id.clone());
            }
            state.bets.insert(bet.id.clone(), bet);
        }
        state
    }

    fn sorted(&self) -> Vec<BetRecord> {
        let mut all: Vec<BetRecord> = self.bets.values().cloned().collect();
        all.sort_by(|a, b| a.placed_at.cmp(&b.placed_at).then(a.id.cmp(&b.id)));
        all
    }
}

/// Ledger kept in memory, optionally mirrored to a JSON file.
///
/// Every mutation rewrites the file (temp file + rename) before the
/// in-memory change is made visible.
pub struct LocalBetLedger {
    state: Mutex<LedgerState>,
    path: Option<PathBuf>,
}

impl LocalBetLedger {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            path: None,
        }
    }

    /// Open (or create) a ledger file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<BetRecord> = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Vec::new()
        };

        info!(path = %path.display(), bets = records.len(), "bet ledger loaded");
        Ok(Self {
            state: Mutex::new(LedgerState::from_records(records)),
            path: Some(path),
        })
    }

    async fn flush(&self, state: &LedgerState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&state.sorted())?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl BetLedger for LocalBetLedger {
    async fn create(&self, bet: BetRecord) -> Result<CreateOutcome> {
        if !bet.market.accepts(&bet.selection) {
            return Err(EngineError::invalid_quote(format!(
                "bet {}: selection {} does not belong to market {}",
                bet.id, bet.selection, bet.market
            )));
        }
        let mut state = self.state.lock().await;
        let key = bet.key();

        if let Some(existing) = state.open.get(&key).and_then(|id| state.bets.get(id)) {
            debug!(key = %key, existing = %existing.id, "open bet already holds key");
            return Ok(CreateOutcome::AlreadyOpen(existing.clone()));
        }
        if bet.status != BetStatus::Pending {
            return Err(EngineError::InvalidTransition {
                bet_id: bet.id.to_string(),
                from: "NEW".into(),
                to: bet.status.to_string(),
            });
        }

        state.open.insert(key.clone(), bet.id.clone());
        state.bets.insert(bet.id.clone(), bet.clone());
        let flushed = self.flush(&state).await;
        if let Err(e) = flushed {
            state.open.remove(&key);
            state.bets.remove(&bet.id);
            return Err(e);
        }
        Ok(CreateOutcome::Created(bet))
    }

    async fn get(&self, id: &BetId) -> Result<Option<BetRecord>> {
        Ok(self.state.lock().await.bets.get(id).cloned())
    }

    async fn update_status(&self, id: &BetId, update: StatusUpdate) -> Result<BetRecord> {
        let mut state = self.state.lock().await;
        let current = state
            .bets
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::BetNotFound(id.to_string()))?;

        if current.status.is_terminal() || !update.status.is_terminal() {
            if current.status == update.status {
                return Ok(current);
            }
            return Err(EngineError::InvalidTransition {
                bet_id: id.to_string(),
                from: current.status.to_string(),
                to: update.status.to_string(),
            });
        }

        let mut settled = current.clone();
        settled.status = update.status;
        settled.settled_at = Some(update.settled_at);
        settled.final_score = Some(update.final_score);
        settled.payout = Some(update.payout);

        state.bets.insert(id.clone(), settled.clone());
        state.open.remove(&settled.key());
        let flushed = self.flush(&state).await;
        if let Err(e) = flushed {
            state.bets.insert(id.clone(), current.clone());
            state.open.insert(current.key(), id.clone());
            return Err(e);
        }
        Ok(settled)
    }

    async fn list_pending(&self) -> Result<Vec<BetRecord>> {
        let state = self.state.lock().await;
        Ok(state.sorted().into_iter().filter(|b| b.is_open()).collect())
    }

    async fn list_unlearned(&self) -> Result<Vec<BetRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted()
            .into_iter()
            .filter(|b| b.status.is_terminal() && b.learned_in_version.is_none())
            .collect())
    }

    async fn claim_unlearned(&self) -> Result<Vec<BetRecord>> {
        let mut state = self.state.lock().await;
        let batch: Vec<BetRecord> = state
            .sorted()
            .into_iter()
            .filter(|b| {
                b.status.is_terminal()
                    && b.learned_in_version.is_none()
                    && !state.claimed.contains(&b.id)
            })
            .collect();
        state.claimed.extend(batch.iter().map(|b| b.id.clone()));
        Ok(batch)
    }

    async fn release_claims(&self, ids: &[BetId]) -> Result<()> {
        let mut state = self.state.lock().await;
        for id in ids {
            state.claimed.remove(id);
        }
        Ok(())
    }

    async fn mark_learned(&self, ids: &[BetId], version: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let previous: Vec<(BetId, Option<u64>)> = ids
            .iter()
            .filter_map(|id| state.bets.get(id).map(|b| (id.clone(), b.learned_in_version)))
            .collect();

        for id in ids {
            if let Some(bet) = state.bets.get_mut(id) {
                if bet.status.is_terminal() && bet.learned_in_version.is_none() {
                    bet.learned_in_version = Some(version);
                }
            }
        }
        let flushed = self.flush(&state).await;
        if let Err(e) = flushed {
            for (id, prev) in previous {
                if let Some(bet) = state.bets.get_mut(&id) {
                    bet.learned_in_version = prev;
                }
            }
            return Err(e);
        }
        for id in ids {
            state.claimed.remove(id);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<BetRecord>> {
        Ok(self.state.lock().await.sorted())
    }
}
