//! Persistence Module
//!
//! Bet ledger and parameter history ports with local implementations,
//! plus the CSV settlement journal used for offline analysis.

pub mod ledger;
pub mod parameters;

pub use ledger::{BetLedger, CreateOutcome, LocalBetLedger, StatusUpdate};
pub use parameters::{rollback_to, LocalParameterStore, ParameterStore};

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;
use crate::types::BetRecord;

pub const LEDGER_FILE: &str = "bets.json";
pub const PARAMETERS_FILE: &str = "parameters.jsonl";
pub const JOURNAL_FILE: &str = "settlements.csv";

/// One settled bet, flattened for CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRow {
    pub settled_at: i64,
    pub bet_id: String,
    pub fixture_id: String,
    pub home: String,
    pub away: String,
    pub market: String,
    pub selection: String,
    pub odds: f64,
    pub stake: f64,
    pub predicted_probability: f64,
    pub edge: f64,
    pub parameter_version: u64,
    pub final_score: String,
    pub status: String,
    pub payout: f64,
    pub pnl: f64,
}

impl From<&BetRecord> for SettlementRow {
    fn from(bet: &BetRecord) -> Self {
        let payout = bet.payout.unwrap_or(0.0);
        Self {
            settled_at: bet.settled_at.map(|t| t.timestamp()).unwrap_or_default(),
            bet_id: bet.id.to_string(),
            fixture_id: bet.fixture.id.to_string(),
            home: bet.fixture.home.to_string(),
            away: bet.fixture.away.to_string(),
            market: bet.market.to_string(),
            selection: bet.selection.to_string(),
            odds: bet.odds,
            stake: bet.stake,
            predicted_probability: bet.predicted_probability,
            edge: bet.edge,
            parameter_version: bet.parameter_version,
            final_score: bet
                .final_score
                .map(|s| s.to_string())
                .unwrap_or_default(),
            status: bet.status.to_string(),
            payout,
            pnl: payout - bet.stake,
        }
    }
}

/// Append-only CSV of settlements (header written once per file)
pub struct SettlementJournal {
    path: PathBuf,
    writer: RwLock<csv::Writer<fs::File>>,
}

impl SettlementJournal {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let writer = Self::create_writer(&path)?;
        info!(path = %path.display(), "settlement journal ready");
        Ok(Self {
            path,
            writer: RwLock::new(writer),
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(path)?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    pub async fn record(&self, bet: &BetRecord) -> Result<()> {
        let mut writer = self.writer.write().await;
        writer.serialize(SettlementRow::from(bet))?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every journaled settlement back
    pub fn load(&self) -> Result<Vec<SettlementRow>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }
}
