//! Append-only ModelParameters history
//!
//! There is no mutable "current" parameter object, only the latest
//! version. An append names the version it was derived from and fails
//! with `ParameterUpdateConflict` when that is no longer the latest.
//!
//! Appenders queue on a writer lock and write the file before publishing;
//! readers only wait for the in-memory push.

use async_trait::async_trait;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::ml_engine::calibration::ModelParameters;

#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn latest(&self) -> Result<ModelParameters>;

    /// Append `next` on top of `base_version`. The stored record gets
    /// version `base_version + 1` and parent `base_version`.
    async fn append(&self, base_version: u64, next: ModelParameters) -> Result<ModelParameters>;

    async fn get(&self, version: u64) -> Result<Option<ModelParameters>>;

    async fn history(&self) -> Result<Vec<ModelParameters>>;
}

/// Re-append the factors of an earlier version as the new latest version.
/// Nothing in the history is rewritten.
pub async fn rollback_to(store: &dyn ParameterStore, version: u64) -> Result<ModelParameters> {
    let target = store
        .get(version)
        .await?
        .ok_or_else(|| EngineError::Persistence(format!("parameter version {} not found", version)))?;
    let latest = store.latest().await?;

    let restored = ModelParameters {
        version: latest.version + 1,
        parent_version: Some(latest.version),
        updated_at: Utc::now(),
        observed_bets: latest.observed_bets,
        batch_loss: None,
        ..target
    };
    let stored = store.append(latest.version, restored).await?;
    warn!(
        restored_from = version,
        new_version = stored.version,
        "model parameters rolled back"
    );
    Ok(stored)
}

/// Parameter history kept in memory, optionally mirrored to a JSON-lines
/// file (one version per line, append only).
pub struct LocalParameterStore {
    versions: RwLock<Vec<ModelParameters>>,
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

impl LocalParameterStore {
    /// Store seeded with `genesis`
    pub fn in_memory(genesis: ModelParameters) -> Self {
        Self {
            versions: RwLock::new(vec![genesis]),
            writer: Mutex::new(()),
            path: None,
        }
    }

    /// Open a history file, seeding it with `genesis` when empty
    pub fn open(path: impl AsRef<Path>, genesis: ModelParameters) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut versions = Vec::new();
        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                versions.push(serde_json::from_str::<ModelParameters>(line)?);
            }
        }

        if versions.is_empty() {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{}", serde_json::to_string(&genesis)?)?;
            file.sync_all()?;
            versions.push(genesis);
        }
        for pair in versions.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(EngineError::Persistence(format!(
                    "{}: versions out of order ({} after {})",
                    path.display(),
                    pair[1].version,
                    pair[0].version
                )));
            }
        }

        info!(
            path = %path.display(),
            versions = versions.len(),
            "parameter history loaded"
        );
        Ok(Self {
            versions: RwLock::new(versions),
            writer: Mutex::new(()),
            path: Some(path),
        })
    }

    async fn write_line(&self, params: &ModelParameters) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut line = serde_json::to_string(params)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl ParameterStore for LocalParameterStore {
    async fn latest(&self) -> Result<ModelParameters> {
        self.versions
            .read()
            .await
            .last()
            .cloned()
            .ok_or_else(|| EngineError::Persistence("parameter history is empty".into()))
    }

    async fn append(&self, base_version: u64, next: ModelParameters) -> Result<ModelParameters> {
        let _writer = self.writer.lock().await;
        let latest_version = self
            .versions
            .read()
            .await
            .last()
            .map(|p| p.version)
            .unwrap_or(0);
        if latest_version != base_version {
            return Err(EngineError::ParameterUpdateConflict {
                base_version,
                latest_version,
                attempts: 1,
            });
        }

        let stored = ModelParameters {
            version: base_version + 1,
            parent_version: Some(base_version),
            ..next
        };
        self.write_line(&stored).await?;
        self.versions.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, version: u64) -> Result<Option<ModelParameters>> {
        Ok(self
            .versions
            .read()
            .await
            .iter()
            .find(|p| p.version == version)
            .cloned())
    }

    async fn history(&self) -> Result<Vec<ModelParameters>> {
        Ok(self.versions.read().await.clone())
    }
}
