//! Run persistence.
//!
//! The core only needs `load_run`/`save_run` over the run record; everything
//! else about storage is a collaborator's concern. `JsonDirStore` keeps one
//! JSON document per run under a data directory; `MemoryStore` backs tests
//! and embedded use.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::notebook::TrainingRun;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    NotFound(String),
    #[error("failed to access run record: {0}")]
    Io(#[from] std::io::Error),
    #[error("run record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load_run(&self, run_id: &str) -> Result<TrainingRun, StoreError>;
    async fn save_run(&self, run: &TrainingRun) -> Result<(), StoreError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    runs: DashMap<String, TrainingRun>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn load_run(&self, run_id: &str) -> Result<TrainingRun, StoreError> {
        self.runs
            .get(run_id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }

    async fn save_run(&self, run: &TrainingRun) -> Result<(), StoreError> {
        self.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }
}

/// One `<run_id>.json` per run under `root`. Saves go through a temp file
/// and rename so a crashed save never truncates the record.
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl RunStore for JsonDirStore {
    async fn load_run(&self, run_id: &str) -> Result<TrainingRun, StoreError> {
        let path = self.run_path(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(run_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save_run(&self, run: &TrainingRun) -> Result<(), StoreError> {
        let path = self.run_path(&run.run_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(run_id = %run.run_id, bytes = bytes.len(), "Saved run record");
        Ok(())
    }
}
