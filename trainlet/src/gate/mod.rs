//! Execution gatekeepers.
//!
//! A gate decides, per execute attempt, whether a cell's code may reach the
//! interpreter. Verdicts are transient: they are derived fresh on every
//! attempt and invalidated the moment the cell is edited.

mod llm;
mod patterns;

use async_trait::async_trait;
use std::sync::Arc;

use crate::notebook::Cell;

pub use llm::LlmGate;
pub use patterns::PatternGate;

/// The gate's decision for one target cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected(String),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("gate request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Policy component deciding whether code may reach the interpreter.
///
/// `cells` is the full notebook in order, `target` the cell about to run, and
/// `dataset_folders` the names (never contents) of the data providers'
/// folders in the run's working directory.
#[async_trait]
pub trait Gate: Send + Sync {
    async fn evaluate(
        &self,
        cells: &[Cell],
        target: &Cell,
        dataset_folders: &[String],
    ) -> Result<Verdict, GateError>;
}

/// Gate selection, resolved once at startup.
#[derive(Debug, Clone)]
pub enum GateConfig {
    Pattern,
    Llm {
        url: String,
        auth_token: Option<String>,
    },
}

pub fn build_gate(config: &GateConfig) -> Arc<dyn Gate> {
    match config {
        GateConfig::Pattern => Arc::new(PatternGate::new()),
        GateConfig::Llm { url, auth_token } => {
            Arc::new(LlmGate::new(url.clone(), auth_token.clone()))
        }
    }
}
