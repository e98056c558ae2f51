//! Cells, training runs, and the cell lifecycle state machine.
//!
//! Lifecycle edges:
//!
//! ```text
//! pending  -> approved                   (manual approve)
//! approved -> pending                    (any edit, manual reject)
//! {pending, approved} -> executing -> {executed, error, rejected}
//! any -> deleted                         (removed from the run)
//! ```
//!
//! All mutation goes through the methods here so the edges above are the
//! only reachable transitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Pending,
    Approved,
    Executing,
    Executed,
    Error,
    Rejected,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Error => "error",
            Self::Rejected => "rejected",
        }
    }
}

/// The smallest executable (code) or display-only (markdown) unit of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub cell_id: Uuid,
    #[serde(rename = "type")]
    pub cell_type: CellType,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub output: String,
    pub status: CellStatus,
    pub approved: bool,
    #[serde(default)]
    pub rejection_reason: String,
}

impl Cell {
    /// Fresh cell: empty code and output, pending, not approved.
    pub fn new(cell_type: CellType) -> Self {
        Self {
            cell_id: Uuid::new_v4(),
            cell_type,
            code: String::new(),
            output: String::new(),
            status: CellStatus::Pending,
            approved: false,
            rejection_reason: String::new(),
        }
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// Unconditional reset on edit: whatever the prior status, new code must
    /// never be shown against stale output or a stale approval.
    pub fn set_code(&mut self, new_code: String) {
        self.code = new_code;
        self.status = CellStatus::Pending;
        self.output.clear();
        self.approved = false;
        self.rejection_reason.clear();
    }

    /// Manual approval by a reviewer.
    pub fn approve(&mut self) {
        self.approved = true;
        self.status = CellStatus::Approved;
        self.rejection_reason.clear();
    }

    /// Manual rejection with a reason; the cell falls back to pending.
    pub fn reject(&mut self, reason: String) {
        self.approved = false;
        self.status = CellStatus::Pending;
        self.rejection_reason = reason;
    }

    /// True while a manual rejection is standing against the current code.
    pub fn is_manually_rejected(&self) -> bool {
        !self.approved && !self.rejection_reason.is_empty()
    }
}

/// One collaborative training run: the ordered notebook plus the on-disk
/// folder the interpreter is rooted in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub session_name: String,
    pub cells: Vec<Cell>,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TrainingRun {
    pub fn new(
        run_id: impl Into<String>,
        session_name: impl Into<String>,
        working_directory: PathBuf,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_name: session_name.into(),
            cells: Vec::new(),
            working_directory,
            files: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn cell(&self, cell_id: Uuid) -> Option<&Cell> {
        self.cells.iter().find(|c| c.cell_id == cell_id)
    }

    pub fn cell_mut(&mut self, cell_id: Uuid) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.cell_id == cell_id)
    }

    /// Append a fresh cell and return it.
    pub fn add_cell(&mut self, cell_type: CellType) -> &Cell {
        self.cells.push(Cell::new(cell_type));
        self.cells.last().expect("cell was just pushed")
    }

    /// Remove a cell. Returns false when the id is unknown.
    pub fn remove_cell(&mut self, cell_id: Uuid) -> bool {
        let before = self.cells.len();
        self.cells.retain(|c| c.cell_id != cell_id);
        self.cells.len() < before
    }
}
