//! NotebookService: the execution coordinator.
//!
//! Owns the injected store, session registry, and gate, and drives one
//! execute request end to end: validate -> gate -> ensure session ->
//! send/await frame -> update cell. All run mutation happens here, keyed
//! behind a per-run lock so two executes on the same run can never
//! interleave their frames.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::gate::{Gate, Verdict};
use crate::notebook::{Cell, CellStatus, CellType, TrainingRun};
use crate::session::{DEFAULT_EXEC_TIMEOUT, SessionRegistry};
use crate::store::{RunStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(format!("run {id} not found")),
            other => ServiceError::Store(other),
        }
    }
}

/// Structured result of one execute attempt, mirrored onto the cell.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    pub status: CellStatus,
    pub output: String,
}

pub struct NotebookService {
    store: Arc<dyn RunStore>,
    registry: Arc<SessionRegistry>,
    gate: Arc<dyn Gate>,
    exec_timeout: Duration,
    run_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NotebookService {
    pub fn new(
        store: Arc<dyn RunStore>,
        registry: Arc<SessionRegistry>,
        gate: Arc<dyn Gate>,
    ) -> Self {
        Self {
            store,
            registry,
            gate,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            run_locks: DashMap::new(),
        }
    }

    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    async fn lock_run(&self, run_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .run_locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Create a fresh run rooted at `working_directory` (created on demand).
    pub async fn create_run(
        &self,
        session_name: &str,
        working_directory: std::path::PathBuf,
    ) -> Result<TrainingRun, ServiceError> {
        if session_name.trim().is_empty() {
            return Err(ServiceError::Validation(
                "a session name is required".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&working_directory)
            .await
            .map_err(StoreError::Io)?;

        let run = TrainingRun::new(
            Uuid::new_v4().to_string(),
            session_name.trim(),
            working_directory,
        );
        self.store.save_run(&run).await?;
        tracing::info!(run_id = %run.run_id, "Created training run");
        Ok(run)
    }

    pub async fn list_cells(&self, run_id: &str) -> Result<Vec<Cell>, ServiceError> {
        Ok(self.store.load_run(run_id).await?.cells)
    }

    pub async fn add_cell(
        &self,
        run_id: &str,
        cell_type: CellType,
    ) -> Result<Cell, ServiceError> {
        let _guard = self.lock_run(run_id).await;
        let mut run = self.store.load_run(run_id).await?;
        let cell = run.add_cell(cell_type).clone();
        self.store.save_run(&run).await?;
        tracing::debug!(run_id, cell_id = %cell.cell_id, "Added cell");
        Ok(cell)
    }

    pub async fn update_cell(
        &self,
        run_id: &str,
        cell_id: Uuid,
        new_code: String,
    ) -> Result<Cell, ServiceError> {
        let _guard = self.lock_run(run_id).await;
        let mut run = self.store.load_run(run_id).await?;
        let cell = run
            .cell_mut(cell_id)
            .ok_or_else(|| cell_not_found(cell_id))?;
        cell.set_code(new_code);
        let snapshot = cell.clone();
        self.store.save_run(&run).await?;
        Ok(snapshot)
    }

    pub async fn approve_cell(&self, run_id: &str, cell_id: Uuid) -> Result<Cell, ServiceError> {
        let _guard = self.lock_run(run_id).await;
        let mut run = self.store.load_run(run_id).await?;
        let cell = run
            .cell_mut(cell_id)
            .ok_or_else(|| cell_not_found(cell_id))?;
        if !cell.is_code() {
            return Err(ServiceError::Validation(
                "only code cells can be approved".to_string(),
            ));
        }
        cell.approve();
        let snapshot = cell.clone();
        self.store.save_run(&run).await?;
        Ok(snapshot)
    }

    pub async fn reject_cell(
        &self,
        run_id: &str,
        cell_id: Uuid,
        reason: &str,
    ) -> Result<Cell, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::Validation(
                "a rejection reason is required".to_string(),
            ));
        }
        let _guard = self.lock_run(run_id).await;
        let mut run = self.store.load_run(run_id).await?;
        let cell = run
            .cell_mut(cell_id)
            .ok_or_else(|| cell_not_found(cell_id))?;
        if !cell.is_code() {
            return Err(ServiceError::Validation(
                "only code cells can be rejected".to_string(),
            ));
        }
        cell.reject(reason.to_string());
        let snapshot = cell.clone();
        self.store.save_run(&run).await?;
        Ok(snapshot)
    }

    pub async fn delete_cell(&self, run_id: &str, cell_id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.lock_run(run_id).await;
        let mut run = self.store.load_run(run_id).await?;
        if !run.remove_cell(cell_id) {
            return Err(cell_not_found(cell_id));
        }
        self.store.save_run(&run).await?;
        Ok(())
    }

    /// Run one code cell through gate and interpreter.
    ///
    /// Two gating layers, most restrictive wins: a standing manual rejection
    /// blocks before the automatic gate is consulted, and the automatic gate
    /// is evaluated fresh on every attempt. The interpreter is only reached
    /// when neither layer blocks.
    pub async fn execute_cell(
        &self,
        run_id: &str,
        cell_id: Uuid,
    ) -> Result<ExecuteOutcome, ServiceError> {
        let _guard = self.lock_run(run_id).await;

        let mut run = self.store.load_run(run_id).await?;
        let cell = run
            .cell(cell_id)
            .cloned()
            .ok_or_else(|| cell_not_found(cell_id))?;

        if !cell.is_code() {
            return Err(ServiceError::Validation(
                "only code cells can be executed".to_string(),
            ));
        }
        if cell.code.trim().is_empty() {
            return Err(ServiceError::Validation(
                "cannot execute an empty cell".to_string(),
            ));
        }

        let verdict = if cell.is_manually_rejected() {
            tracing::info!(run_id, cell_id = %cell_id, "Standing manual rejection blocks execution");
            Verdict::Rejected(cell.rejection_reason.clone())
        } else {
            let folders = dataset_folder_names(&run.working_directory);
            match self.gate.evaluate(&run.cells, &cell, &folders).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::warn!(run_id, error = %e, "Gate unreachable, failing closed");
                    Verdict::Rejected("privacy review unavailable".to_string())
                }
            }
        };

        if let Verdict::Rejected(reason) = verdict {
            let target = run.cell_mut(cell_id).expect("cell exists under run lock");
            target.status = CellStatus::Rejected;
            target.approved = false;
            target.rejection_reason = reason.clone();
            self.store.save_run(&run).await?;
            tracing::info!(run_id, cell_id = %cell_id, %reason, "Cell rejected by gate");
            return Ok(ExecuteOutcome {
                status: CellStatus::Rejected,
                output: String::new(),
            });
        }

        {
            let target = run.cell_mut(cell_id).expect("cell exists under run lock");
            target.approved = true;
            target.status = CellStatus::Executing;
            target.rejection_reason.clear();
        }
        self.store.save_run(&run).await?;

        let reply = self
            .registry
            .execute(run_id, &run.working_directory, &cell.code, self.exec_timeout)
            .await;

        // Final cell state lands as one load-mutate-save.
        let mut run = self.store.load_run(run_id).await?;
        let target = run
            .cell_mut(cell_id)
            .ok_or_else(|| cell_not_found(cell_id))?;
        let outcome = match reply {
            Ok(reply) if reply.is_clean() => {
                target.status = CellStatus::Executed;
                target.output = reply.output.trim().to_string();
                ExecuteOutcome {
                    status: CellStatus::Executed,
                    output: target.output.clone(),
                }
            }
            Ok(reply) => {
                target.status = CellStatus::Error;
                target.output = reply.error.trim().to_string();
                ExecuteOutcome {
                    status: CellStatus::Error,
                    output: target.output.clone(),
                }
            }
            Err(e) => {
                tracing::error!(run_id, cell_id = %cell_id, error = %e, "Execution failed");
                target.status = CellStatus::Error;
                target.output = "Execution failed.".to_string();
                ExecuteOutcome {
                    status: CellStatus::Error,
                    output: target.output.clone(),
                }
            }
        };
        self.store.save_run(&run).await?;
        Ok(outcome)
    }

    /// Explicit session reclaim; the registry never reaps on its own.
    pub async fn cleanup_session(&self, run_id: &str) -> bool {
        self.registry.stop(run_id).await
    }

    /// Stop every interpreter and let the store settle. Used on shutdown.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

fn cell_not_found(cell_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("cell {cell_id} not found"))
}

/// Names (only) of the data providers' folders under the run's working
/// directory, as context for the gate.
fn dataset_folder_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::gate::PatternGate;
    use crate::session::InterpreterSpawner;
    use crate::store::MemoryStore;
    use std::io;
    use std::process::Stdio;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::process::{Child, Command};

    struct ScriptSpawner {
        script: &'static str,
        spawns: AtomicUsize,
    }

    impl ScriptSpawner {
        fn new(script: &'static str) -> Arc<Self> {
            Arc::new(Self {
                script,
                spawns: AtomicUsize::new(0),
            })
        }

        fn spawn_count(&self) -> usize {
            self.spawns.load(Ordering::SeqCst)
        }
    }

    impl InterpreterSpawner for ScriptSpawner {
        fn spawn(&self, working_dir: &Path) -> io::Result<Child> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            Command::new("sh")
                .arg("-c")
                .arg(self.script)
                .current_dir(working_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
        }
    }

    const CANNED_TWO: &str = r#"
while read -r len; do
  dd bs=1 count="$len" >/dev/null 2>/dev/null
  printf '1\n2'
  printf '0\n'
done
"#;

    const CANNED_TRACEBACK: &str = r#"
while read -r len; do
  dd bs=1 count="$len" >/dev/null 2>/dev/null
  printf '0\n'
  printf '3\nbad'
done
"#;

    const SILENT: &str = r#"
while read -r len; do
  dd bs=1 count="$len" >/dev/null 2>/dev/null
  sleep 30
done
"#;

    struct Fixture {
        service: NotebookService,
        spawner: Arc<ScriptSpawner>,
        _dir: tempfile::TempDir,
        run_id: String,
    }

    async fn fixture(script: &'static str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let spawner = ScriptSpawner::new(script);
        let service = NotebookService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SessionRegistry::new(
                Arc::clone(&spawner) as Arc<dyn InterpreterSpawner>
            )),
            Arc::new(PatternGate::new()),
        );
        let run = service
            .create_run("first attempt", dir.path().join("run"))
            .await
            .unwrap();
        Fixture {
            service,
            spawner,
            _dir: dir,
            run_id: run.run_id,
        }
    }

    #[tokio::test]
    async fn scenario_add_approve_execute() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "print(1+1)".to_string())
            .await
            .unwrap();
        fx.service
            .approve_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();

        let outcome = fx
            .service
            .execute_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();

        assert_eq!(outcome.status, CellStatus::Executed);
        assert_eq!(outcome.output, "2");

        let cells = fx.service.list_cells(&fx.run_id).await.unwrap();
        assert_eq!(cells[0].status, CellStatus::Executed);
        assert_eq!(cells[0].output, "2");
        assert!(cells[0].approved);
    }

    #[tokio::test]
    async fn gate_rejection_never_reaches_the_registry() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "import socket".to_string())
            .await
            .unwrap();

        let outcome = fx
            .service
            .execute_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();

        assert_eq!(outcome.status, CellStatus::Rejected);
        assert_eq!(fx.spawner.spawn_count(), 0);
        assert!(!fx.service.registry().contains(&fx.run_id));

        let cells = fx.service.list_cells(&fx.run_id).await.unwrap();
        assert_eq!(cells[0].status, CellStatus::Rejected);
        assert!(!cells[0].approved);
        assert!(!cells[0].rejection_reason.is_empty());
    }

    #[tokio::test]
    async fn standing_manual_rejection_blocks_without_gate_or_session() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "x = 1".to_string())
            .await
            .unwrap();
        fx.service
            .reject_cell(&fx.run_id, cell.cell_id, "not this week")
            .await
            .unwrap();

        let outcome = fx
            .service
            .execute_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();

        assert_eq!(outcome.status, CellStatus::Rejected);
        assert_eq!(fx.spawner.spawn_count(), 0);

        let cells = fx.service.list_cells(&fx.run_id).await.unwrap();
        assert_eq!(cells[0].rejection_reason, "not this week");
    }

    #[tokio::test]
    async fn editing_clears_a_manual_rejection() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "x = 1".to_string())
            .await
            .unwrap();
        fx.service
            .reject_cell(&fx.run_id, cell.cell_id, "no")
            .await
            .unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "y = 2".to_string())
            .await
            .unwrap();

        let outcome = fx
            .service
            .execute_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();
        assert_eq!(outcome.status, CellStatus::Executed);
    }

    #[tokio::test]
    async fn traceback_reply_marks_the_cell_errored() {
        let fx = fixture(CANNED_TRACEBACK).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "boom()".to_string())
            .await
            .unwrap();

        let outcome = fx
            .service
            .execute_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();

        assert_eq!(outcome.status, CellStatus::Error);
        assert_eq!(outcome.output, "bad");
    }

    #[tokio::test]
    async fn timeout_reports_failure_and_restarts_session() {
        let Fixture {
            service,
            run_id,
            _dir,
            ..
        } = fixture(SILENT).await;
        let service = service.with_exec_timeout(Duration::from_millis(100));
        let cell = service.add_cell(&run_id, CellType::Code).await.unwrap();
        service
            .update_cell(&run_id, cell.cell_id, "while True: pass".to_string())
            .await
            .unwrap();

        let outcome = service.execute_cell(&run_id, cell.cell_id).await.unwrap();

        assert_eq!(outcome.status, CellStatus::Error);
        assert_eq!(outcome.output, "Execution failed.");
        assert!(!service.registry().contains(&run_id));

        let cells = service.list_cells(&run_id).await.unwrap();
        assert_eq!(cells[0].status, CellStatus::Error);
    }

    #[tokio::test]
    async fn update_cell_resets_stale_output() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "print(1+1)".to_string())
            .await
            .unwrap();
        fx.service
            .execute_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();

        let updated = fx
            .service
            .update_cell(&fx.run_id, cell.cell_id, "print(3)".to_string())
            .await
            .unwrap();

        assert_eq!(updated.status, CellStatus::Pending);
        assert_eq!(updated.output, "");
        assert!(!updated.approved);
    }

    #[tokio::test]
    async fn markdown_cells_never_execute() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx
            .service
            .add_cell(&fx.run_id, CellType::Markdown)
            .await
            .unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "# heading".to_string())
            .await
            .unwrap();

        let result = fx.service.execute_cell(&fx.run_id, cell.cell_id).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert_eq!(fx.spawner.spawn_count(), 0);

        let result = fx.service.approve_cell(&fx.run_id, cell.cell_id).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn empty_code_is_a_validation_error() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "   \n".to_string())
            .await
            .unwrap();

        let result = fx.service.execute_cell(&fx.run_id, cell.cell_id).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        // No state change on validation failures.
        let cells = fx.service.list_cells(&fx.run_id).await.unwrap();
        assert_eq!(cells[0].status, CellStatus::Pending);
    }

    #[tokio::test]
    async fn missing_run_and_cell_are_not_found() {
        let fx = fixture(CANNED_TWO).await;

        let result = fx.service.list_cells("no-such-run").await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));

        let result = fx.service.execute_cell(&fx.run_id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn reject_requires_a_reason() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();

        let result = fx.service.reject_cell(&fx.run_id, cell.cell_id, "  ").await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn delete_cell_removes_it_and_leaves_the_session_alone() {
        let fx = fixture(CANNED_TWO).await;
        let keep = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        let gone = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, keep.cell_id, "x = 1".to_string())
            .await
            .unwrap();
        fx.service
            .execute_cell(&fx.run_id, keep.cell_id)
            .await
            .unwrap();
        assert!(fx.service.registry().contains(&fx.run_id));

        fx.service
            .delete_cell(&fx.run_id, gone.cell_id)
            .await
            .unwrap();

        let cells = fx.service.list_cells(&fx.run_id).await.unwrap();
        assert_eq!(cells.len(), 1);
        assert!(fx.service.registry().contains(&fx.run_id));
    }

    #[tokio::test]
    async fn cleanup_session_stops_the_interpreter() {
        let fx = fixture(CANNED_TWO).await;
        let cell = fx.service.add_cell(&fx.run_id, CellType::Code).await.unwrap();
        fx.service
            .update_cell(&fx.run_id, cell.cell_id, "x = 1".to_string())
            .await
            .unwrap();
        fx.service
            .execute_cell(&fx.run_id, cell.cell_id)
            .await
            .unwrap();

        assert!(fx.service.cleanup_session(&fx.run_id).await);
        assert!(!fx.service.registry().contains(&fx.run_id));
        assert!(!fx.service.cleanup_session(&fx.run_id).await);
    }

    #[tokio::test]
    async fn create_run_requires_a_name() {
        let fx = fixture(CANNED_TWO).await;
        let result = fx.service.create_run("  ", std::env::temp_dir()).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }
}
