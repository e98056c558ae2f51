//! trainlet: gated notebook-cell execution core for collaborative training.

pub mod bridge;
mod config;
pub mod gate;
mod notebook;
pub mod service;
pub mod session;
pub mod store;
pub mod transport;
mod version;

pub use config::Config;

pub use notebook::{Cell, CellStatus, CellType, TrainingRun};

pub use gate::{Gate, GateConfig, GateError, LlmGate, PatternGate, Verdict, build_gate};
pub use service::{ExecuteOutcome, NotebookService, ServiceError};
pub use session::{
    DEFAULT_EXEC_TIMEOUT, InterpreterSpawner, PythonSpawner, SessionError, SessionRegistry,
};
pub use store::{JsonDirStore, MemoryStore, RunStore, StoreError};
pub use version::{TRAINLET_VERSION, VersionInfo};
