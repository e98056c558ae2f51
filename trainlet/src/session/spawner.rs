//! Interpreter spawn strategies.

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// The REPL loop executed inside the interpreter subprocess. It reads
/// length-prefixed code frames from stdin, runs them in one persistent
/// namespace, and answers with paired stdout/stderr frames.
const REPL_SOURCE: &str = include_str!("repl.py");

/// Extension point for different interpreter spawn strategies.
///
/// The registry only needs piped stdin/stdout on the returned child; tests
/// substitute scripted interpreters to exercise lifecycle paths without a
/// Python installation.
pub trait InterpreterSpawner: Send + Sync {
    fn spawn(&self, working_dir: &Path) -> io::Result<Child>;
}

/// Default spawner: `python3 -u -c <repl loop>` rooted at the run's
/// working directory.
pub struct PythonSpawner {
    python: String,
}

impl PythonSpawner {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl Default for PythonSpawner {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl InterpreterSpawner for PythonSpawner {
    fn spawn(&self, working_dir: &Path) -> io::Result<Child> {
        // -u keeps the child's pipes unbuffered so reply frames arrive as
        // soon as the REPL flushes them.
        Command::new(&self.python)
            .arg("-u")
            .arg("-c")
            .arg(REPL_SOURCE)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }
}
