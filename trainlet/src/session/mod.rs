//! Interpreter session registry.
//!
//! One live interpreter subprocess per training run, keyed by run id. The
//! registry owns spawn, lookup, and termination; interpreter state never
//! survives a stop or crash, so a re-created session starts from a fresh
//! namespace.
//!
//! Frame ordering on a session's pipes is only safe when requests are
//! serialized, so each entry guards its child and framed streams behind one
//! async mutex. The coordinator additionally serializes whole execute calls
//! per run.

mod spawner;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{ExecCodec, FrameError};
use crate::bridge::protocol::{ExecReply, ExecRequest};

pub use spawner::{InterpreterSpawner, PythonSpawner};

/// Default wall-clock bound on one execute round trip.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to spawn interpreter: {0}")]
    Spawn(#[from] io::Error),
    #[error("interpreter protocol error: {0}")]
    Frame(FrameError),
    #[error("interpreter crashed")]
    Crashed,
    #[error("execution timed out")]
    Timeout,
}

struct SessionIo {
    child: Child,
    writer: FramedWrite<ChildStdin, ExecCodec>,
    reader: FramedRead<ChildStdout, ExecCodec>,
}

impl SessionIo {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// One live interpreter pairing. Owned by the registry; dropped entries kill
/// their child via `kill_on_drop`.
pub struct Session {
    io: Mutex<SessionIo>,
}

/// Process-wide table of interpreter sessions.
///
/// Injected into the coordinator rather than living as a module-level
/// singleton, so tests can run as many independent registries as they like.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    spawner: Arc<dyn InterpreterSpawner>,
}

impl SessionRegistry {
    pub fn new(spawner: Arc<dyn InterpreterSpawner>) -> Self {
        Self {
            sessions: DashMap::new(),
            spawner,
        }
    }

    /// Registry backed by the default Python spawner.
    pub fn with_python(python: impl Into<String>) -> Self {
        Self::new(Arc::new(PythonSpawner::new(python)))
    }

    /// Idempotent start: returns the live session for `key`, purging a dead
    /// entry and spawning a fresh interpreter when needed.
    pub async fn ensure(&self, key: &str, working_dir: &Path) -> Result<Arc<Session>, SessionError> {
        let existing = self.sessions.get(key).map(|e| Arc::clone(e.value()));
        if let Some(existing) = existing {
            if existing.io.lock().await.is_alive() {
                return Ok(existing);
            }
            tracing::warn!(run_id = %key, "Interpreter exited while idle, purging session");
            self.sessions.remove(key);
        }

        let mut child = self.spawner.spawn(working_dir)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Spawn(io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Spawn(io::Error::other("stdout not captured")))?;

        let session = Arc::new(Session {
            io: Mutex::new(SessionIo {
                child,
                writer: FramedWrite::new(stdin, ExecCodec::new()),
                reader: FramedRead::new(stdout, ExecCodec::new()),
            }),
        });

        self.sessions.insert(key.to_string(), Arc::clone(&session));
        tracing::info!(run_id = %key, dir = %working_dir.display(), "Started interpreter session");
        Ok(session)
    }

    /// Send one code frame and await its paired reply.
    ///
    /// A timeout leaves a stale frame in flight, so the session is
    /// force-stopped before returning; the next execute starts a fresh
    /// interpreter on a clean frame boundary. A crash purges the entry.
    pub async fn execute(
        &self,
        key: &str,
        working_dir: &Path,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecReply, SessionError> {
        let session = self.ensure(key, working_dir).await?;
        let mut io = session.io.lock().await;

        if let Err(e) = io.writer.send(ExecRequest::new(code)).await {
            drop(io);
            self.purge(key).await;
            return Err(match e {
                FrameError::Io(_) => SessionError::Crashed,
                other => SessionError::Frame(other),
            });
        }

        match tokio::time::timeout(timeout, io.reader.next()).await {
            Err(_) => {
                tracing::warn!(run_id = %key, "Execution timed out, force-stopping session");
                drop(io);
                self.stop(key).await;
                Err(SessionError::Timeout)
            }
            Ok(None) => {
                tracing::error!(run_id = %key, "Interpreter closed its output stream");
                drop(io);
                self.purge(key).await;
                Err(SessionError::Crashed)
            }
            Ok(Some(Err(e))) => {
                drop(io);
                self.purge(key).await;
                Err(match e {
                    FrameError::Io(_) => SessionError::Crashed,
                    other => SessionError::Frame(other),
                })
            }
            Ok(Some(Ok(reply))) => Ok(reply),
        }
    }

    /// Graceful stop: end-of-input on stdin, then terminate and reap.
    /// Returns false when no session was registered for `key`.
    pub async fn stop(&self, key: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(key) else {
            tracing::debug!(run_id = %key, "No session to stop");
            return false;
        };
        let mut io = session.io.lock().await;
        let _ = io.writer.close().await;
        let _ = io.child.start_kill();
        let _ = io.child.wait().await;
        tracing::info!(run_id = %key, "Stopped interpreter session");
        true
    }

    /// Stop every live session. Used on server shutdown.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.stop(&key).await;
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    async fn purge(&self, key: &str) {
        if let Some((_, session)) = self.sessions.remove(key) {
            let mut io = session.io.lock().await;
            let _ = io.child.start_kill();
            let _ = io.child.wait().await;
        }
    }
}
