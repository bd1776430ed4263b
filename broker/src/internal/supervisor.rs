//! Worker process supervision: spawn, handshake, exit observation.

use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::WorkerDescriptor;
use crate::internal::rpc::Multiplexer;
use crate::internal::transport::{ProcessHandle, SubprocessTransport};
use crate::types::protocol::{
    METHOD_INITIALIZE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, parse_tools_list,
};
use crate::types::{BrokerError, InitializeParams, Result, ToolCallParams, ToolDescriptor};

/// Lifecycle of a worker.
///
/// `Spawning -> Handshaking -> Ready -> Terminated`, or straight from
/// `Handshaking` to `Terminated` when the handshake fails. Nothing ever goes
/// back to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Handshaking,
    Ready,
    Terminated,
}

/// Published by the exit observer when a worker process ends.
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub name: String,
    /// Identifies the spawn, so a stale exit never affects a newer worker
    /// with the same name.
    pub instance: Uuid,
    pub status: Option<ExitStatus>,
}

/// A running worker that completed its handshake.
pub struct ActiveWorker {
    name: String,
    instance: Uuid,
    tools: Vec<ToolDescriptor>,
    rpc: Arc<Multiplexer>,
    process: ProcessHandle,
}

impl ActiveWorker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Tools discovered during the handshake.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn state(&self) -> WorkerState {
        if self.is_alive() {
            WorkerState::Ready
        } else {
            WorkerState::Terminated
        }
    }

    /// False once the process exited or its stdout closed.
    pub fn is_alive(&self) -> bool {
        !self.rpc.is_closed() && !self.process.has_exited()
    }

    /// Invoke one tool through `tools/call`.
    pub async fn call_tool(&self, tool: &str, args: Value) -> Result<Value> {
        let params = serde_json::to_value(ToolCallParams {
            name: tool.to_string(),
            arguments: args,
        })?;
        self.rpc.send(METHOD_TOOLS_CALL, params).await
    }

    /// Number of calls waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.rpc.outstanding()
    }

    /// Kill the process. Idempotent; bookkeeping happens in the exit observer.
    pub fn kill(&self) {
        self.process.kill();
    }

    /// Wait until the process has exited and the exit observer has run.
    pub async fn wait(&self) {
        self.process.wait().await;
    }
}

impl std::fmt::Debug for ActiveWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWorker")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("pid", &self.pid())
            .field("tools", &self.tools.len())
            .field("state", &self.state())
            .finish()
    }
}

/// Starts workers and wires their exit notifications back to the pool.
pub struct Supervisor {
    call_timeout: Duration,
    exits: mpsc::UnboundedSender<WorkerExit>,
    /// Aborts handshakes in progress; later spawns fail with `ShuttingDown`.
    shutdown: CancellationToken,
    spawned: AtomicU64,
}

impl Supervisor {
    pub fn new(
        call_timeout: Duration,
        exits: mpsc::UnboundedSender<WorkerExit>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            call_timeout,
            exits,
            shutdown,
            spawned: AtomicU64::new(0),
        }
    }

    /// Number of processes this supervisor has started.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Spawn the worker for `descriptor` and complete its handshake.
    ///
    /// On any failure no process is left running. Cancelling the shutdown
    /// token aborts the handshake and reaps the child before returning.
    pub async fn spawn(&self, descriptor: &WorkerDescriptor) -> Result<ActiveWorker> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::ShuttingDown);
        }
        let name = descriptor.name.clone();
        let instance = Uuid::new_v4();
        debug!(server = %name, %instance, state = ?WorkerState::Spawning, "Spawning worker");

        let mut transport = SubprocessTransport::new(descriptor.clone());
        transport.connect()?;
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let (read_half, write_half, stderr_half, child) = transport.split()?;
        stderr_half.forward_to_log(name.clone());

        let rpc = Multiplexer::new(name.clone(), read_half, write_half, self.call_timeout);

        let observer_rpc = Arc::clone(&rpc);
        let exits = self.exits.clone();
        let exit_name = name.clone();
        let process = ProcessHandle::supervise(child, move |status| {
            observer_rpc.close();
            info!(server = %exit_name, %instance, ?status, "Worker exited");
            let _ = exits.send(WorkerExit {
                name: exit_name,
                instance,
                status,
            });
        });

        debug!(server = %name, pid = ?process.id(), state = ?WorkerState::Handshaking, "Worker started");

        let handshake = tokio::select! {
            result = Self::handshake(&rpc) => result,
            _ = self.shutdown.cancelled() => Err(BrokerError::ShuttingDown),
        };

        match handshake {
            Ok(tools) => {
                info!(
                    server = %name,
                    pid = ?process.id(),
                    tools = tools.len(),
                    state = ?WorkerState::Ready,
                    "Worker ready"
                );
                Ok(ActiveWorker {
                    name,
                    instance,
                    tools,
                    rpc,
                    process,
                })
            }
            Err(BrokerError::ShuttingDown) => {
                debug!(server = %name, "Spawn aborted by shutdown");
                process.kill();
                process.wait().await;
                Err(BrokerError::ShuttingDown)
            }
            Err(e) => {
                warn!(server = %name, "Handshake failed: {}", e);
                process.kill();
                process.wait().await;
                Err(BrokerError::Handshake {
                    name,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn handshake(rpc: &Multiplexer) -> Result<Vec<ToolDescriptor>> {
        let params = serde_json::to_value(InitializeParams::default())?;
        rpc.send(METHOD_INITIALIZE, params).await?;

        let listed = rpc.send(METHOD_TOOLS_LIST, json!({})).await?;
        parse_tools_list(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(Duration::from_secs(1), tx, CancellationToken::new());

        let descriptor = WorkerDescriptor::new("ghost-mcp", "/nonexistent/ghost-worker");
        let err = supervisor.spawn(&descriptor).await.unwrap_err();

        assert!(matches!(err, BrokerError::Spawn { .. }));
        assert_eq!(supervisor.spawn_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handshake_failure_kills_child() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(Duration::from_millis(200), tx, CancellationToken::new());

        // `cat` echoes requests back, which never parse as responses.
        let descriptor = WorkerDescriptor::new("echo-back", "cat");
        let err = supervisor.spawn(&descriptor).await.unwrap_err();

        match err {
            BrokerError::Handshake { name, reason } => {
                assert_eq!(name, "echo-back");
                assert!(reason.contains("timeout"), "unexpected reason: {}", reason);
            }
            other => panic!("Expected Handshake error, got {:?}", other),
        }
        assert_eq!(supervisor.spawn_count(), 1);

        // The observer already reaped the child before spawn returned.
        let exit = rx.try_recv().unwrap();
        assert_eq!(exit.name, "echo-back");
    }

    #[tokio::test]
    async fn test_shutdown_aborts_handshake() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::new(Duration::from_secs(30), tx, shutdown.clone());

        // `sleep` never answers `initialize`.
        let descriptor = WorkerDescriptor::new("sleeper", "sleep").with_args(["30"]);
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.cancel();
        });

        let started = std::time::Instant::now();
        let err = supervisor.spawn(&descriptor).await.unwrap_err();
        assert!(matches!(err, BrokerError::ShuttingDown));
        assert!(started.elapsed() < Duration::from_secs(5));

        // Reaped before spawn returned.
        let exit = rx.try_recv().unwrap();
        assert_eq!(exit.name, "sleeper");
        canceller.await.unwrap();

        let again = supervisor.spawn(&descriptor).await.unwrap_err();
        assert!(matches!(again, BrokerError::ShuttingDown));
        assert_eq!(supervisor.spawn_count(), 1);
    }
}
