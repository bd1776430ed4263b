//! Subprocess transport: starts a worker process with piped stdio.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::{ReadHalf, StderrHalf, WriteHalf};
use crate::catalog::WorkerDescriptor;
use crate::types::{BrokerError, Result};

/// Type alias for the split subprocess components
type SplitSubprocess = (
    ReadHalf<ChildStdout>,
    WriteHalf<ChildStdin>,
    StderrHalf<ChildStderr>,
    Child,
);

/// Transport that runs one worker described by a [`WorkerDescriptor`].
pub struct SubprocessTransport {
    descriptor: WorkerDescriptor,
    process: Option<Child>,
}

impl SubprocessTransport {
    pub fn new(descriptor: WorkerDescriptor) -> Self {
        Self {
            descriptor,
            process: None,
        }
    }

    /// Resolve the worker command to an executable path.
    ///
    /// Resolving up front turns a missing binary into a clear spawn error
    /// instead of a bare `ENOENT`.
    fn resolve_command(&self) -> Result<PathBuf> {
        which::which(&self.descriptor.command).map_err(|e| {
            BrokerError::spawn(
                &self.descriptor.name,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("command '{}' not found: {}", self.descriptor.command, e),
                ),
            )
        })
    }

    /// Build the command with piped stdio and the worker's credentials.
    fn build_command(&self, program: PathBuf) -> Command {
        let mut command = Command::new(program);
        command.args(&self.descriptor.args);

        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        // A missing credential is passed through empty so the worker can
        // report its own, more specific, error.
        for var in &self.descriptor.credentials {
            let value = std::env::var(var).unwrap_or_default();
            command.env(var, value);
        }

        command
    }

    /// Start the worker process.
    pub fn connect(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let program = self.resolve_command()?;
        debug!(
            server = %self.descriptor.name,
            "Starting worker: {} {:?}",
            program.display(),
            self.descriptor.args
        );

        let child = self
            .build_command(program)
            .spawn()
            .map_err(|e| BrokerError::spawn(&self.descriptor.name, e))?;

        self.process = Some(child);
        Ok(())
    }

    /// Split the transport into independent stdout/stdin/stderr halves and
    /// the child process.
    ///
    /// # Errors
    ///
    /// Returns an error if `connect()` has not been called or a pipe is
    /// missing.
    pub fn split(mut self) -> Result<SplitSubprocess> {
        let name = self.descriptor.name.clone();
        let not_available = |what: &str| {
            BrokerError::spawn(
                &name,
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("{} not available", what)),
            )
        };

        let mut child = self.process.take().ok_or_else(|| {
            BrokerError::spawn(
                &name,
                std::io::Error::other("Process not started. Call connect() first."),
            )
        })?;

        let stdin = child.stdin.take().ok_or_else(|| not_available("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| not_available("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_available("stderr"))?;

        Ok((
            ReadHalf::new(stdout),
            WriteHalf::new(stdin),
            StderrHalf::new(stderr),
            child,
        ))
    }
}
