//! Process handle for managing worker process lifecycle.

use std::process::ExitStatus;

use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Handle for a supervised worker process.
///
/// The [`Child`] itself is owned by a single observer task that waits for it to
/// exit. The handle only asks that task to kill the child, so `kill` can be
/// called any number of times from anywhere and the process is released
/// exactly once. Dropping the handle kills the process too.
pub struct ProcessHandle {
    pid: Option<u32>,
    kill: CancellationToken,
    exited: watch::Receiver<bool>,
}

impl ProcessHandle {
    /// Take ownership of `child` and start observing it.
    ///
    /// `on_exit` runs once, on the observer task, after the process has been
    /// reaped, whatever the cause: normal exit, crash, or `kill`. The handle
    /// reports the process as exited only after `on_exit` has returned.
    pub fn supervise<F>(mut child: Child, on_exit: F) -> Self
    where
        F: FnOnce(Option<ExitStatus>) + Send + 'static,
    {
        let pid = child.id();
        let kill = CancellationToken::new();
        let (exited_tx, exited) = watch::channel(false);

        let token = kill.clone();
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = token.cancelled() => None,
            };

            let status = match waited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid = ?pid, "Failed to kill process: {}", e);
                    }
                    child.wait().await
                }
            };

            let status = match status {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(pid = ?pid, "Failed to wait for process: {}", e);
                    None
                }
            };

            on_exit(status);
            let _ = exited_tx.send(true);
        });

        Self { pid, kill, exited }
    }

    /// Terminate the process. Idempotent.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait until the process has exited and its exit hook has run.
    pub async fn wait(&self) {
        let mut exited = self.exited.clone();
        // An Err means the observer is gone, which only happens after it exited.
        let _ = exited.wait_for(|done| *done).await;
    }

    /// Check if the process has exited without blocking.
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Get the process ID.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::process::Command;

    fn sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = ProcessHandle::supervise(sleeper(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.id().is_some());
        assert!(!handle.has_exited());

        handle.kill();
        handle.kill();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        handle.kill();

        assert!(handle.has_exited());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_natural_exit_reports_status() {
        let child = Command::new("sh")
            .args(["-c", "exit 3"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = ProcessHandle::supervise(child, move |status| {
            let _ = tx.send(status);
        });

        let status = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(status.code(), Some(3));

        handle.wait().await;
        assert!(handle.has_exited());
    }
}
