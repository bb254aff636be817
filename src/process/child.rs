use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};

use crate::error::tq_error::TqError;
use crate::error::tq_error_enums::{SpawnError, TqErrorKind};
use crate::logging::syslog::{error, info, trace, warn};

/// Everything needed to spawn one worker child: cwd is the worker root,
/// `env` carries `WORKER_PORT`/`WORKER_NAME`/`WORKER_ROUTE`/`WORKER_MODE`
/// plus per-worker timeout and runtime-hint variables on top of the
/// inherited environment.
pub struct ChildProcessSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

/// A spawned worker (or FastCGI pool) child. Owns the `tokio::process::Child`
/// behind a `Mutex` so signalling and reaping can be called from different
/// tasks (the supervisor issuing a graceful stop while the exit monitor is
/// also awaiting the same child).
pub struct ChildProcess {
    name: String,
    pid: u32,
    child: Mutex<Child>,
}

impl ChildProcess {
    pub async fn spawn(spec: ChildProcessSpec) -> Result<Self, TqError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.current_dir(&spec.cwd);
        cmd.envs(&spec.env);
        cmd.kill_on_drop(true);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("failed to spawn {} ({}): {}", spec.name, spec.program, e)))?;

        let pid = child.id().ok_or_else(|| TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("child {} exited before pid could be read", spec.name)))?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_pump(spec.name.clone(), stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_pump(spec.name.clone(), stderr, true);
        }

        trace(format!("[{}] spawned pid {}", spec.name, pid));

        Ok(ChildProcess { name: spec.name, pid, child: Mutex::new(child) })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn signal_term(&self) -> Result<(), TqError> {
        trace(format!("[{}] sending SIGTERM to pid {}", self.name, self.pid));
        signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM).map_err(|e| TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("SIGTERM to {} (pid {}) failed: {}", self.name, self.pid, e)))
    }

    pub async fn signal_kill(&self) -> Result<(), TqError> {
        warn(format!("[{}] sending SIGKILL to pid {}", self.name, self.pid));
        let mut child = self.child.lock().await;
        child.start_kill().map_err(|e| TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("SIGKILL to {} (pid {}) failed: {}", self.name, self.pid, e)))
    }

    pub async fn wait(&self) -> Result<ExitStatus, TqError> {
        let mut child = self.child.lock().await;
        child.wait().await.map_err(|e| TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("waiting on {} (pid {}) failed: {}", self.name, self.pid, e)))
    }

    pub async fn try_wait(&self) -> Result<Option<ExitStatus>, TqError> {
        let mut child = self.child.lock().await;
        child.try_wait().map_err(|e| TqError::new(TqErrorKind::Spawn(SpawnError::Io), format!("polling {} (pid {}) failed: {}", self.name, self.pid, e)))
    }

    /// SIGTERM, wait up to `grace`, escalate to SIGKILL on timeout.
    pub async fn graceful_stop(&self, grace: Duration) -> Result<ExitStatus, TqError> {
        self.signal_term().await?;

        match tokio::time::timeout(grace, self.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn(format!("[{}] did not exit within {:?} of SIGTERM, escalating to SIGKILL", self.name, grace));
                self.signal_kill().await?;
                self.wait().await
            }
        }
    }

    /// Spawns a background task that waits on this child and reports its
    /// exit status once. The supervisor uses this to drive the restart
    /// policy on unexpected exits. Only one watcher should be active at a
    /// time, since `wait()` is the sole reaper and the receiver is consumed
    /// once.
    pub fn watch_exit(self: std::sync::Arc<Self>) -> oneshot::Receiver<Result<ExitStatus, TqError>> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = self.wait().await;
            let _ = tx.send(result);
        });
        rx
    }
}

fn spawn_log_pump<R>(name: String, pipe: R, is_stderr: bool)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if is_stderr {
                        warn(format!("[{}] {}", name, line));
                    } else {
                        info(format!("[{}] {}", name, line));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error(format!("[{}] error reading child output: {}", name, e));
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawns_waits_and_captures_exit_status() {
        let spec = ChildProcessSpec { name: "echo-test".to_string(), program: "/bin/sh".to_string(), args: vec!["-c".to_string(), "echo hello; exit 7".to_string()], cwd: std::env::temp_dir(), env: HashMap::new() };

        let child = ChildProcess::spawn(spec).await.unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(7));
    }

    #[tokio::test]
    async fn graceful_stop_reaps_a_process_that_ignores_nothing() {
        let spec = ChildProcessSpec { name: "sleep-test".to_string(), program: "/bin/sleep".to_string(), args: vec!["30".to_string()], cwd: std::env::temp_dir(), env: HashMap::new() };

        let child = ChildProcess::spawn(spec).await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.graceful_stop(Duration::from_millis(200))).await.expect("graceful_stop must not hang").unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn watch_exit_reports_the_same_status_as_wait_would() {
        let spec = ChildProcessSpec { name: "watch-test".to_string(), program: "/bin/sh".to_string(), args: vec!["-c".to_string(), "exit 3".to_string()], cwd: std::env::temp_dir(), env: HashMap::new() };

        let child = std::sync::Arc::new(ChildProcess::spawn(spec).await.unwrap());
        let rx = child.clone().watch_exit();
        let status = tokio::time::timeout(Duration::from_secs(5), rx).await.expect("watch_exit must not hang").unwrap().unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
