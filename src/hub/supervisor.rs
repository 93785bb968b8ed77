//! Persistent-node child process supervision (spec.md §4.3, §6).
//!
//! At the `Open` transition the hub spawns one child per `packages.*` entry
//! with `enabled=true`, `persistent=true`, whose name isn't the hub's own,
//! launching the node's entry point inside the sibling directory named
//! after it. Grounded on the teacher's `process_manager.rs::ChildLock` /
//! `SupervisedChild` — the locking discipline is the same (a
//! [`LockWithTimeout`] around the `Child` handle), trimmed of the CPU/memory
//! resource-monitor machinery that has no counterpart here: this is a
//! router's child supervision, not a resource accountant's.

use std::path::PathBuf;
use std::process::Stdio;

use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use dusa_collection_utils::log;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::SamError;

/// One supervised persistent node: its locked child handle plus the tasks
/// streaming its stdout/stderr into the hub's log.
pub struct SupervisedChild {
    pub name: String,
    child: LockWithTimeout<Child>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

impl SupervisedChild {
    /// Spawns `<workdir>/<name>/` as a child process with no injected
    /// environment variables, per spec.md §6's process-spawn convention.
    /// Each node's package entry records its own invocation entry point as
    /// `link`; an empty `link` falls back to the conventional `./<name>`
    /// relative to the parent working directory.
    pub fn spawn(name: &str, link: &str, parent_dir: &PathBuf) -> Result<Self, SamError> {
        let working_dir = parent_dir.join(name);
        let entry_point: PathBuf = if link.is_empty() {
            working_dir.join(name)
        } else {
            PathBuf::from(link)
        };

        let mut command = Command::new(entry_point);
        command
            .current_dir(&working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SamError::transport(format!("failed to spawn persistent node \"{name}\": {e}"))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = spawn_line_logger(name.to_string(), "stdout", stdout);
        let stderr_task = spawn_line_logger(name.to_string(), "stderr", stderr);

        log!(LogLevel::Info, "spawned persistent node \"{}\" in {:?}", name, working_dir);

        Ok(SupervisedChild {
            name: name.to_string(),
            child: LockWithTimeout::new(child),
            stdout_task,
            stderr_task,
        })
    }

    /// Waits for the child to exit and logs its exit code. Spec.md §4.3:
    /// no automatic restart.
    pub async fn wait_and_log_exit(&self) {
        let exit_status = {
            let mut child = match self.child.try_write().await {
                Ok(guard) => guard,
                Err(e) => {
                    log!(LogLevel::Warn, "couldn't lock child \"{}\" to await exit: {}", self.name, e);
                    return;
                }
            };
            child.wait().await
        };

        match exit_status {
            Ok(status) => log!(LogLevel::Info, "persistent node \"{}\" exited with {}", self.name, status),
            Err(e) => log!(LogLevel::Warn, "failed to wait on persistent node \"{}\": {}", self.name, e),
        }
    }

    /// Sends a kill signal as part of hub shutdown (spec.md's supplemented
    /// `Open -> Draining -> Stopped` teardown).
    pub async fn terminate(&self) {
        if let Ok(mut child) = self.child.try_write().await {
            let _ = child.start_kill();
        }
        self.stdout_task.abort();
        self.stderr_task.abort();
    }
}

fn spawn_line_logger<R>(name: String, stream_name: &'static str, reader: Option<R>) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => log!(LogLevel::Info, "[{}:{}] {}", name, stream_name, line),
                Ok(None) => break,
                Err(e) => {
                    log!(LogLevel::Warn, "error reading {} from \"{}\": {}", stream_name, name, e);
                    break;
                }
            }
        }
    })
}
