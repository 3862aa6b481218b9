use std::{
    fs::{self, File},
    io::{self, Read as _, Seek as _, SeekFrom},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    time::Duration,
};

use tempfile::TempDir;
use testing_framework_env as tf_env;
use thiserror::Error;
use tokio::time;
use tracing::{debug, info, warn};

use super::binary::{BinaryNotFound, resolve_command};
use crate::topology::NodeDescriptor;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOG_TAIL_BYTES: u64 = 2048;

#[derive(Debug, Error)]
pub enum SpawnNodeError {
    #[error(transparent)]
    BinaryNotFound(#[from] BinaryNotFound),
    #[error("failed to create working directory for node '{node}': {source}")]
    TempDir {
        node: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to create log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn node process '{binary}': {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Owned reference to one live node process.
///
/// The child is killed and reaped at most once, on [`NodeHandle::shutdown`]
/// or on drop, whichever comes first.
pub struct NodeHandle {
    name: String,
    child: Option<Child>,
    pid: u32,
    workdir: Option<TempDir>,
    workdir_path: PathBuf,
    stdout_log: PathBuf,
    stderr_log: PathBuf,
}

impl NodeHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir_path
    }

    #[must_use]
    pub fn stdout_log(&self) -> &Path {
        &self.stdout_log
    }

    #[must_use]
    pub fn stderr_log(&self) -> &Path {
        &self.stderr_log
    }

    /// Check if the node process is still running.
    pub fn is_running(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Exit status if the process already terminated.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    /// Returns true if the process exited within the timeout, false otherwise.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        time::timeout(timeout, async {
            while self.is_running() {
                time::sleep(EXIT_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok()
    }

    /// Last bytes of the node's stderr log, for launch diagnostics.
    #[must_use]
    pub fn stderr_tail(&self) -> String {
        read_tail(&self.stderr_log).unwrap_or_default()
    }

    /// Kill and reap the process. Returns false if it was already stopped.
    pub fn shutdown(&mut self) -> bool {
        let Some(mut child) = self.child.take() else {
            return false;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(node = %self.name, %status, "node process already exited");
            }
            _ => {
                debug!(node = %self.name, pid = self.pid, "stopping node process");
                if let Err(err) = child.kill() {
                    warn!(node = %self.name, error = %err, "failed to kill node process");
                }
                if let Err(err) = child.wait() {
                    warn!(node = %self.name, error = %err, "failed to reap node process");
                }
            }
        }

        self.release_workdir();
        true
    }

    fn release_workdir(&mut self) {
        let Some(dir) = self.workdir.take() else {
            return;
        };
        if tf_env::harness_keep_logs() {
            let path = dir.keep();
            info!(node = %self.name, path = %path.display(), "kept node working directory");
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn one node process with its own working directory; stdout and
/// stderr go to `<name>.stdout.log` / `<name>.stderr.log` inside it.
pub fn spawn_node(node: &NodeDescriptor) -> Result<NodeHandle, SpawnNodeError> {
    let binary = resolve_command(&node.command)?;
    let workdir = create_workdir(&node.name).map_err(|source| SpawnNodeError::TempDir {
        node: node.name.clone(),
        source,
    })?;
    let workdir_path = workdir.path().to_path_buf();

    let stdout_log = workdir_path.join(format!("{}.stdout.log", node.name));
    let stderr_log = workdir_path.join(format!("{}.stderr.log", node.name));
    let stdout = create_log(&stdout_log)?;
    let stderr = create_log(&stderr_log)?;

    let args = node.rendered_args(&workdir_path);
    debug!(
        node = %node.name,
        binary = %binary.display(),
        ?args,
        workdir = %workdir_path.display(),
        "spawning node process"
    );

    let child = Command::new(&binary)
        .args(&args)
        .envs(node.rendered_env(&workdir_path))
        .current_dir(&workdir_path)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|source| SpawnNodeError::Spawn {
            binary: binary.clone(),
            source,
        })?;

    let pid = child.id();
    info!(node = %node.name, role = node.role.label(), pid, "node process spawned");

    Ok(NodeHandle {
        name: node.name.clone(),
        child: Some(child),
        pid,
        workdir: Some(workdir),
        workdir_path,
        stdout_log,
        stderr_log,
    })
}

fn create_workdir(name: &str) -> io::Result<TempDir> {
    let prefix = format!("{name}-");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    match tf_env::harness_log_dir() {
        Some(dir) => {
            fs::create_dir_all(&dir)?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    }
}

fn create_log(path: &Path) -> Result<File, SpawnNodeError> {
    File::create(path).map_err(|source| SpawnNodeError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

fn read_tail(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::topology::NodeRole;

    fn descriptor(command: &str, args: &[&str]) -> NodeDescriptor {
        NodeDescriptor {
            name: "alice".to_owned(),
            role: NodeRole::Validator,
            index: 0,
            para_id: None,
            command: command.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            env: BTreeMap::from([("NODE_LABEL".to_owned(), "{{name}}".to_owned())]),
            rpc_port: 9944,
            prometheus_port: 9615,
        }
    }

    #[test]
    fn shutdown_kills_exactly_once() {
        let mut handle = spawn_node(&descriptor("sleep", &["30"])).unwrap();
        assert!(handle.is_running());

        assert!(handle.shutdown());
        assert!(!handle.is_running());
        assert!(!handle.shutdown());
    }

    #[tokio::test]
    async fn output_goes_to_log_files() {
        let mut handle = spawn_node(&descriptor(
            "sh",
            &["-c", "echo out-$NODE_LABEL; echo err-{{name}} >&2"],
        ))
        .unwrap();

        assert!(handle.wait_for_exit(Duration::from_secs(5)).await);

        let stdout = fs::read_to_string(handle.stdout_log()).unwrap();
        assert_eq!(stdout.trim(), "out-alice");
        assert_eq!(handle.stderr_tail().trim(), "err-alice");
    }

    #[test]
    fn workdir_is_removed_on_drop() {
        let handle = spawn_node(&descriptor("true", &[])).unwrap();
        let workdir = handle.workdir().to_path_buf();
        assert!(workdir.exists());

        drop(handle);
        if !tf_env::harness_keep_logs() {
            assert!(!workdir.exists());
        }
    }

    #[test]
    fn missing_binary_is_reported() {
        let err = spawn_node(&descriptor("no-such-parachain-node", &[])).err().unwrap();
        assert!(matches!(err, SpawnNodeError::BinaryNotFound(_)));
    }
}
