use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use async_trait::async_trait;
use testing_framework_config::constants::{DEFAULT_NODE_JS_BIN, MAX_CAPTURED_OUTPUT_BYTES};
use testing_framework_env as tf_env;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::step::ScriptRuntime;

/// Node a script acts on, as exposed to the script's environment.
#[derive(Clone, Debug)]
pub struct InvocationTarget {
    pub node: String,
    pub rpc_url: String,
    pub ws_url: String,
    pub metrics_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// `None` when the script was terminated by a signal.
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("failed to launch '{program}' for script {script}: {source}")]
    Launch {
        program: PathBuf,
        script: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no invoker registered for `{keyword}` steps", keyword = .runtime.keyword())]
    Unsupported { runtime: ScriptRuntime },
}

/// Runs an external automation script to completion.
///
/// Implementations do not interpret the script; they only report how it
/// exited. Dropping the returned future must stop the script.
#[async_trait]
pub trait Invoker: Send + Sync {
    fn runtime(&self) -> ScriptRuntime;

    async fn invoke(
        &self,
        target: &InvocationTarget,
        script: &Path,
        args: &[String],
    ) -> Result<InvocationOutcome, InvocationError>;
}

/// Runs scripts through an interpreter, e.g. `node script.js args...`.
pub struct InterpreterInvoker {
    runtime: ScriptRuntime,
    interpreter: PathBuf,
}

impl InterpreterInvoker {
    #[must_use]
    pub fn new(runtime: ScriptRuntime, interpreter: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            interpreter: interpreter.into(),
        }
    }

    /// `js-script` invoker honouring `HARNESS_NODE_JS_BIN`.
    #[must_use]
    pub fn node_js() -> Self {
        let interpreter =
            tf_env::harness_node_js_bin().unwrap_or_else(|| PathBuf::from(DEFAULT_NODE_JS_BIN));
        Self::new(ScriptRuntime::NodeJs, interpreter)
    }
}

#[async_trait]
impl Invoker for InterpreterInvoker {
    fn runtime(&self) -> ScriptRuntime {
        self.runtime
    }

    async fn invoke(
        &self,
        target: &InvocationTarget,
        script: &Path,
        args: &[String],
    ) -> Result<InvocationOutcome, InvocationError> {
        let mut command = Command::new(&self.interpreter);
        command.arg(script);
        run_script(command, &self.interpreter, target, script, args).await
    }
}

/// Executes the script file itself; it must be executable.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutableInvoker;

#[async_trait]
impl Invoker for ExecutableInvoker {
    fn runtime(&self) -> ScriptRuntime {
        ScriptRuntime::Executable
    }

    async fn invoke(
        &self,
        target: &InvocationTarget,
        script: &Path,
        args: &[String],
    ) -> Result<InvocationOutcome, InvocationError> {
        run_script(Command::new(script), script, target, script, args).await
    }
}

async fn run_script(
    mut command: Command,
    program: &Path,
    target: &InvocationTarget,
    script: &Path,
    args: &[String],
) -> Result<InvocationOutcome, InvocationError> {
    command
        .args(args)
        .env("HARNESS_NODE_NAME", &target.node)
        .env("HARNESS_NODE_RPC_URL", &target.rpc_url)
        .env("HARNESS_NODE_WS_URL", &target.ws_url)
        .env("HARNESS_NODE_METRICS_URL", &target.metrics_url)
        .env("HARNESS_SCRIPT_ARGS", args.join(","))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = script.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        command.current_dir(dir);
    }

    debug!(
        program = %program.display(),
        script = %script.display(),
        node = %target.node,
        ?args,
        "invoking script"
    );

    let output = command
        .output()
        .await
        .map_err(|source| InvocationError::Launch {
            program: program.to_path_buf(),
            script: script.to_path_buf(),
            source,
        })?;

    Ok(InvocationOutcome {
        return_code: output.status.code(),
        stdout: capture_tail(&output.stdout),
        stderr: capture_tail(&output.stderr),
    })
}

fn capture_tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(MAX_CAPTURED_OUTPUT_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Invoker per script runtime.
#[derive(Clone)]
pub struct Invokers {
    by_runtime: HashMap<ScriptRuntime, Arc<dyn Invoker>>,
}

impl Default for Invokers {
    fn default() -> Self {
        Self::empty()
            .with(Arc::new(InterpreterInvoker::node_js()))
            .with(Arc::new(ExecutableInvoker))
    }
}

impl Invokers {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_runtime: HashMap::new(),
        }
    }

    /// Register an invoker, replacing any previous one for its runtime.
    #[must_use]
    pub fn with(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.by_runtime.insert(invoker.runtime(), invoker);
        self
    }

    pub fn get(&self, runtime: ScriptRuntime) -> Result<Arc<dyn Invoker>, InvocationError> {
        self.by_runtime
            .get(&runtime)
            .cloned()
            .ok_or(InvocationError::Unsupported { runtime })
    }
}
