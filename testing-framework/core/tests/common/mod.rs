#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use testing_framework_core::scenario::{
    CleanupGuard, InvocationError, InvocationOutcome, InvocationTarget, Invoker, MetricQuery,
    NodeRegistry, ReportError, ReportSource, RunContext, Scenario, ScenarioBuilder,
    ScriptRuntime, Value,
};
use tokio::time::{Instant, sleep};

pub const FOUR_BY_FOUR: &str = r#"
settings:
  run_timeout_secs: 1200
  poll_interval_ms: 1000
nodes:
  validators:
    count: 4
    command: polkadot
    names: [alice, bob, charlie, dave]
    args: ["--chain=rococo-local", "--prometheus-port={{prometheus_port}}"]
  collators:
    - para_id: 2000
      command: adder-collator
    - para_id: 2001
      command: adder-collator
    - para_id: 2002
      command: adder-collator
    - para_id: 2003
      command: adder-collator
steps:
  - id: register-a
    run: 'alice: js-script ./register-paras.js with "2000,2001" return is 0 within 600 seconds'
  - id: register-b
    run: 'bob: js-script ./register-paras.js with "2002,2003" return is 0 within 600 seconds'
  - id: assign
    after: [register-a, register-b]
    run: 'alice: js-script ./assign-cores.js with "0,2000,1,2001,2,2002,3,2003" return is 0 within 600 seconds'
  - parallel:
      - run: 'collator-2000-0: reports block height is at least 6 within 200 seconds'
      - run: 'collator-2001-0: reports block height is at least 6 within 50 seconds'
      - run: 'collator-2002-0: reports block height is at least 6 within 50 seconds'
      - run: 'collator-2003-0: reports block height is at least 6 within 50 seconds'
"#;

pub fn build(yaml: &str) -> Scenario {
    ScenarioBuilder::from_yaml_str(yaml, None)
        .unwrap()
        .build()
        .unwrap()
}

/// Nodes produce one block every `block_time` from construction; nodes in
/// `stalled` stay at height 0.
pub struct ChainReporter {
    started: Instant,
    block_time: Duration,
    stalled: HashSet<String>,
    down: HashSet<String>,
}

impl ChainReporter {
    pub fn new(block_time: Duration) -> Self {
        Self {
            started: Instant::now(),
            block_time,
            stalled: HashSet::new(),
            down: HashSet::new(),
        }
    }

    pub fn stalled(mut self, node: &str) -> Self {
        self.stalled.insert(node.to_owned());
        self
    }

    pub fn down(mut self, node: &str) -> Self {
        self.down.insert(node.to_owned());
        self
    }
}

#[async_trait]
impl ReportSource for ChainReporter {
    async fn report(&self, node: &str, metric: &MetricQuery) -> Result<Value, ReportError> {
        self.is_up(node).await?;
        if metric.name != "block_height" {
            return Err(ReportError::MetricMissing {
                node: node.to_owned(),
                metric: metric.to_string(),
            });
        }
        if self.stalled.contains(node) {
            return Ok(Value::Int(0));
        }
        let blocks = self.started.elapsed().as_millis() / self.block_time.as_millis();
        Ok(Value::Int(blocks as i64))
    }

    async fn is_up(&self, node: &str) -> Result<(), ReportError> {
        if self.down.contains(node) {
            return Err(ReportError::MetricMissing {
                node: node.to_owned(),
                metric: "up".to_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Invocation {
    pub node: String,
    pub script: String,
    pub args: Vec<String>,
}

/// Fake `js-script` backend: each script name maps to a run time and a
/// return code. Unknown scripts return 0 immediately.
#[derive(Default)]
pub struct ScriptedInvoker {
    behaviour: HashMap<String, (Duration, i32)>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedInvoker {
    pub fn script(mut self, name: &str, runs_for: Duration, return_code: i32) -> Self {
        self.behaviour
            .insert(name.to_owned(), (runs_for, return_code));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    fn runtime(&self) -> ScriptRuntime {
        ScriptRuntime::NodeJs
    }

    async fn invoke(
        &self,
        target: &InvocationTarget,
        script: &Path,
        args: &[String],
    ) -> Result<InvocationOutcome, InvocationError> {
        let name = script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(Invocation {
            node: target.node.clone(),
            script: name.clone(),
            args: args.to_vec(),
        });

        let (runs_for, return_code) = self
            .behaviour
            .get(&name)
            .copied()
            .unwrap_or((Duration::ZERO, 0));
        sleep(runs_for).await;

        Ok(InvocationOutcome {
            return_code: Some(return_code),
            stdout: format!("{name} done"),
            stderr: String::new(),
        })
    }
}

pub fn context(
    scenario: &Scenario,
    reporter: Arc<dyn ReportSource>,
    invoker: Arc<dyn Invoker>,
) -> RunContext {
    RunContext::new(NodeRegistry::from_topology(scenario.topology()))
        .with_reporter(reporter)
        .with_invoker(invoker)
}

/// Cleanup guard counting how often teardown ran.
pub struct CountingCleanup(pub Arc<AtomicUsize>);

impl CleanupGuard for CountingCleanup {
    fn cleanup(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
