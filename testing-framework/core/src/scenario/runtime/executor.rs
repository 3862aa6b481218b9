use std::{any::Any, collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio::{
    task::{Id as TaskId, JoinSet},
    time::{self, Instant},
};
use tracing::{info, warn};

use super::context::RunContext;
use crate::scenario::{
    RunSettings, StepPlan,
    assertion::{AssertionOutcome, Condition, await_condition, deadline_after},
    report::{RunReport, StepFailure, StepResult, StepState, TimeoutScope},
    step::{Predicate, Step, StepKind, Value},
};

/// How a single step task ended.
#[derive(Debug)]
struct StepOutcome {
    state: StepState,
    observed: Option<Value>,
    return_code: Option<i32>,
    stdout: Option<String>,
    stderr: Option<String>,
    failure: Option<StepFailure>,
}

impl StepOutcome {
    const fn passed(observed: Option<Value>) -> Self {
        Self {
            state: StepState::Passed,
            observed,
            return_code: None,
            stdout: None,
            stderr: None,
            failure: None,
        }
    }

    const fn failed(state: StepState, failure: StepFailure) -> Self {
        Self {
            state,
            observed: None,
            return_code: None,
            stdout: None,
            stderr: None,
            failure: Some(failure),
        }
    }
}

type StepTaskOutput = (usize, StepOutcome);

/// Bookkeeping for one step while the run is in progress.
struct StepRecord {
    state: StepState,
    started: Option<Instant>,
    result: Option<StepResult>,
}

/// Walks a [`StepPlan`] and drives each step to a terminal state.
///
/// A step is spawned once all of its dependencies have passed. Steps whose
/// dependencies are ready at the same time run concurrently.
pub struct StepExecutor {
    context: Arc<RunContext>,
    run_timeout: Duration,
    poll_interval: Duration,
}

impl StepExecutor {
    #[must_use]
    pub const fn new(context: Arc<RunContext>, settings: &RunSettings) -> Self {
        Self {
            context,
            run_timeout: settings.run_timeout,
            poll_interval: settings.poll_interval,
        }
    }

    pub async fn execute(&self, plan: &StepPlan) -> RunReport {
        let run_started = Instant::now();
        let deadline = deadline_after(run_started, self.run_timeout);
        let mut records: Vec<StepRecord> = plan
            .steps()
            .iter()
            .map(|_| StepRecord {
                state: StepState::Pending,
                started: None,
                result: None,
            })
            .collect();
        let mut tasks: JoinSet<StepTaskOutput> = JoinSet::new();
        let mut task_steps: HashMap<TaskId, usize> = HashMap::new();
        let mut run_timed_out = false;

        info!(
            steps = plan.len(),
            run_timeout_secs = self.run_timeout.as_secs_f32(),
            "starting step execution"
        );

        loop {
            self.schedule(plan, &mut records, &mut tasks, &mut task_steps, run_started);
            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((id, (index, outcome)))) => {
                        task_steps.remove(&id);
                        finish(plan, &mut records, index, outcome, run_started);
                    }
                    Some(Err(join_err)) => {
                        if let Some(index) = task_steps.remove(&join_err.id()) {
                            let outcome = StepOutcome::failed(
                                StepState::Failed,
                                StepFailure::Panicked {
                                    message: join_err.to_string(),
                                },
                            );
                            finish(plan, &mut records, index, outcome, run_started);
                        }
                    }
                    None => break,
                },
                () = time::sleep_until(deadline) => {
                    run_timed_out = true;
                    break;
                }
            }
        }

        if run_timed_out {
            warn!(
                run_timeout_secs = self.run_timeout.as_secs_f32(),
                in_flight = tasks.len(),
                "run deadline exceeded, aborting remaining steps"
            );
            self.abort_remaining(plan, &mut records, &mut tasks, &mut task_steps, run_started)
                .await;
        }

        let steps = records
            .into_iter()
            .zip(plan.steps())
            .map(|(record, step)| {
                record.result.unwrap_or_else(|| {
                    skipped(step, StepFailure::Timeout {
                        scope: TimeoutScope::Run,
                        after: self.run_timeout,
                    })
                })
            })
            .collect();

        let report = RunReport::new(steps, run_started.elapsed(), run_timed_out);
        info!(
            passed = report.passed(),
            failed = report.failures().count(),
            elapsed_secs = report.elapsed().as_secs_f32(),
            "step execution finished"
        );
        report
    }

    /// Spawns every pending step whose dependencies all passed and skips the
    /// ones with a dependency that ended any other way. Dependencies always
    /// precede their dependents, so one forward pass propagates skips.
    fn schedule(
        &self,
        plan: &StepPlan,
        records: &mut [StepRecord],
        tasks: &mut JoinSet<StepTaskOutput>,
        task_steps: &mut HashMap<TaskId, usize>,
        run_started: Instant,
    ) {
        for (index, step) in plan.steps().iter().enumerate() {
            if records[index].state != StepState::Pending {
                continue;
            }

            let dependencies = plan.dependencies(index);
            if let Some(&blocked) = dependencies.iter().find(|&&dep| {
                let state = records[dep].state;
                state.is_terminal() && state != StepState::Passed
            }) {
                let dependency = plan.steps()[blocked].id.clone();
                warn!(step = %step.id, %dependency, "dependency did not pass, skipping step");
                records[index].state = StepState::Skipped;
                records[index].result = Some(skipped(
                    step,
                    StepFailure::DependencyNotPassed { dependency },
                ));
                continue;
            }

            if dependencies
                .iter()
                .all(|&dep| records[dep].state == StepState::Passed)
            {
                let started = Instant::now();
                info!(
                    step = %step.id,
                    actor = %step.actor,
                    at_secs = started.duration_since(run_started).as_secs_f32(),
                    "step started"
                );
                records[index].state = StepState::Running;
                records[index].started = Some(started);

                let context = Arc::clone(&self.context);
                let step = step.clone();
                let poll_interval = self.poll_interval;
                let handle = tasks.spawn(async move {
                    let outcome =
                        AssertUnwindSafe(run_step(context.as_ref(), &step, poll_interval))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| {
                                StepOutcome::failed(
                                    StepState::Failed,
                                    StepFailure::Panicked {
                                        message: panic_message(panic),
                                    },
                                )
                            });
                    (index, outcome)
                });
                task_steps.insert(handle.id(), index);
            }
        }
    }

    /// Aborts in-flight steps once the run deadline passes. Dropping a
    /// task drops its poll loop or script child.
    async fn abort_remaining(
        &self,
        plan: &StepPlan,
        records: &mut [StepRecord],
        tasks: &mut JoinSet<StepTaskOutput>,
        task_steps: &mut HashMap<TaskId, usize>,
        run_started: Instant,
    ) {
        tasks.abort_all();
        while let Some(joined) = tasks.join_next_with_id().await {
            // A task may have completed between the deadline and the abort.
            if let Ok((id, (index, outcome))) = joined {
                task_steps.remove(&id);
                finish(plan, records, index, outcome, run_started);
            }
        }

        for (index, step) in plan.steps().iter().enumerate() {
            match records[index].state {
                StepState::Running => {
                    let outcome = StepOutcome::failed(
                        StepState::TimedOut,
                        StepFailure::Timeout {
                            scope: TimeoutScope::Run,
                            after: self.run_timeout,
                        },
                    );
                    finish(plan, records, index, outcome, run_started);
                }
                StepState::Pending => {
                    records[index].state = StepState::Skipped;
                    records[index].result = Some(skipped(
                        step,
                        StepFailure::Timeout {
                            scope: TimeoutScope::Run,
                            after: self.run_timeout,
                        },
                    ));
                }
                _ => {}
            }
        }
    }
}

fn finish(
    plan: &StepPlan,
    records: &mut [StepRecord],
    index: usize,
    outcome: StepOutcome,
    run_started: Instant,
) {
    let step = &plan.steps()[index];
    let record = &mut records[index];
    let finished = Instant::now();
    let started = record.started.unwrap_or(finished);
    let elapsed = finished.duration_since(started);

    match &outcome.failure {
        None => info!(
            step = %step.id,
            elapsed_secs = elapsed.as_secs_f32(),
            "step passed"
        ),
        Some(failure) => warn!(
            step = %step.id,
            state = outcome.state.label(),
            elapsed_secs = elapsed.as_secs_f32(),
            %failure,
            "step did not pass"
        ),
    }

    record.state = outcome.state;
    record.result = Some(StepResult {
        id: step.id.clone(),
        actor: step.actor.clone(),
        line: step.line.clone(),
        state: outcome.state,
        observed: outcome.observed,
        return_code: outcome.return_code,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        failure: outcome.failure,
        started_at: Some(started.duration_since(run_started)),
        finished_at: Some(finished.duration_since(run_started)),
        elapsed,
    });
}

fn skipped(step: &Step, failure: StepFailure) -> StepResult {
    StepResult {
        id: step.id.clone(),
        actor: step.actor.clone(),
        line: step.line.clone(),
        state: StepState::Skipped,
        observed: None,
        return_code: None,
        stdout: None,
        stderr: None,
        failure: Some(failure),
        started_at: None,
        finished_at: None,
        elapsed: Duration::ZERO,
    }
}

async fn run_step(context: &RunContext, step: &Step, poll_interval: Duration) -> StepOutcome {
    match &step.kind {
        StepKind::Script {
            runtime,
            path,
            args,
            expected,
        } => {
            let Some(endpoint) = context.registry().get(&step.actor) else {
                return StepOutcome::failed(
                    StepState::Failed,
                    StepFailure::Report {
                        message: format!("node '{}' is not running", step.actor),
                    },
                );
            };
            let invoker = match context.invokers().get(*runtime) {
                Ok(invoker) => invoker,
                Err(err) => {
                    return StepOutcome::failed(
                        StepState::Failed,
                        StepFailure::Invocation {
                            message: err.to_string(),
                        },
                    );
                }
            };

            let target = endpoint.invocation_target();
            match time::timeout(step.timeout, invoker.invoke(&target, path, args)).await {
                Err(_) => StepOutcome::failed(
                    StepState::TimedOut,
                    StepFailure::Timeout {
                        scope: TimeoutScope::Step,
                        after: step.timeout,
                    },
                ),
                Ok(Err(err)) => StepOutcome::failed(
                    StepState::Failed,
                    StepFailure::Invocation {
                        message: err.to_string(),
                    },
                ),
                Ok(Ok(outcome)) => script_outcome(expected, outcome),
            }
        }
        StepKind::Report { metric, predicate } => {
            let result = await_condition(
                context.reporter(),
                &step.actor,
                Condition::Report { metric, predicate },
                step.timeout,
                poll_interval,
            )
            .await;
            assertion_outcome(
                result.outcome,
                result.observed,
                metric.to_string(),
                predicate.to_string(),
            )
        }
        StepKind::IsUp => {
            let result = await_condition(
                context.reporter(),
                &step.actor,
                Condition::IsUp,
                step.timeout,
                poll_interval,
            )
            .await;
            assertion_outcome(result.outcome, None, "node".to_owned(), "is up".to_owned())
        }
    }
}

fn script_outcome(
    expected: &Predicate,
    outcome: crate::scenario::InvocationOutcome,
) -> StepOutcome {
    let passed = outcome
        .return_code
        .is_some_and(|code| expected.holds_for_return_code(code));
    let failure = (!passed).then(|| StepFailure::UnexpectedReturnCode {
        return_code: outcome.return_code,
        expected: expected.to_string(),
    });

    StepOutcome {
        state: if passed {
            StepState::Passed
        } else {
            StepState::Failed
        },
        observed: outcome.return_code.map(|code| Value::Int(i64::from(code))),
        return_code: outcome.return_code,
        stdout: Some(outcome.stdout),
        stderr: Some(outcome.stderr),
        failure,
    }
}

fn assertion_outcome(
    outcome: AssertionOutcome,
    observed: Option<Value>,
    metric: String,
    predicate: String,
) -> StepOutcome {
    match outcome {
        AssertionOutcome::Passed => StepOutcome::passed(observed),
        AssertionOutcome::TimedOut { last_error } => StepOutcome {
            observed: observed.clone(),
            ..StepOutcome::failed(
                StepState::TimedOut,
                StepFailure::AssertionFailure {
                    metric,
                    predicate,
                    observed,
                    last_error,
                },
            )
        },
        AssertionOutcome::Failed { reason } => StepOutcome {
            observed,
            ..StepOutcome::failed(StepState::Failed, StepFailure::Report { message: reason })
        },
    }
}

/// Attempts to turn a panic payload into a readable string for diagnostics.
fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}
