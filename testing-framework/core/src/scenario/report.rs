use std::{fmt, time::Duration};

use serde::Serialize;
use serde_with::{DurationSecondsWithFrac, serde_as};
use thiserror::Error;

use super::step::{StepId, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Passed,
    Failed,
    TimedOut,
    /// Never attempted because a dependency did not pass or the run ended.
    Skipped,
}

impl StepState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    Step,
    Run,
}

#[serde_as]
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    #[error("script could not run: {message}")]
    Invocation { message: String },
    #[error("script returned {}, expected return {expected}", display_code(*.return_code))]
    UnexpectedReturnCode {
        return_code: Option<i32>,
        expected: String,
    },
    #[error("expected `{metric} {predicate}`, last observed {}{}",
        display_observed(.observed.as_ref()),
        .last_error.as_ref().map(|e| format!(" ({e})")).unwrap_or_default())]
    AssertionFailure {
        metric: String,
        predicate: String,
        observed: Option<Value>,
        last_error: Option<String>,
    },
    #[error("node reporting failed: {message}")]
    Report { message: String },
    #[error("{} deadline of {:.1}s exceeded", scope_label(*.scope), .after.as_secs_f64())]
    Timeout {
        scope: TimeoutScope,
        #[serde_as(as = "DurationSecondsWithFrac<f64>")]
        #[serde(rename = "after_secs")]
        after: Duration,
    },
    #[error("dependency '{dependency}' did not pass")]
    DependencyNotPassed { dependency: StepId },
    #[error("step panicked: {message}")]
    Panicked { message: String },
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "no code (terminated by signal)".to_owned(), |c| c.to_string())
}

fn display_observed(observed: Option<&Value>) -> String {
    observed.map_or_else(|| "nothing".to_owned(), ToString::to_string)
}

const fn scope_label(scope: TimeoutScope) -> &'static str {
    match scope {
        TimeoutScope::Step => "step",
        TimeoutScope::Run => "run",
    }
}

/// Final record of one step.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub id: StepId,
    pub actor: String,
    pub line: String,
    pub state: StepState,
    pub observed: Option<Value>,
    pub return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub failure: Option<StepFailure>,
    /// Offset from run start at which the step began; `None` if never run.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    #[serde(rename = "started_at_secs")]
    pub started_at: Option<Duration>,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    #[serde(rename = "finished_at_secs")]
    pub finished_at: Option<Duration>,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(rename = "elapsed_secs")]
    pub elapsed: Duration,
}

impl StepResult {
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.state, StepState::Passed)
    }
}

/// Aggregated outcome of a run. Read-only once produced.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    steps: Vec<StepResult>,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(rename = "elapsed_secs")]
    elapsed: Duration,
    run_timed_out: bool,
}

impl RunReport {
    #[must_use]
    pub const fn new(steps: Vec<StepResult>, elapsed: Duration, run_timed_out: bool) -> Self {
        Self {
            steps,
            elapsed,
            run_timed_out,
        }
    }

    /// True when every step passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.run_timed_out && self.steps.iter().all(StepResult::passed)
    }

    #[must_use]
    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|step| !step.passed())
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub const fn run_timed_out(&self) -> bool {
        self.run_timed_out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passed = self.steps.iter().filter(|step| step.passed()).count();
        writeln!(
            f,
            "run {}: {passed}/{} steps passed in {:.1}s{}",
            if self.passed() { "passed" } else { "failed" },
            self.steps.len(),
            self.elapsed.as_secs_f64(),
            if self.run_timed_out {
                " (run deadline exceeded)"
            } else {
                ""
            }
        )?;

        for step in &self.steps {
            write!(
                f,
                "  [{:>9}] {} ({:.1}s) {}",
                step.state.label(),
                step.id,
                step.elapsed.as_secs_f64(),
                step.line
            )?;
            if let Some(failure) = &step.failure {
                write!(f, "\n              -> {failure}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
