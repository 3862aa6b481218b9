use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use testing_framework_config::{adjust_timeout, timeouts};
use thiserror::Error;
use tracing::{debug, info};

use super::{
    dsl::{DslError, parse_line},
    step::{Step, StepId, StepKind},
};
use crate::topology::{
    config::{HarnessSettings, StepDecl, StepEntry, TopologyFile, TopologyFileError},
    generation::{Topology, TopologyBuildError},
};

/// Malformed topology or step file. Always raised before any process starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    File(#[from] TopologyFileError),
    #[error(transparent)]
    Topology(#[from] TopologyBuildError),
    #[error("step {position}: {source}")]
    Dsl {
        position: usize,
        #[source]
        source: DslError,
    },
    #[error("step '{step}' targets unknown node '{node}'")]
    UnknownNode { step: StepId, node: String },
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: StepId, dependency: StepId },
    #[error("step '{step}' depends on '{dependency}', which is not declared before it")]
    ForwardDependency { step: StepId, dependency: StepId },
    #[error("duplicate step id '{id}'")]
    DuplicateStepId { id: StepId },
    #[error("parallel group at entry {position} is empty")]
    EmptyParallel { position: usize },
    #[error("{field} must be > 0")]
    ZeroDuration { field: &'static str },
}

/// Resolved run-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSettings {
    pub run_timeout: Duration,
    pub default_step_timeout: Duration,
    pub poll_interval: Duration,
    pub startup_grace: Duration,
    pub readiness: bool,
    pub readiness_timeout: Duration,
}

impl RunSettings {
    fn resolve(settings: &HarnessSettings) -> Result<Self, ConfigError> {
        let resolved = Self {
            run_timeout: settings
                .run_timeout
                .map_or_else(timeouts::run_timeout, adjust_timeout),
            default_step_timeout: settings
                .default_step_timeout
                .map_or_else(timeouts::step_timeout, adjust_timeout),
            poll_interval: settings
                .poll_interval
                .unwrap_or_else(timeouts::poll_interval),
            startup_grace: settings
                .startup_grace
                .unwrap_or_else(timeouts::startup_grace),
            readiness: settings.readiness.unwrap_or(true),
            readiness_timeout: settings
                .readiness_timeout
                .map_or_else(timeouts::readiness_timeout, adjust_timeout),
        };

        for (field, value) in [
            ("run_timeout_secs", resolved.run_timeout),
            ("default_step_timeout_secs", resolved.default_step_timeout),
            ("poll_interval_ms", resolved.poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        Ok(resolved)
    }
}

/// Steps in declaration order plus their dependency edges. Edges only point
/// backwards, so the graph is acyclic by construction.
#[derive(Clone, Debug, Default)]
pub struct StepPlan {
    steps: Vec<Step>,
    dependencies: Vec<Vec<usize>>,
}

impl StepPlan {
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Indices of the steps `index` waits for.
    #[must_use]
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    fn build(
        entries: &[StepEntry],
        topology: &Topology,
        default_timeout: Duration,
        base_dir: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut plan = Self::default();
        let mut ids: HashMap<StepId, usize> = HashMap::new();
        let mut previous_entry: Vec<usize> = Vec::new();

        for (position, entry) in entries.iter().enumerate() {
            let decls: &[StepDecl] = match entry {
                StepEntry::Single(decl) => std::slice::from_ref(decl),
                StepEntry::Parallel(group) => {
                    if group.parallel.is_empty() {
                        return Err(ConfigError::EmptyParallel { position });
                    }
                    &group.parallel
                }
            };

            let mut this_entry = Vec::with_capacity(decls.len());
            for decl in decls {
                let index = plan.steps.len();
                let id = decl
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("step-{}", index + 1));
                if ids.contains_key(&id) {
                    return Err(ConfigError::DuplicateStepId { id });
                }

                let parsed = parse_line(&decl.run).map_err(|source| ConfigError::Dsl {
                    position: index + 1,
                    source,
                })?;
                if topology.node(&parsed.actor).is_none() {
                    return Err(ConfigError::UnknownNode {
                        step: id,
                        node: parsed.actor,
                    });
                }

                let (after, dependencies) = match &decl.after {
                    Some(explicit) => {
                        let mut deps = Vec::with_capacity(explicit.len());
                        for dependency in explicit {
                            match ids.get(dependency) {
                                Some(&dep) => deps.push(dep),
                                None if decls_declare(entries, dependency) => {
                                    return Err(ConfigError::ForwardDependency {
                                        step: id,
                                        dependency: dependency.clone(),
                                    });
                                }
                                None => {
                                    return Err(ConfigError::UnknownDependency {
                                        step: id,
                                        dependency: dependency.clone(),
                                    });
                                }
                            }
                        }
                        (explicit.clone(), deps)
                    }
                    None => {
                        let after = previous_entry
                            .iter()
                            .map(|&dep| plan.steps[dep].id.clone())
                            .collect();
                        (after, previous_entry.clone())
                    }
                };

                let kind = resolve_script_path(parsed.kind, base_dir);
                debug!(step = %id, actor = %parsed.actor, ?dependencies, "step planned");

                plan.steps.push(Step {
                    id: id.clone(),
                    actor: parsed.actor,
                    kind,
                    timeout: parsed.within.map_or(default_timeout, adjust_timeout),
                    after,
                    line: decl.run.trim().to_owned(),
                });
                plan.dependencies.push(dependencies);
                ids.insert(id, index);
                this_entry.push(index);
            }
            previous_entry = this_entry;
        }

        Ok(plan)
    }
}

fn decls_declare(entries: &[StepEntry], id: &str) -> bool {
    entries.iter().any(|entry| match entry {
        StepEntry::Single(decl) => decl.id.as_deref() == Some(id),
        StepEntry::Parallel(group) => group
            .parallel
            .iter()
            .any(|decl| decl.id.as_deref() == Some(id)),
    })
}

fn resolve_script_path(kind: StepKind, base_dir: Option<&Path>) -> StepKind {
    match (kind, base_dir) {
        (
            StepKind::Script {
                runtime,
                path,
                args,
                expected,
            },
            Some(base),
        ) if path.is_relative() => StepKind::Script {
            runtime,
            path: base.join(path),
            args,
            expected,
        },
        (kind, _) => kind,
    }
}

/// Immutable run definition: the node graph, the step plan and settings.
#[derive(Clone, Debug)]
pub struct Scenario {
    topology: Topology,
    plan: StepPlan,
    settings: RunSettings,
}

impl Scenario {
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    #[must_use]
    pub const fn plan(&self) -> &StepPlan {
        &self.plan
    }

    #[must_use]
    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }
}

/// Builder used by callers to load and tweak a scenario before running it.
pub struct ScenarioBuilder {
    file: TopologyFile,
    base_dir: Option<PathBuf>,
    run_timeout: Option<Duration>,
    readiness: Option<bool>,
}

impl ScenarioBuilder {
    /// Load a topology file; relative script and command paths resolve
    /// against its directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = TopologyFile::load(path)?;
        let base_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);
        Ok(Self::new(file, base_dir))
    }

    pub fn from_yaml_str(content: &str, base_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self::new(TopologyFile::from_yaml_str(content)?, base_dir))
    }

    #[must_use]
    pub const fn new(file: TopologyFile, base_dir: Option<PathBuf>) -> Self {
        Self {
            file,
            base_dir,
            run_timeout: None,
            readiness: None,
        }
    }

    #[must_use]
    /// Override the run-level deadline from the file.
    pub const fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_readiness(mut self, enabled: bool) -> Self {
        self.readiness = Some(enabled);
        self
    }

    pub fn build(self) -> Result<Scenario, ConfigError> {
        let Self {
            file,
            base_dir,
            run_timeout,
            readiness,
        } = self;

        let mut settings = RunSettings::resolve(&file.settings)?;
        if let Some(timeout) = run_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroDuration {
                    field: "run timeout",
                });
            }
            settings.run_timeout = timeout;
        }
        if let Some(enabled) = readiness {
            settings.readiness = enabled;
        }

        let topology = Topology::from_config(&file.nodes, base_dir.as_deref())?;
        let plan = StepPlan::build(
            &file.steps,
            &topology,
            settings.default_step_timeout,
            base_dir.as_deref(),
        )?;

        info!(
            validators = topology.validators().count(),
            collators = topology.collators().count(),
            steps = plan.len(),
            run_timeout_secs = settings.run_timeout.as_secs(),
            "scenario built"
        );

        Ok(Scenario {
            topology,
            plan,
            settings,
        })
    }
}
