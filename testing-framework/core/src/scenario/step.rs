use std::{fmt, path::PathBuf, time::Duration};

use serde::Serialize;
use serde_with::{DurationSecondsWithFrac, serde_as};

pub type StepId = String;

/// A value reported by a node or expected by a predicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    /// Integral tokens become `Int`, everything else stays text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.parse::<i64>()
            .map_or_else(|_| Self::Text(raw.to_owned()), Self::Int)
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "\"{value}\""),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "operand", rename_all = "snake_case")]
pub enum Predicate {
    Equals(Value),
    AtLeast(i64),
    AtMost(i64),
    GreaterThan(i64),
    LessThan(i64),
}

impl Predicate {
    /// Ordering predicates never hold for text values.
    #[must_use]
    pub fn holds(&self, observed: &Value) -> bool {
        match self {
            Self::Equals(expected) => expected == observed,
            Self::AtLeast(bound) => observed.as_int().is_some_and(|v| v >= *bound),
            Self::AtMost(bound) => observed.as_int().is_some_and(|v| v <= *bound),
            Self::GreaterThan(bound) => observed.as_int().is_some_and(|v| v > *bound),
            Self::LessThan(bound) => observed.as_int().is_some_and(|v| v < *bound),
        }
    }

    #[must_use]
    pub fn holds_for_return_code(&self, code: i32) -> bool {
        self.holds(&Value::Int(i64::from(code)))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(value) => write!(f, "is {value}"),
            Self::AtLeast(bound) => write!(f, "is at least {bound}"),
            Self::AtMost(bound) => write!(f, "is at most {bound}"),
            Self::GreaterThan(bound) => write!(f, "is greater than {bound}"),
            Self::LessThan(bound) => write!(f, "is lower than {bound}"),
        }
    }
}

/// Metric name plus label matchers, e.g. `block_height{status="best"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricQuery {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl MetricQuery {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Parse `name` or `name{key="value",...}`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some((name, rest)) = raw.split_once('{') else {
            return Ok(Self::new(raw));
        };
        let body = rest
            .strip_suffix('}')
            .ok_or_else(|| format!("unterminated label set in `{raw}`"))?;

        let mut query = Self::new(name);
        for pair in body.split(',').filter(|pair| !pair.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("label `{pair}` is not key=\"value\""))?;
            let value = value.trim().trim_matches('"');
            query = query.with_label(key.trim(), value);
        }
        Ok(query)
    }
}

impl fmt::Display for MetricQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        let labels = self
            .labels
            .iter()
            .map(|(key, value)| format!("{key}=\"{value}\""))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{{{labels}}}")
    }
}

/// Automation technology a script step is run with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptRuntime {
    /// `js-script`: run through a JavaScript interpreter.
    NodeJs,
    /// `run`: executed directly.
    Executable,
}

impl ScriptRuntime {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::NodeJs => "js-script",
            Self::Executable => "run",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Report {
        metric: MetricQuery,
        predicate: Predicate,
    },
    Script {
        runtime: ScriptRuntime,
        path: PathBuf,
        args: Vec<String>,
        /// Condition on the script's return code.
        expected: Predicate,
    },
    IsUp,
}

/// One executable unit of a run, bound to the node it acts on.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Step {
    pub id: StepId,
    pub actor: String,
    pub kind: StepKind,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub timeout: Duration,
    pub after: Vec<StepId>,
    /// Source DSL line, kept for reporting.
    pub line: String,
}
