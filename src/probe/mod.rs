//! Dependency probes and the outcome vocabulary they share.
//!
//! Each probe exercises one external dependency with a real round-trip and
//! reduces everything that happened to a single [`ProbeOutcome`]. Probes never
//! return an error: the conversion from [`ProbeError`](crate::error::ProbeError)
//! to `Fail` happens inside the probe, and the [`orchestrator`] only merges.

pub mod cache;
pub mod orchestrator;
pub mod queue;
pub mod relational;

#[cfg(test)]
pub(crate) mod fakes;

use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

pub use orchestrator::Prober;

/// Outcome of one probe run against one dependency.
///
/// Serialises as `{"result": "success" | "partial_success" | "fail", ...}` with
/// the probe-specific details flattened next to the tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The round-trip fully matched expectations.
    Success {
        #[serde(flatten)]
        details: Map<String, Value>,
    },
    /// Every call completed without a hard error but correctness was not confirmed.
    PartialSuccess {
        #[serde(flatten)]
        details: Map<String, Value>,
    },
    /// A call raised an error; only its message is kept.
    Fail { error: String },
}

impl ProbeOutcome {
    /// Build a `Success` from a JSON object. Non-object values are stored under `"details"`.
    pub fn success(details: Value) -> Self {
        Self::Success { details: into_map(details) }
    }

    pub fn partial(details: Value) -> Self {
        Self::PartialSuccess { details: into_map(details) }
    }

    pub fn fail(error: impl fmt::Display) -> Self {
        let error = error.to_string();
        Self::Fail {
            error: if error.is_empty() { "unknown error".into() } else { error },
        }
    }

    /// Wire name of the outcome's tag.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::PartialSuccess { .. } => "partial_success",
            Self::Fail { .. } => "fail",
        }
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[cfg(test)]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialSuccess { .. })
    }

    #[cfg(test)]
    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    #[cfg(test)]
    /// Probe-specific details, empty for `Fail`.
    pub fn details(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Success { details } | Self::PartialSuccess { details } => Some(details),
            Self::Fail { .. } => None,
        }
    }
}

fn into_map(details: Value) -> Map<String, Value> {
    match details {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("details".into(), other);
            map
        }
    }
}

/// The three dependencies a probe run covers.
///
/// Serialised with the names clients see in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Dependency {
    #[serde(rename = "postgres")]
    Relational,
    #[serde(rename = "redis")]
    Cache,
    #[serde(rename = "kafka")]
    Queue,
}

impl Dependency {
    pub const ALL: [Dependency; 3] = [Self::Relational, Self::Cache, Self::Queue];
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Relational => "relational",
            Self::Cache => "cache",
            Self::Queue => "queue",
        })
    }
}

/// One outcome per dependency, always all three.
///
/// Starts with a `Fail` placeholder for every dependency so the aggregate is
/// structurally complete even when a probe never reports back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregateResult(BTreeMap<Dependency, ProbeOutcome>);

impl AggregateResult {
    pub fn new() -> Self {
        Self(
            Dependency::ALL
                .into_iter()
                .map(|dep| (dep, ProbeOutcome::fail(format!("{dep} probe did not run"))))
                .collect(),
        )
    }

    pub fn record(&mut self, dependency: Dependency, outcome: ProbeOutcome) {
        self.0.insert(dependency, outcome);
    }

    pub fn get(&self, dependency: Dependency) -> &ProbeOutcome {
        // Every key is inserted in `new` and never removed.
        &self.0[&dependency]
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (Dependency, &ProbeOutcome)> {
        self.0.iter().map(|(dep, outcome)| (*dep, outcome))
    }
}

impl Default for AggregateResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase alphanumeric suffix of length `len` (at most 32) drawn from a v4 UUID.
pub(crate) fn random_suffix(len: usize) -> String {
    let mut s = Uuid::new_v4().simple().to_string();
    s.truncate(len.min(32));
    s
}
