use serde::{Deserialize, Serialize};

/// Identity of a scheduled scenario.
///
/// Opaque to the scheduler. The orchestrator generates a fresh one for every enabled scenario in
/// the configuration, but any string is accepted.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct ScenarioId(String);

impl ScenarioId {
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScenarioId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ScenarioId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of a single firing of a scenario.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
