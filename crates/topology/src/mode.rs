//! Execution mode and mode-conditional values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether the topology is being run locally or prepared for deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Local development run
    #[default]
    Run,
    /// Packaged deployment
    Publish,
}

impl ExecutionMode {
    /// Check if this is publish mode
    pub fn is_publish(&self) -> bool {
        matches!(self, Self::Publish)
    }

    /// Lowercase name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "run" => Ok(Self::Run),
            "publish" => Ok(Self::Publish),
            other => Err(format!("unknown execution mode '{other}' (expected run or publish)")),
        }
    }
}

/// A setting with one value per execution mode
///
/// Construction declares both arms; only projection selects one. This keeps
/// mode checks out of graph-building code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByMode<T> {
    /// Value used in run mode
    pub run: T,
    /// Value used in publish mode
    pub publish: T,
}

impl<T> ByMode<T> {
    /// Declare both arms
    pub fn new(run: T, publish: T) -> Self {
        Self { run, publish }
    }

    /// Select the arm for `mode`
    pub fn select(&self, mode: ExecutionMode) -> &T {
        match mode {
            ExecutionMode::Run => &self.run,
            ExecutionMode::Publish => &self.publish,
        }
    }

    /// Transform both arms
    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> ByMode<U> {
        ByMode {
            run: f(self.run),
            publish: f(self.publish),
        }
    }
}

impl<T: Clone> ByMode<T> {
    /// The same value in both modes
    pub fn same(value: T) -> Self {
        Self {
            run: value.clone(),
            publish: value,
        }
    }
}
