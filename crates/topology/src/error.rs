//! Error types for topology resolution.
//!
//! Every error is raised while the graph is validated or projected, before
//! anything is handed to a launcher. None of them are retryable: a malformed
//! graph stays malformed no matter how often it is resolved.

use std::fmt;
use thiserror::Error;

use crate::mode::ExecutionMode;

/// Result type alias for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of topology errors for user feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The declaration itself is wrong (cycles, dangling references, missing values).
    Validation,
    /// An internal ordering invariant was violated. Always a bug.
    Defect,
    /// The endpoint allocator could not assign an address.
    Allocation,
    /// The launcher failed to start a node.
    Launch,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid topology declaration",
            Self::Defect => "Internal scheduling defect",
            Self::Allocation => "Endpoint allocation failed",
            Self::Launch => "Launcher failure",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Fix the topology declaration and run again",
            Self::Defect => "Please report this as a bug, including the topology file",
            Self::Allocation => "Check declared ports and the publish domain",
            Self::Launch => "Inspect the failed node; already started nodes are left running",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while building, validating or projecting a topology.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A parameter has neither a supplied value nor a default.
    #[error("parameter '{name}' (owned by '{owner}') has no value and no default")]
    UnresolvedParameter {
        /// Parameter name
        name: String,
        /// Owning node, or `<unowned>`
        owner: String,
    },

    /// The dependency relation is not acyclic.
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected {
        /// Nodes on the cycle, in traversal order
        cycle: Vec<String>,
    },

    /// A node refers to a node or parameter that is not part of the graph.
    #[error("node '{node}' references '{target}', which is not declared")]
    DanglingReference {
        /// The referring node
        node: String,
        /// The missing target
        target: String,
    },

    /// A node refers to an endpoint its owner never declared.
    #[error("node '{node}' references endpoint '{endpoint}' of '{owner}', which is not declared")]
    UnknownEndpoint {
        /// The referring node
        node: String,
        /// Node that should own the endpoint
        owner: String,
        /// Endpoint name
        endpoint: String,
    },

    /// An environment was finalized before an endpoint it reads was resolved.
    #[error("environment of '{node}' finalized before endpoint '{endpoint}' was resolved")]
    ProjectionRace {
        /// Node whose environment was being finalized
        node: String,
        /// The unresolved endpoint, as `owner/name`
        endpoint: String,
    },

    /// An endpoint was assigned a concrete address twice.
    #[error("endpoint '{endpoint}' of '{owner}' was already resolved")]
    EndpointAlreadyResolved {
        /// Owning node
        owner: String,
        /// Endpoint name
        endpoint: String,
    },

    /// Two nodes were declared with the same id.
    #[error("node '{0}' is declared more than once")]
    DuplicateNode(String),

    /// An operation named a node that is not in the graph.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// The graph was built for one mode and projected for the other.
    #[error("topology was built for {graph} mode but projected for {requested} mode")]
    ModeMismatch {
        /// Mode the graph was constructed with
        graph: ExecutionMode,
        /// Mode requested at projection
        requested: ExecutionMode,
    },

    /// Two endpoints were bound to the same local port.
    #[error("port {port} is bound by both '{first}' and '{second}'")]
    PortConflict {
        /// The contested port
        port: u16,
        /// First binding, as `owner/name`
        first: String,
        /// Second binding, as `owner/name`
        second: String,
    },

    /// The allocator refused to assign an address.
    #[error("cannot allocate endpoint '{endpoint}' of '{node}': {message}")]
    Allocation {
        /// Owning node
        node: String,
        /// Endpoint name
        endpoint: String,
        /// Allocator message
        message: String,
    },

    /// A launcher reported a start failure.
    #[error("failed to launch '{node}': {message}")]
    Launch {
        /// Node that failed to start
        node: String,
        /// Launcher message
        message: String,
    },
}

impl Error {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProjectionRace { .. } | Self::EndpointAlreadyResolved { .. } => {
                ErrorCategory::Defect
            }
            Self::PortConflict { .. } | Self::Allocation { .. } => ErrorCategory::Allocation,
            Self::Launch { .. } => ErrorCategory::Launch,
            _ => ErrorCategory::Validation,
        }
    }

    /// Whether this error signals a programming defect rather than a bad declaration.
    pub fn is_defect(&self) -> bool {
        self.category() == ErrorCategory::Defect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = Error::CycleDetected {
            cycle: vec!["x".into(), "y".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: x -> y");
    }

    #[test]
    fn test_categories() {
        let race = Error::ProjectionRace {
            node: "frontend".into(),
            endpoint: "api/http".into(),
        };
        assert!(race.is_defect());
        assert_eq!(race.category().advice(), ErrorCategory::Defect.advice());

        let unresolved = Error::UnresolvedParameter {
            name: "FoundryProjectUrl".into(),
            owner: "chat".into(),
        };
        assert_eq!(unresolved.category(), ErrorCategory::Validation);
        assert!(!unresolved.is_defect());
        assert!(unresolved.to_string().contains("FoundryProjectUrl"));
        assert!(unresolved.to_string().contains("chat"));
    }
}
