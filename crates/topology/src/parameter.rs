//! Parameter store
//!
//! Parameters are named configuration values (external endpoint URLs, agent
//! identifiers, ...) that are supplied from outside the topology or fall back
//! to a declared default. The store also keeps lineage: which node a
//! parameter is parented to, and which nodes consume it.

use std::fmt;

use crate::error::{Error, Result};
use crate::resource::NodeId;

/// Owner reported for parameters nobody claimed
pub const UNOWNED: &str = "<unowned>";

/// Handle to a declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterRef {
    name: String,
}

impl ParameterRef {
    /// Parameter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder token embedded into literals before projection
    pub fn token(&self) -> String {
        format!("{{{}.value}}", self.name)
    }
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// A declared parameter and its bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterEntry {
    pub name: String,
    pub default: Option<String>,
    pub supplied: Option<String>,
    pub secret: bool,
    pub parent: Option<NodeId>,
    pub consumers: Vec<NodeId>,
}

impl ParameterEntry {
    /// Effective value: supplied wins over default
    pub fn value(&self) -> Option<&str> {
        self.supplied.as_deref().or(self.default.as_deref())
    }

    /// Node reported as owner in diagnostics
    pub fn owner(&self) -> String {
        self.parent
            .as_ref()
            .or(self.consumers.first())
            .map_or_else(|| UNOWNED.to_string(), ToString::to_string)
    }
}

/// Named configuration values, in declaration order
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    entries: Vec<ParameterEntry>,
}

impl ParameterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter, optionally with a default
    ///
    /// Redeclaring an existing name returns the same handle and keeps the
    /// first default.
    pub fn declare(&mut self, name: impl Into<String>, default: Option<String>) -> ParameterRef {
        self.declare_entry(name.into(), default, false)
    }

    /// Declare a parameter whose value is masked in diagnostics
    pub fn declare_secret(
        &mut self,
        name: impl Into<String>,
        default: Option<String>,
    ) -> ParameterRef {
        self.declare_entry(name.into(), default, true)
    }

    fn declare_entry(&mut self, name: String, default: Option<String>, secret: bool) -> ParameterRef {
        match self.entry_mut(&name) {
            Some(entry) => {
                entry.secret |= secret;
                if entry.default.is_none() {
                    entry.default = default;
                }
            }
            None => {
                log::debug!("declared parameter '{name}'");
                self.entries.push(ParameterEntry {
                    name: name.clone(),
                    default,
                    supplied: None,
                    secret,
                    parent: None,
                    consumers: Vec::new(),
                });
            }
        }
        ParameterRef { name }
    }

    /// Record an externally supplied value
    ///
    /// Supplying a value for a name that was never declared declares it.
    pub fn supply(&mut self, name: &str, value: impl Into<String>) -> ParameterRef {
        let handle = self.declare(name, None);
        if let Some(entry) = self.entry_mut(name) {
            entry.supplied = Some(value.into());
        }
        handle
    }

    /// Parent a parameter to a node for lineage display
    pub fn with_parent(&mut self, parameter: &ParameterRef, node: &NodeId) -> Result<()> {
        let entry = self
            .entry_mut(parameter.name())
            .ok_or_else(|| Error::DanglingReference {
                node: node.to_string(),
                target: parameter.name().to_string(),
            })?;
        entry.parent = Some(node.clone());
        Ok(())
    }

    /// Record that `node` reads `parameter`
    pub fn record_consumer(&mut self, parameter: &ParameterRef, node: &NodeId) {
        if let Some(entry) = self.entry_mut(parameter.name())
            && !entry.consumers.contains(node)
        {
            entry.consumers.push(node.clone());
        }
    }

    /// Resolve a parameter to its value
    pub fn resolve(&self, parameter: &ParameterRef) -> Result<String> {
        self.resolve_name(parameter.name())
    }

    /// Resolve a parameter by name
    pub fn resolve_name(&self, name: &str) -> Result<String> {
        let entry = self.get(name).ok_or_else(|| Error::DanglingReference {
            node: UNOWNED.to_string(),
            target: name.to_string(),
        })?;
        entry
            .value()
            .map(str::to_string)
            .ok_or_else(|| Error::UnresolvedParameter {
                name: entry.name.clone(),
                owner: entry.owner(),
            })
    }

    /// Errors for every parameter that cannot be resolved, in declaration order
    pub fn unresolved(&self) -> Vec<Error> {
        self.entries
            .iter()
            .filter(|e| e.value().is_none())
            .map(|e| Error::UnresolvedParameter {
                name: e.name.clone(),
                owner: e.owner(),
            })
            .collect()
    }

    /// Check whether a parameter is declared
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a parameter entry
    pub fn get(&self, name: &str) -> Option<&ParameterEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Nodes that consume a parameter
    pub fn consumers(&self, name: &str) -> &[NodeId] {
        self.get(name).map_or(&[], |e| e.consumers.as_slice())
    }

    /// Node a parameter is parented to
    pub fn parent(&self, name: &str) -> Option<&NodeId> {
        self.get(name).and_then(|e| e.parent.as_ref())
    }

    /// All entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ParameterEntry> {
        self.entries.iter()
    }

    /// Number of declared parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no parameters are declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut ParameterEntry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplied_wins_over_default() {
        let mut store = ParameterStore::new();
        let url = store.declare("FoundryProjectUrl", Some("http://default".into()));
        assert_eq!(store.resolve(&url).unwrap(), "http://default");

        store.supply("FoundryProjectUrl", "https://foundry.example");
        assert_eq!(store.resolve(&url).unwrap(), "https://foundry.example");
    }

    #[test]
    fn test_unresolved_names_parent() {
        let mut store = ParameterStore::new();
        let agent_id = store.declare("FoundryAgentId", None);
        store.with_parent(&agent_id, &NodeId::from("chat")).unwrap();

        let err = store.resolve(&agent_id).unwrap_err();
        assert_eq!(
            err,
            Error::UnresolvedParameter {
                name: "FoundryAgentId".into(),
                owner: "chat".into(),
            }
        );
    }

    #[test]
    fn test_owner_falls_back_to_first_consumer() {
        let mut store = ParameterStore::new();
        let p = store.declare("Key", None);
        assert_eq!(store.get("Key").unwrap().owner(), UNOWNED);

        store.record_consumer(&p, &NodeId::from("sitter"));
        store.record_consumer(&p, &NodeId::from("orchestrator"));
        store.record_consumer(&p, &NodeId::from("sitter"));
        assert_eq!(store.consumers("Key").len(), 2);
        assert_eq!(store.get("Key").unwrap().owner(), "sitter");
    }

    #[test]
    fn test_redeclare_keeps_first_default() {
        let mut store = ParameterStore::new();
        store.declare("p", Some("a".into()));
        let again = store.declare_secret("p", Some("b".into()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.resolve(&again).unwrap(), "a");
        assert!(store.get("p").unwrap().secret);
    }

    #[test]
    fn test_unresolved_lists_in_declaration_order() {
        let mut store = ParameterStore::new();
        store.declare("b", None);
        store.declare("a", Some("x".into()));
        store.declare("c", None);
        let names: Vec<_> = store
            .unresolved()
            .into_iter()
            .map(|e| match e {
                Error::UnresolvedParameter { name, .. } => name,
                other => panic!("unexpected {other}"),
            })
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_token() {
        let mut store = ParameterStore::new();
        let p = store.declare("FoundryProjectUrl", None);
        assert_eq!(p.to_string(), "{FoundryProjectUrl.value}");
    }
}
