//! Resource nodes
//!
//! A resource node is one deployable unit of the topology: a project, a
//! script-based process, a frontend application or a prebuilt container.
//! Nodes only *declare* things. Environment assignments are kept as an
//! ordered write log and collapsed during projection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::endpoint::{EndpointDecl, EndpointRef};
use crate::mode::{ByMode, ExecutionMode};
use crate::parameter::ParameterRef;
use crate::token::{self, Token};

/// Unique node identifier (the node's name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create an id from a name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The underlying name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// Kind of deployable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A compiled service project
    Project,
    /// A process started from a script (e.g. a Python agent)
    #[serde(alias = "script")]
    ScriptProcess,
    /// A frontend application served by a package manager dev server
    #[serde(alias = "frontend")]
    FrontendApp,
    /// A prebuilt container image (diagnostics, telemetry)
    Container,
}

impl ResourceKind {
    /// Lowercase label used in output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::ScriptProcess => "script",
            Self::FrontendApp => "frontend",
            Self::Container => "container",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A value bound to an environment variable or build argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Copied as-is (after placeholder substitution)
    Literal(String),
    /// Resolved through the parameter store
    Parameter(ParameterRef),
    /// Rendered from the owner's allocated endpoint
    Endpoint(EndpointRef),
    /// One value per execution mode, selected at projection
    ByMode(Box<ByMode<EnvValue>>),
}

impl EnvValue {
    /// A value that differs by mode
    pub fn by_mode(run: impl Into<EnvValue>, publish: impl Into<EnvValue>) -> Self {
        Self::ByMode(Box::new(ByMode::new(run.into(), publish.into())))
    }

    /// Parameters read by this value, across both mode arms
    pub fn parameters(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit(&mut |value| match value {
            EnvValue::Parameter(p) => out.push(p.name().to_string()),
            EnvValue::Literal(text) => {
                for t in token::scan(text) {
                    if let Token::Parameter(name) = t {
                        out.push(name);
                    }
                }
            }
            _ => {}
        });
        out
    }

    /// Endpoints read by this value, across both mode arms
    pub fn endpoints(&self) -> Vec<EndpointRef> {
        let mut out = Vec::new();
        self.visit(&mut |value| match value {
            EnvValue::Endpoint(e) => out.push(e.clone()),
            EnvValue::Literal(text) => {
                for t in token::scan(text) {
                    if let Token::Endpoint {
                        owner,
                        endpoint,
                        property,
                    } = t
                    {
                        out.push(EndpointRef::new(owner, endpoint).property(property));
                    }
                }
            }
            _ => {}
        });
        out
    }

    /// Endpoints read by the arm selected for `mode`
    pub fn endpoints_in(&self, mode: ExecutionMode) -> Vec<EndpointRef> {
        match self {
            EnvValue::ByMode(arms) => arms.select(mode).endpoints_in(mode),
            other => other.endpoints(),
        }
    }

    fn visit<F: FnMut(&EnvValue)>(&self, f: &mut F) {
        match self {
            EnvValue::ByMode(arms) => {
                arms.run.visit(f);
                arms.publish.visit(f);
            }
            other => f(other),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<ParameterRef> for EnvValue {
    fn from(value: ParameterRef) -> Self {
        Self::Parameter(value)
    }
}

impl From<&ParameterRef> for EnvValue {
    fn from(value: &ParameterRef) -> Self {
        Self::Parameter(value.clone())
    }
}

impl From<EndpointRef> for EnvValue {
    fn from(value: EndpointRef) -> Self {
        Self::Endpoint(value)
    }
}

impl From<&EndpointRef> for EnvValue {
    fn from(value: &EndpointRef) -> Self {
        Self::Endpoint(value.clone())
    }
}

impl From<ByMode<EnvValue>> for EnvValue {
    fn from(value: ByMode<EnvValue>) -> Self {
        Self::ByMode(Box::new(value))
    }
}

/// How a node is packaged for deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Packaging {
    /// Containerize with a generated image
    GeneratedImage {
        /// Image name; the launcher picks one when absent
        image: Option<String>,
    },
    /// Build from a supplied build file
    BuildFile {
        /// Path to the build file, relative to the node source
        path: PathBuf,
    },
}

/// Publish-only packaging annotation
///
/// Carried through projection untouched in publish mode and dropped in run
/// mode. The engine never acts on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSpec {
    pub packaging: Packaging,
    /// Hosting target understood by the launcher (e.g. "container-app")
    pub compute: Option<String>,
    pub build_args: Vec<(String, EnvValue)>,
}

impl PublishSpec {
    /// Containerize with a generated image
    pub fn generated_image(image: Option<String>) -> Self {
        Self {
            packaging: Packaging::GeneratedImage { image },
            compute: None,
            build_args: Vec::new(),
        }
    }

    /// Build from the conventional `Dockerfile`
    pub fn dockerfile() -> Self {
        Self::build_file("Dockerfile")
    }

    /// Build from a supplied build file
    pub fn build_file(path: impl Into<PathBuf>) -> Self {
        Self {
            packaging: Packaging::BuildFile { path: path.into() },
            compute: None,
            build_args: Vec::new(),
        }
    }

    /// Set the hosting target
    pub fn with_compute(mut self, compute: impl Into<String>) -> Self {
        self.compute = Some(compute.into());
        self
    }

    /// Add a build argument
    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.build_args.push((key.into(), value.into()));
        self
    }
}

/// A declared unit of deployment
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub id: NodeId,
    pub kind: ResourceKind,
    pub display_name: String,
    /// Project path, script directory or app directory
    pub source: Option<PathBuf>,
    /// Script or image to start
    pub entrypoint: Option<String>,
    /// Ordered environment writes; later writes win per key
    pub env_writes: Vec<(String, EnvValue)>,
    pub endpoints: Vec<EndpointDecl>,
    /// Nodes that must be ready first, in declaration order
    pub depends_on: Vec<NodeId>,
    /// Nodes whose endpoints are injected as service-discovery entries
    pub references: Vec<NodeId>,
    pub publish: Option<PublishSpec>,
    pub otlp_exporter: bool,
    pub annotations: BTreeMap<String, String>,
}

impl ResourceNode {
    /// Create a bare node
    pub fn new(id: impl Into<NodeId>, kind: ResourceKind) -> Self {
        let id = id.into();
        Self {
            display_name: id.to_string(),
            id,
            kind,
            source: None,
            entrypoint: None,
            env_writes: Vec::new(),
            endpoints: Vec::new(),
            depends_on: Vec::new(),
            references: Vec::new(),
            publish: None,
            otlp_exporter: false,
            annotations: BTreeMap::new(),
        }
    }

    /// Append an environment write
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<EnvValue>) {
        self.env_writes.push((key.into(), value.into()));
    }

    /// Record a dependency, ignoring duplicates
    pub fn add_dependency(&mut self, on: NodeId) {
        if !self.depends_on.contains(&on) {
            self.depends_on.push(on);
        }
    }

    /// Record a reference, ignoring duplicates
    pub fn add_reference(&mut self, target: NodeId) {
        if !self.references.contains(&target) {
            self.references.push(target);
        }
    }

    /// Look up a declared endpoint
    pub fn endpoint(&self, name: &str) -> Option<&EndpointDecl> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// The write log collapsed last-write-wins
    pub fn environment(&self) -> BTreeMap<&str, &EnvValue> {
        self.env_writes
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    /// Every value this node binds: environment and build arguments
    pub fn bound_values(&self) -> impl Iterator<Item = &EnvValue> {
        self.env_writes.iter().map(|(_, v)| v).chain(
            self.publish
                .iter()
                .flat_map(|p| p.build_args.iter().map(|(_, v)| v)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointProperty;
    use crate::parameter::ParameterStore;

    #[test]
    fn test_last_write_wins() {
        let mut node = ResourceNode::new("chat", ResourceKind::ScriptProcess);
        node.set_env("FRONTEND_URL", "a");
        node.set_env("AGENT_ID", "x");
        node.set_env("FRONTEND_URL", "b");

        assert_eq!(node.env_writes.len(), 3);
        let env = node.environment();
        assert_eq!(env.len(), 2);
        assert_eq!(env["FRONTEND_URL"], &EnvValue::from("b"));
    }

    #[test]
    fn test_dependencies_dedup() {
        let mut node = ResourceNode::new("frontend", ResourceKind::FrontendApp);
        node.add_dependency(NodeId::from("api"));
        node.add_dependency(NodeId::from("chat"));
        node.add_dependency(NodeId::from("api"));
        assert_eq!(node.depends_on, vec![NodeId::from("api"), NodeId::from("chat")]);
    }

    #[test]
    fn test_value_references_cover_both_arms_and_tokens() {
        let mut store = ParameterStore::new();
        let url = store.declare("FoundryProjectUrl", None);
        let api = EndpointRef::new("api", "http");

        let value = EnvValue::by_mode(
            EnvValue::from(&api),
            format!("{}/v1?project={url}", api.property(EndpointProperty::Host)),
        );
        assert_eq!(value.parameters(), vec!["FoundryProjectUrl"]);
        assert_eq!(value.endpoints().len(), 2);
        assert_eq!(value.endpoints_in(ExecutionMode::Run), vec![api.clone()]);
        assert_eq!(
            value.endpoints_in(ExecutionMode::Publish),
            vec![api.property(EndpointProperty::Host)]
        );
    }

    #[test]
    fn test_bound_values_include_build_args() {
        let mut node = ResourceNode::new("frontend", ResourceKind::FrontendApp);
        node.set_env("BROWSER", "none");
        node.publish = Some(
            PublishSpec::dockerfile().with_build_arg(
                "REACT_APP_USE_MOCK_DATA",
                EnvValue::by_mode("true", "false"),
            ),
        );
        assert_eq!(node.bound_values().count(), 2);
    }
}
