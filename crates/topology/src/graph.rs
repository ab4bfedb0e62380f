//! Topology construction
//!
//! [`TopologyBuilder`] is the mutable declaration phase: nodes, parameters,
//! endpoints and edges are added in any order, from any number of call
//! sites. [`TopologyBuilder::build`] validates the declaration and freezes it
//! into a [`Topology`], which is never mutated afterwards.

use std::path::PathBuf;

use crate::endpoint::{EndpointDecl, EndpointRef};
use crate::error::{Error, Result};
use crate::mode::ExecutionMode;
use crate::parameter::{ParameterRef, ParameterStore};
use crate::resource::{EnvValue, NodeId, PublishSpec, ResourceKind, ResourceNode};
use crate::scheduler;

/// Mutable topology declaration
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    mode: ExecutionMode,
    nodes: Vec<ResourceNode>,
    parameters: ParameterStore,
    otlp_endpoint: Option<EnvValue>,
}

impl TopologyBuilder {
    /// Start a declaration for `mode`
    ///
    /// The mode is fixed here so existence predicates (nodes that only exist
    /// when publishing) are evaluated once, while building.
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            nodes: Vec::new(),
            parameters: ParameterStore::new(),
            otlp_endpoint: None,
        }
    }

    /// Mode this topology is declared for
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Add a fully formed node
    pub fn add_node(&mut self, node: ResourceNode) -> Result<NodeId> {
        if self.index_of(&node.id).is_some() {
            return Err(Error::DuplicateNode(node.id.to_string()));
        }
        let id = node.id.clone();
        let consumed: Vec<String> = node.bound_values().flat_map(EnvValue::parameters).collect();
        for name in consumed {
            self.record_consumer(&name, &id);
        }
        log::debug!("added {} node '{id}'", node.kind);
        self.nodes.push(node);
        Ok(id)
    }

    /// Add a service project
    pub fn add_project(
        &mut self,
        id: impl Into<NodeId>,
        path: impl Into<PathBuf>,
    ) -> Result<NodeBuilder<'_>> {
        let mut node = ResourceNode::new(id, ResourceKind::Project);
        node.source = Some(path.into());
        self.add_and_edit(node)
    }

    /// Add a script-based process
    pub fn add_script(
        &mut self,
        id: impl Into<NodeId>,
        dir: impl Into<PathBuf>,
        script: impl Into<String>,
    ) -> Result<NodeBuilder<'_>> {
        let mut node = ResourceNode::new(id, ResourceKind::ScriptProcess);
        node.source = Some(dir.into());
        node.entrypoint = Some(script.into());
        self.add_and_edit(node)
    }

    /// Add a frontend application
    pub fn add_frontend(
        &mut self,
        id: impl Into<NodeId>,
        dir: impl Into<PathBuf>,
    ) -> Result<NodeBuilder<'_>> {
        let mut node = ResourceNode::new(id, ResourceKind::FrontendApp);
        node.source = Some(dir.into());
        self.add_and_edit(node)
    }

    /// Add a prebuilt container
    pub fn add_container(
        &mut self,
        id: impl Into<NodeId>,
        image: impl Into<String>,
    ) -> Result<NodeBuilder<'_>> {
        let mut node = ResourceNode::new(id, ResourceKind::Container);
        node.entrypoint = Some(image.into());
        self.add_and_edit(node)
    }

    fn add_and_edit(&mut self, node: ResourceNode) -> Result<NodeBuilder<'_>> {
        let id = self.add_node(node)?;
        self.node(&id)
    }

    /// Continue declaring an existing node
    pub fn node(&mut self, id: &NodeId) -> Result<NodeBuilder<'_>> {
        let index = self
            .index_of(id)
            .ok_or_else(|| Error::UnknownNode(id.to_string()))?;
        Ok(NodeBuilder {
            builder: self,
            index,
        })
    }

    /// Record that `from` must not be ready before `to`
    pub fn add_dependency(&mut self, from: &NodeId, to: &NodeId) -> Result<()> {
        self.node(from)?.wait_for(to);
        Ok(())
    }

    /// Append an environment write to `id`
    ///
    /// Writes from later call sites win per key.
    pub fn with_environment(
        &mut self,
        id: &NodeId,
        key: impl Into<String>,
        value: impl Into<EnvValue>,
    ) -> Result<()> {
        self.node(id)?.with_environment(key, value);
        Ok(())
    }

    /// Deferred reference to `owner`'s `endpoint`
    ///
    /// The endpoint does not have to exist yet; [`build`](Self::build)
    /// checks it.
    pub fn endpoint(&self, owner: &NodeId, endpoint: &str) -> EndpointRef {
        EndpointRef::new(owner, endpoint)
    }

    /// Declare a parameter
    pub fn declare_parameter(
        &mut self,
        name: impl Into<String>,
        default: Option<String>,
    ) -> ParameterRef {
        self.parameters.declare(name, default)
    }

    /// The parameter store
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    /// The parameter store, for supplying values and lineage
    pub fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.parameters
    }

    /// Collector endpoint handed to nodes that export telemetry
    pub fn otlp_endpoint(&mut self, value: impl Into<EnvValue>) {
        let value = value.into();
        self.otlp_endpoint = Some(value);
    }

    /// Nodes declared so far, in declaration order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Startup order of the current declaration
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        scheduler::topological_order(&self.nodes)
    }

    /// Validate the declaration and freeze it
    pub fn build(self) -> Result<Topology> {
        self.validate()?;
        let order = scheduler::topological_order(&self.nodes)?;
        log::info!(
            "built {} topology: {} nodes, {} parameters",
            self.mode,
            self.nodes.len(),
            self.parameters.len()
        );
        Ok(Topology {
            mode: self.mode,
            nodes: self.nodes,
            parameters: self.parameters,
            otlp_endpoint: self.otlp_endpoint,
            order,
        })
    }

    fn validate(&self) -> Result<()> {
        for entry in self.parameters.iter() {
            if let Some(parent) = &entry.parent
                && self.index_of(parent).is_none()
            {
                return Err(Error::DanglingReference {
                    node: parent.to_string(),
                    target: entry.name.clone(),
                });
            }
        }

        for node in &self.nodes {
            for target in node.depends_on.iter().chain(&node.references) {
                if self.index_of(target).is_none() {
                    return Err(Error::DanglingReference {
                        node: node.id.to_string(),
                        target: target.to_string(),
                    });
                }
            }

            let values = node
                .bound_values()
                .chain(self.otlp_endpoint.iter().filter(|_| node.otlp_exporter));
            for value in values {
                self.check_value(&node.id, value)?;
            }
        }
        Ok(())
    }

    fn check_value(&self, node: &NodeId, value: &EnvValue) -> Result<()> {
        for name in value.parameters() {
            if !self.parameters.contains(&name) {
                return Err(Error::DanglingReference {
                    node: node.to_string(),
                    target: name,
                });
            }
        }
        for reference in value.endpoints_in(self.mode) {
            let Some(owner) = self.index_of(&reference.owner).map(|i| &self.nodes[i]) else {
                return Err(Error::DanglingReference {
                    node: node.to_string(),
                    target: reference.owner.to_string(),
                });
            };
            if owner.endpoint(&reference.endpoint).is_none() {
                return Err(Error::UnknownEndpoint {
                    node: node.to_string(),
                    owner: reference.owner.to_string(),
                    endpoint: reference.endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    fn record_consumer(&mut self, parameter: &str, node: &NodeId) {
        if self.parameters.contains(parameter) {
            let handle = self.parameters.declare(parameter, None);
            self.parameters.record_consumer(&handle, node);
        }
    }
}

/// Fluent declaration of a single node
pub struct NodeBuilder<'a> {
    builder: &'a mut TopologyBuilder,
    index: usize,
}

impl NodeBuilder<'_> {
    fn node_mut(&mut self) -> &mut ResourceNode {
        &mut self.builder.nodes[self.index]
    }

    /// Id of the node being declared
    pub fn id(&self) -> NodeId {
        self.builder.nodes[self.index].id.clone()
    }

    /// Deferred reference to one of this node's endpoints
    pub fn endpoint(&self, name: &str) -> EndpointRef {
        EndpointRef::new(self.id(), name)
    }

    /// Set the name shown in dashboards and output
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.node_mut().display_name = name.into();
        self
    }

    /// Append an environment write
    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        let value = value.into();
        let id = self.id();
        for name in value.parameters() {
            self.builder.record_consumer(&name, &id);
        }
        self.node_mut().set_env(key, value);
        self
    }

    /// Declare an endpoint, replacing one with the same name
    pub fn with_endpoint(mut self, decl: EndpointDecl) -> Self {
        let node = self.node_mut();
        node.endpoints.retain(|e| e.name != decl.name);
        node.endpoints.push(decl);
        self
    }

    /// Declare the conventional "http" endpoint
    pub fn with_http_endpoint(self, target_port: u16) -> Self {
        self.with_endpoint(EndpointDecl::http(target_port))
    }

    /// Make every declared endpoint externally reachable
    pub fn with_external_http_endpoints(mut self) -> Self {
        for endpoint in &mut self.node_mut().endpoints {
            endpoint.external = true;
        }
        self
    }

    /// Do not consider this node ready before `other`
    pub fn wait_for(mut self, other: &NodeId) -> Self {
        self.node_mut().add_dependency(other.clone());
        self
    }

    /// Inject service-discovery entries for `other`'s endpoints
    pub fn with_reference(mut self, other: &NodeId) -> Self {
        self.node_mut().add_reference(other.clone());
        self
    }

    /// Bind `<OTHER>_URL` to `other`'s endpoint URL
    pub fn with_url_of(self, other: &NodeId, endpoint: &str) -> Self {
        let key = url_env_key(other);
        self.with_environment(key, EndpointRef::new(other, endpoint))
    }

    /// Attach a publish-only packaging annotation
    pub fn publish_as(mut self, spec: PublishSpec) -> Self {
        let id = self.id();
        let consumed: Vec<String> = spec
            .build_args
            .iter()
            .flat_map(|(_, v)| v.parameters())
            .collect();
        for name in consumed {
            self.builder.record_consumer(&name, &id);
        }
        self.node_mut().publish = Some(spec);
        self
    }

    /// Export telemetry to the configured collector
    pub fn with_otlp_exporter(mut self) -> Self {
        self.node_mut().otlp_exporter = true;
        self
    }

    /// Attach a free-form annotation (icon name, dashboard hints)
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_mut().annotations.insert(key.into(), value.into());
        self
    }

    /// Parent `parameter` to this node for lineage
    pub fn with_parameter_parent(self, parameter: &ParameterRef) -> Result<Self> {
        let id = self.id();
        self.builder.parameters.with_parent(parameter, &id)?;
        Ok(self)
    }
}

/// Environment key for another node's URL: `chat-agent` becomes `CHAT_AGENT_URL`
pub fn url_env_key(id: &NodeId) -> String {
    let stem: String = id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}_URL")
}

/// A validated, immutable topology
#[derive(Debug, Clone)]
pub struct Topology {
    mode: ExecutionMode,
    nodes: Vec<ResourceNode>,
    parameters: ParameterStore,
    otlp_endpoint: Option<EnvValue>,
    order: Vec<NodeId>,
}

impl Topology {
    /// Mode the topology was declared for
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Look up a node
    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Parameter store (read-only from here on)
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    /// Collector endpoint for telemetry exporters
    pub fn otlp_endpoint(&self) -> Option<&EnvValue> {
        self.otlp_endpoint.as_ref()
    }

    /// Startup order, dependencies first
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Startup order grouped into concurrently startable waves
    pub fn startup_waves(&self) -> Result<Vec<Vec<NodeId>>> {
        scheduler::startup_waves(&self.nodes)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the topology has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointProperty;

    #[test]
    fn test_duplicate_node() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        builder.add_project("api", "../backend").unwrap();
        let err = builder.add_project("api", "../other").err().unwrap();
        assert_eq!(err, Error::DuplicateNode("api".into()));
    }

    #[test]
    fn test_build_rejects_unknown_dependency() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        builder
            .add_frontend("frontend", "../frontend")
            .unwrap()
            .wait_for(&NodeId::from("api"));
        assert_eq!(
            builder.build().unwrap_err(),
            Error::DanglingReference {
                node: "frontend".into(),
                target: "api".into(),
            }
        );
    }

    #[test]
    fn test_build_rejects_dangling_endpoint_owner() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        builder
            .add_script("orchestrator", "../orchestrator-agent", "app.py")
            .unwrap()
            .with_environment("SITTER_AGENT_URL", EndpointRef::new("sitter", "http"));
        assert_eq!(
            builder.build().unwrap_err(),
            Error::DanglingReference {
                node: "orchestrator".into(),
                target: "sitter".into(),
            }
        );
    }

    #[test]
    fn test_build_rejects_undeclared_endpoint_in_token() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        let api = builder.add_project("api", "../backend").unwrap().id();
        let grpc = builder.endpoint(&api, "grpc");
        builder
            .add_frontend("frontend", "../frontend")
            .unwrap()
            .with_environment("API", format!("{}/v1", grpc.property(EndpointProperty::Host)));
        assert!(matches!(
            builder.build().unwrap_err(),
            Error::UnknownEndpoint { .. }
        ));
    }

    #[test]
    fn test_inactive_arm_may_name_absent_node() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        builder.add_project("api", "../backend").unwrap().with_environment(
            "TELEMETRY",
            EnvValue::by_mode("disabled", EndpointRef::new("insights", "otlp")),
        );
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_build_rejects_undeclared_parameter() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        let mut scratch = ParameterStore::new();
        let foreign = scratch.declare("Elsewhere", None);
        builder
            .add_project("api", "../backend")
            .unwrap()
            .with_environment("X", foreign);
        assert_eq!(
            builder.build().unwrap_err(),
            Error::DanglingReference {
                node: "api".into(),
                target: "Elsewhere".into(),
            }
        );
    }

    #[test]
    fn test_build_rejects_cycle() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        let x = builder.add_project("X", "x").unwrap().id();
        let y = builder.add_project("Y", "y").unwrap().id();
        builder.add_dependency(&x, &y).unwrap();
        builder.add_dependency(&y, &x).unwrap();
        assert!(matches!(
            builder.topological_order(),
            Err(Error::CycleDetected { .. })
        ));
        assert!(matches!(builder.build(), Err(Error::CycleDetected { .. })));
    }

    #[test]
    fn test_consumers_recorded() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        let url = builder.declare_parameter("FoundryProjectUrl", None);
        builder
            .add_script("chat", "../agent", "agent.py")
            .unwrap()
            .with_environment("AZURE_OPENAI_ENDPOINT", &url)
            .with_parameter_parent(&url)
            .unwrap();
        builder
            .add_script("sitter", "../sitter-agent", "app.py")
            .unwrap()
            .with_environment("AZURE_OPENAI_ENDPOINT", &url);

        let topology = builder.build().unwrap();
        let store = topology.parameters();
        assert_eq!(
            store.consumers("FoundryProjectUrl"),
            &[NodeId::from("chat"), NodeId::from("sitter")]
        );
        assert_eq!(store.parent("FoundryProjectUrl"), Some(&NodeId::from("chat")));
    }

    #[test]
    fn test_later_call_sites_append_writes() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        let chat = builder
            .add_script("chat", "../agent", "agent.py")
            .unwrap()
            .with_http_endpoint(8001)
            .id();
        let frontend = builder
            .add_frontend("frontend", "../frontend")
            .unwrap()
            .with_http_endpoint(3000)
            .id();
        let url = builder.endpoint(&frontend, "http");
        builder.with_environment(&chat, "FRONTEND_URL", &url).unwrap();
        builder.with_environment(&chat, "FRONTEND_URL", &url).unwrap();

        let topology = builder.build().unwrap();
        let chat = topology.node(&chat).unwrap();
        assert_eq!(chat.env_writes.len(), 2);
        assert_eq!(chat.environment().len(), 1);
    }

    #[test]
    fn test_url_env_key() {
        assert_eq!(url_env_key(&NodeId::from("api")), "API_URL");
        assert_eq!(url_env_key(&NodeId::from("sitter-agent")), "SITTER_AGENT_URL");
    }

    #[test]
    fn test_external_endpoints() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Publish);
        let chat = builder
            .add_script("chat", "../agent", "agent.py")
            .unwrap()
            .with_http_endpoint(8001)
            .with_external_http_endpoints()
            .id();
        let topology = builder.build().unwrap();
        assert!(topology.node(&chat).unwrap().endpoints[0].external);
    }
}
