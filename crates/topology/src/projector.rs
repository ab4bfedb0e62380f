//! Configuration projection
//!
//! Turns a [`Topology`] plus an [`ExecutionMode`] into the concrete, fully
//! bound environment of every node. This is the only place where
//! mode-conditional values are selected and deferred values substituted.
//!
//! Endpoint resolution is a fixed point over startup order: visiting a node
//! reports its endpoint assignments into the [`EndpointTable`], then every
//! pending node whose referenced endpoints are all assigned is finalized.
//! A node that reads an endpoint of a node visited later simply waits.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::allocator::{EndpointAllocator, ModeAllocator};
use crate::endpoint::{EndpointRef, EndpointTable};
use crate::error::{Error, Result};
use crate::graph::Topology;
use crate::mode::ExecutionMode;
use crate::resource::{EnvValue, NodeId, Packaging, ResourceKind, ResourceNode};
use crate::token::{self, Token};

/// Environment key carrying the node's telemetry service name
pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Environment key carrying the telemetry collector endpoint
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Service-discovery key for `target`'s `endpoint`
pub fn service_discovery_key(target: &NodeId, endpoint: &str) -> String {
    format!("services__{target}__{endpoint}__0")
}

/// A concrete endpoint as handed to the launcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundEndpoint {
    pub name: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub target_port: u16,
    pub url: String,
    pub external: bool,
}

/// Publish packaging with its build arguments resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPublish {
    pub packaging: Packaging,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute: Option<String>,
    pub build_args: BTreeMap<String, String>,
}

/// A fully bound node, ready for the launcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundNode {
    pub id: NodeId,
    pub kind: ResourceKind,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    pub depends_on: Vec<NodeId>,
    pub endpoints: Vec<BoundEndpoint>,
    pub env: BTreeMap<String, String>,
    /// Present only in publish mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<ResolvedPublish>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Result of projecting a topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub mode: ExecutionMode,
    /// Startup order
    pub order: Vec<NodeId>,
    pub nodes: BTreeMap<NodeId, BoundNode>,
}

impl Projection {
    /// Final environment per node
    pub fn environments(&self) -> BTreeMap<NodeId, BTreeMap<String, String>> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.env.clone()))
            .collect()
    }

    /// Bound nodes in startup order
    pub fn ordered_nodes(&self) -> Vec<&BoundNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    /// Bound nodes grouped into startup waves
    ///
    /// A node lands one wave after the deepest node it depends on.
    pub fn waves(&self) -> Vec<Vec<&BoundNode>> {
        let mut depth: BTreeMap<&NodeId, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<&BoundNode>> = Vec::new();
        for node in self.ordered_nodes() {
            let d = node
                .depends_on
                .iter()
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(&node.id, d);
            if waves.len() <= d {
                waves.resize_with(d + 1, Vec::new);
            }
            waves[d].push(node);
        }
        waves
    }

    /// Look up a bound node
    pub fn node(&self, id: &str) -> Option<&BoundNode> {
        self.nodes.get(&NodeId::from(id))
    }
}

/// Projects topologies for one execution mode
pub struct Projector {
    mode: ExecutionMode,
    allocator: Box<dyn EndpointAllocator>,
}

impl Projector {
    /// Create a projector using the default allocation strategy
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            allocator: Box::new(ModeAllocator::default()),
        }
    }

    /// Use the launcher's allocation strategy
    pub fn with_allocator(mut self, allocator: impl EndpointAllocator + 'static) -> Self {
        self.allocator = Box::new(allocator);
        self
    }

    /// Mode this projector selects
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Resolve every node of `topology`
    ///
    /// Either every environment is returned or none is: the first error
    /// aborts the whole projection.
    pub fn project(&self, topology: &Topology) -> Result<Projection> {
        if topology.mode() != self.mode {
            return Err(Error::ModeMismatch {
                graph: topology.mode(),
                requested: self.mode,
            });
        }
        if let Some(err) = topology.parameters().unresolved().into_iter().next() {
            return Err(err);
        }

        let mut state = State {
            topology,
            mode: self.mode,
            table: EndpointTable::new(),
            ordinals: BTreeMap::new(),
            reserved: BTreeSet::new(),
            ports: BTreeMap::new(),
        };
        let mut ordinal = 0;
        for node in topology.nodes() {
            for decl in &node.endpoints {
                state.table.declare(&node.id, decl);
                if let Some(port) = *decl.target_port.select(self.mode) {
                    state.reserved.insert(port);
                }
                state
                    .ordinals
                    .insert((node.id.clone(), decl.name.clone()), ordinal);
                ordinal += 1;
            }
        }

        let mut pending: Vec<&ResourceNode> = Vec::new();
        let mut bound = BTreeMap::new();
        for id in topology.topological_order() {
            let Some(node) = topology.node(id) else {
                return Err(Error::UnknownNode(id.to_string()));
            };
            state.allocate(node, self.allocator.as_ref())?;
            pending.push(node);

            loop {
                let (ready, waiting): (Vec<_>, Vec<_>) =
                    pending.into_iter().partition(|n| state.is_ready(n));
                pending = waiting;
                if ready.is_empty() {
                    break;
                }
                for node in ready {
                    bound.insert(node.id.clone(), state.finalize(node)?);
                }
            }
            for node in &pending {
                log::trace!("deferring environment of '{}'", node.id);
            }
        }

        if let Some(node) = pending.first() {
            let endpoint = state
                .unresolved_reference(node)
                .map_or_else(|| "<unknown>".to_string(), |r| r.key());
            return Err(Error::ProjectionRace {
                node: node.id.to_string(),
                endpoint,
            });
        }

        log::info!("projected {} nodes for {} mode", bound.len(), self.mode);
        Ok(Projection {
            mode: self.mode,
            order: topology.topological_order().to_vec(),
            nodes: bound,
        })
    }
}

/// Project `topology` for `mode` with the default allocation strategy
pub fn project(topology: &Topology, mode: ExecutionMode) -> Result<Projection> {
    Projector::new(mode).project(topology)
}

struct State<'a> {
    topology: &'a Topology,
    mode: ExecutionMode,
    table: EndpointTable,
    ordinals: BTreeMap<(NodeId, String), usize>,
    /// Ports declared explicitly for this mode
    reserved: BTreeSet<u16>,
    ports: BTreeMap<u16, String>,
}

impl State<'_> {
    fn allocate(&mut self, node: &ResourceNode, allocator: &dyn EndpointAllocator) -> Result<()> {
        for decl in &node.endpoints {
            let ordinal = self
                .ordinals
                .get(&(node.id.clone(), decl.name.clone()))
                .copied()
                .unwrap_or_default();
            let allocated = allocator.allocate(node, decl, ordinal, &self.reserved, self.mode)?;

            if !self.mode.is_publish() {
                let key = format!("{}/{}", node.id, decl.name);
                if let Some(first) = self.ports.get(&allocated.port) {
                    return Err(Error::PortConflict {
                        port: allocated.port,
                        first: first.clone(),
                        second: key,
                    });
                }
                self.ports.insert(allocated.port, key);
            }

            log::debug!(
                "assigned {}/{} -> {}:{}",
                node.id,
                decl.name,
                allocated.host,
                allocated.port
            );
            self.table.resolve(&node.id, &decl.name, allocated)?;
        }
        Ok(())
    }

    /// Endpoints the node's selected values read, plus referenced nodes' endpoints
    fn reads(&self, node: &ResourceNode) -> Vec<EndpointRef> {
        let mut refs: Vec<EndpointRef> = node
            .env_writes
            .iter()
            .flat_map(|(_, v)| v.endpoints_in(self.mode))
            .collect();
        if self.mode.is_publish()
            && let Some(publish) = &node.publish
        {
            refs.extend(publish.build_args.iter().flat_map(|(_, v)| v.endpoints_in(self.mode)));
        }
        if node.otlp_exporter
            && let Some(otlp) = self.topology.otlp_endpoint()
        {
            refs.extend(otlp.endpoints_in(self.mode));
        }
        for target in &node.references {
            if let Some(target_node) = self.topology.node(target) {
                refs.extend(
                    target_node
                        .endpoints
                        .iter()
                        .map(|e| EndpointRef::new(target, e.name.as_str())),
                );
            }
        }
        refs
    }

    fn unresolved_reference(&self, node: &ResourceNode) -> Option<EndpointRef> {
        self.reads(node)
            .into_iter()
            .find(|r| !self.table.is_resolved(&r.owner, &r.endpoint))
    }

    fn is_ready(&self, node: &ResourceNode) -> bool {
        self.unresolved_reference(node).is_none()
    }

    fn render(&self, consumer: &NodeId, value: &EnvValue) -> Result<String> {
        let parameters = self.topology.parameters();
        match value {
            EnvValue::Literal(text) => token::substitute(text, |t| match t {
                Token::Parameter(name) => parameters.resolve_name(name),
                Token::Endpoint {
                    owner,
                    endpoint,
                    property,
                } => {
                    let reference =
                        EndpointRef::new(owner.as_str(), endpoint.as_str()).property(*property);
                    self.table.render(consumer, &reference, self.mode)
                }
            }),
            EnvValue::Parameter(p) => parameters.resolve(p),
            EnvValue::Endpoint(e) => self.table.render(consumer, e, self.mode),
            EnvValue::ByMode(arms) => self.render(consumer, arms.select(self.mode)),
        }
    }

    fn finalize(&self, node: &ResourceNode) -> Result<BoundNode> {
        let id = &node.id;
        let mut env = BTreeMap::new();

        if node.otlp_exporter {
            env.insert(OTEL_SERVICE_NAME.to_string(), id.to_string());
            if let Some(otlp) = self.topology.otlp_endpoint() {
                env.insert(OTEL_EXPORTER_OTLP_ENDPOINT.to_string(), self.render(id, otlp)?);
            }
        }

        for target in &node.references {
            let Some(target_node) = self.topology.node(target) else {
                return Err(Error::DanglingReference {
                    node: id.to_string(),
                    target: target.to_string(),
                });
            };
            for decl in &target_node.endpoints {
                let reference = EndpointRef::new(target, decl.name.as_str());
                env.insert(
                    service_discovery_key(target, &decl.name),
                    self.table.render(id, &reference, self.mode)?,
                );
            }
        }

        for (key, value) in &node.env_writes {
            env.insert(key.clone(), self.render(id, value)?);
        }

        let mut endpoints = Vec::with_capacity(node.endpoints.len());
        for decl in &node.endpoints {
            let Some(allocated) = self.table.allocation(id, &decl.name) else {
                return Err(Error::ProjectionRace {
                    node: id.to_string(),
                    endpoint: format!("{id}/{}", decl.name),
                });
            };
            let scheme = decl.scheme.select(self.mode).clone();
            endpoints.push(BoundEndpoint {
                name: decl.name.clone(),
                url: allocated.url(&scheme),
                scheme,
                host: allocated.host.clone(),
                port: allocated.port,
                target_port: allocated.target_port,
                external: decl.external,
            });
        }

        let publish = match (&node.publish, self.mode) {
            (Some(spec), ExecutionMode::Publish) => {
                let mut build_args = BTreeMap::new();
                for (key, value) in &spec.build_args {
                    build_args.insert(key.clone(), self.render(id, value)?);
                }
                Some(ResolvedPublish {
                    packaging: spec.packaging.clone(),
                    compute: spec.compute.clone(),
                    build_args,
                })
            }
            _ => None,
        };

        log::debug!("finalized environment of '{id}' ({} keys)", env.len());
        Ok(BoundNode {
            id: id.clone(),
            kind: node.kind,
            display_name: node.display_name.clone(),
            source: node.source.clone(),
            entrypoint: node.entrypoint.clone(),
            depends_on: node.depends_on.clone(),
            endpoints,
            env,
            publish,
            annotations: node.annotations.clone(),
        })
    }
}
