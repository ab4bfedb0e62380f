//! Endpoints and deferred endpoint references
//!
//! A node declares endpoints ([`EndpointDecl`]); other nodes read them through
//! [`EndpointRef`]s long before an address exists. The [`EndpointTable`]
//! holds each endpoint's assignment once the launcher reports it, and renders
//! references into concrete strings during projection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::mode::{ByMode, ExecutionMode};
use crate::resource::NodeId;

/// A network endpoint declared by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDecl {
    /// Logical endpoint name (e.g. "http")
    pub name: String,
    /// Scheme per mode
    pub scheme: ByMode<String>,
    /// Port the service listens on, per mode
    pub target_port: ByMode<Option<u16>>,
    /// Whether the endpoint is reachable from outside the deployment
    pub external: bool,
}

impl EndpointDecl {
    /// An endpoint with the default schemes ("http" when run, "https" when published)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: ByMode::new("http".to_string(), "https".to_string()),
            target_port: ByMode::same(None),
            external: false,
        }
    }

    /// The conventional "http" endpoint on a target port
    pub fn http(target_port: u16) -> Self {
        Self::new("http").with_target_port(ByMode::same(Some(target_port)))
    }

    /// Override the scheme arms
    pub fn with_scheme(mut self, scheme: ByMode<String>) -> Self {
        self.scheme = scheme;
        self
    }

    /// Override the target port arms
    pub fn with_target_port(mut self, port: ByMode<Option<u16>>) -> Self {
        self.target_port = port;
        self
    }

    /// Mark the endpoint as externally reachable
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

/// Which constructed form of an endpoint a consumer wants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProperty {
    /// `scheme://host[:port]`
    #[default]
    Url,
    /// Bare host name
    Host,
    /// Allocated port
    Port,
    /// `host:port`
    #[serde(rename = "hostport")]
    HostAndPort,
    /// Scheme only
    Scheme,
    /// Port the service itself listens on
    #[serde(rename = "targetPort")]
    TargetPort,
}

impl EndpointProperty {
    /// Token spelling of the property
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Host => "host",
            Self::Port => "port",
            Self::HostAndPort => "hostport",
            Self::Scheme => "scheme",
            Self::TargetPort => "targetPort",
        }
    }
}

impl fmt::Display for EndpointProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointProperty {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "url" => Ok(Self::Url),
            "host" => Ok(Self::Host),
            "port" => Ok(Self::Port),
            "hostport" => Ok(Self::HostAndPort),
            "scheme" => Ok(Self::Scheme),
            "targetPort" => Ok(Self::TargetPort),
            other => Err(format!("unknown endpoint property '{other}'")),
        }
    }
}

/// A reference to another node's endpoint, usable before it is allocated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointRef {
    /// Node that declares the endpoint
    pub owner: NodeId,
    /// Endpoint name on the owner
    pub endpoint: String,
    /// Scheme override; `None` uses the owner's declared scheme
    pub scheme: Option<ByMode<String>>,
    /// Requested form
    pub property: EndpointProperty,
}

impl EndpointRef {
    /// Reference the URL of `owner`'s `endpoint`
    pub fn new(owner: impl Into<NodeId>, endpoint: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            endpoint: endpoint.into(),
            scheme: None,
            property: EndpointProperty::Url,
        }
    }

    /// Same endpoint, different constructed form
    pub fn property(&self, property: EndpointProperty) -> Self {
        Self {
            property,
            ..self.clone()
        }
    }

    /// Same endpoint, consumer-chosen scheme
    pub fn with_scheme(&self, scheme: ByMode<String>) -> Self {
        Self {
            scheme: Some(scheme),
            ..self.clone()
        }
    }

    /// `owner/endpoint`, as used in diagnostics
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.endpoint)
    }

    /// Placeholder token readable before resolution
    ///
    /// Tokens carry no scheme override; they render with the owner's scheme.
    pub fn token(&self) -> String {
        format!(
            "{{{}.bindings.{}.{}}}",
            self.owner, self.endpoint, self.property
        )
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// A concrete address assigned to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedEndpoint {
    /// Host name or address
    pub host: String,
    /// Port consumers connect to
    pub port: u16,
    /// Port the service listens on
    pub target_port: u16,
}

impl AllocatedEndpoint {
    /// Create an allocation where the service listens on the advertised port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            target_port: port,
        }
    }

    /// Build `scheme://host[:port]`, omitting the scheme's default port
    pub fn url(&self, scheme: &str) -> String {
        if default_port(scheme) == Some(self.port) {
            format!("{scheme}://{}", self.host)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }
}

/// Port implied by `scheme` when a URL omits it
pub(crate) fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Slot {
    scheme: ByMode<String>,
    allocated: Option<AllocatedEndpoint>,
}

/// Resolution state for every declared endpoint
///
/// Each endpoint is resolved exactly once. Rendering an unresolved reference
/// is an ordering defect, never a fallback to a guessed value.
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    slots: BTreeMap<(NodeId, String), Slot>,
}

impl EndpointTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint declared by `owner`
    pub fn declare(&mut self, owner: &NodeId, decl: &EndpointDecl) {
        self.slots.insert(
            (owner.clone(), decl.name.clone()),
            Slot {
                scheme: decl.scheme.clone(),
                allocated: None,
            },
        );
    }

    /// Check whether `owner` declared `endpoint`
    pub fn contains(&self, owner: &NodeId, endpoint: &str) -> bool {
        self.slots.contains_key(&(owner.clone(), endpoint.to_string()))
    }

    /// Record the launcher's assignment for an endpoint
    pub fn resolve(
        &mut self,
        owner: &NodeId,
        endpoint: &str,
        allocated: AllocatedEndpoint,
    ) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&(owner.clone(), endpoint.to_string()))
            .ok_or_else(|| Error::UnknownEndpoint {
                node: owner.to_string(),
                owner: owner.to_string(),
                endpoint: endpoint.to_string(),
            })?;
        if slot.allocated.is_some() {
            return Err(Error::EndpointAlreadyResolved {
                owner: owner.to_string(),
                endpoint: endpoint.to_string(),
            });
        }
        log::trace!("resolved {owner}/{endpoint} -> {}:{}", allocated.host, allocated.port);
        slot.allocated = Some(allocated);
        Ok(())
    }

    /// Check whether an endpoint has been resolved
    pub fn is_resolved(&self, owner: &NodeId, endpoint: &str) -> bool {
        self.allocation(owner, endpoint).is_some()
    }

    /// Assignment for an endpoint, if resolved
    pub fn allocation(&self, owner: &NodeId, endpoint: &str) -> Option<&AllocatedEndpoint> {
        self.slots
            .get(&(owner.clone(), endpoint.to_string()))
            .and_then(|s| s.allocated.as_ref())
    }

    /// Render `reference` for `consumer` in `mode`
    pub fn render(
        &self,
        consumer: &NodeId,
        reference: &EndpointRef,
        mode: ExecutionMode,
    ) -> Result<String> {
        let slot = self
            .slots
            .get(&(reference.owner.clone(), reference.endpoint.clone()))
            .ok_or_else(|| Error::UnknownEndpoint {
                node: consumer.to_string(),
                owner: reference.owner.to_string(),
                endpoint: reference.endpoint.clone(),
            })?;
        let allocated = slot.allocated.as_ref().ok_or_else(|| Error::ProjectionRace {
            node: consumer.to_string(),
            endpoint: reference.key(),
        })?;
        let scheme = reference
            .scheme
            .as_ref()
            .unwrap_or(&slot.scheme)
            .select(mode);

        Ok(match reference.property {
            EndpointProperty::Url => allocated.url(scheme),
            EndpointProperty::Host => allocated.host.clone(),
            EndpointProperty::Port => allocated.port.to_string(),
            EndpointProperty::HostAndPort => format!("{}:{}", allocated.host, allocated.port),
            EndpointProperty::Scheme => scheme.clone(),
            EndpointProperty::TargetPort => allocated.target_port.to_string(),
        })
    }
}
