//! Endpoint allocation strategies
//!
//! Assigning concrete addresses belongs to the launcher. The engine only
//! needs the launcher to report each assignment back before dependent
//! environments are finalized. Allocators must be pure functions of their
//! inputs: projecting the same topology twice has to yield identical output.

use std::collections::BTreeSet;

use crate::endpoint::{AllocatedEndpoint, EndpointDecl, default_port};
use crate::error::{Error, Result};
use crate::mode::ExecutionMode;
use crate::resource::ResourceNode;

/// First port handed out to endpoints without a target port
pub const DEFAULT_BASE_PORT: u16 = 5100;

/// Domain used for published hosts when none is configured
pub const DEFAULT_PUBLISH_DOMAIN: &str = "internal";

/// Launcher-side strategy that turns a declared endpoint into an address
pub trait EndpointAllocator {
    /// Assign an address to `decl` of `node`
    ///
    /// `ordinal` is the endpoint's position among all endpoints of the
    /// topology, in declaration order. `reserved` holds the ports endpoints
    /// declare explicitly for `mode`.
    fn allocate(
        &self,
        node: &ResourceNode,
        decl: &EndpointDecl,
        ordinal: usize,
        reserved: &BTreeSet<u16>,
        mode: ExecutionMode,
    ) -> Result<AllocatedEndpoint>;
}

/// Run-mode allocation on the local machine
///
/// An endpoint without a target port gets the `ordinal`-th port at or above
/// `base_port` that no endpoint declares explicitly.
#[derive(Debug, Clone)]
pub struct LocalAllocator {
    pub host: String,
    pub base_port: u16,
}

impl Default for LocalAllocator {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            base_port: DEFAULT_BASE_PORT,
        }
    }
}

impl EndpointAllocator for LocalAllocator {
    fn allocate(
        &self,
        node: &ResourceNode,
        decl: &EndpointDecl,
        ordinal: usize,
        reserved: &BTreeSet<u16>,
        mode: ExecutionMode,
    ) -> Result<AllocatedEndpoint> {
        if let Some(port) = *decl.target_port.select(mode) {
            return Ok(AllocatedEndpoint::new(self.host.clone(), port));
        }
        let port = (self.base_port..=u16::MAX)
            .filter(|p| !reserved.contains(p))
            .nth(ordinal)
            .ok_or_else(|| Error::Allocation {
                node: node.id.to_string(),
                endpoint: decl.name.clone(),
                message: format!("no free port above {}", self.base_port),
            })?;
        Ok(AllocatedEndpoint::new(self.host.clone(), port))
    }
}

/// Publish-mode allocation on externally routable hosts
///
/// Every node gets `<node>.<domain>`. External endpoints are advertised on
/// 443 and forwarded to the target port; internal endpoints keep their
/// target port, or the default port of their published scheme.
#[derive(Debug, Clone)]
pub struct PublishAllocator {
    pub domain: String,
}

impl Default for PublishAllocator {
    fn default() -> Self {
        Self {
            domain: DEFAULT_PUBLISH_DOMAIN.to_string(),
        }
    }
}

impl EndpointAllocator for PublishAllocator {
    fn allocate(
        &self,
        node: &ResourceNode,
        decl: &EndpointDecl,
        _ordinal: usize,
        _reserved: &BTreeSet<u16>,
        mode: ExecutionMode,
    ) -> Result<AllocatedEndpoint> {
        let host = format!("{}.{}", node.id, self.domain);
        let scheme = decl.scheme.select(mode);
        let target = decl
            .target_port
            .select(mode)
            .or_else(|| default_port(scheme))
            .ok_or_else(|| Error::Allocation {
                node: node.id.to_string(),
                endpoint: decl.name.clone(),
                message: format!("no default port for scheme '{scheme}'"),
            })?;
        let port = if decl.external { 443 } else { target };
        Ok(AllocatedEndpoint {
            host,
            port,
            target_port: target,
        })
    }
}

/// Dispatch to the local or publish strategy by mode
#[derive(Debug, Clone, Default)]
pub struct ModeAllocator {
    pub local: LocalAllocator,
    pub publish: PublishAllocator,
}

impl ModeAllocator {
    /// Use `domain` for published hosts
    pub fn with_domain(domain: impl Into<String>) -> Self {
        Self {
            local: LocalAllocator::default(),
            publish: PublishAllocator {
                domain: domain.into(),
            },
        }
    }
}

impl EndpointAllocator for ModeAllocator {
    fn allocate(
        &self,
        node: &ResourceNode,
        decl: &EndpointDecl,
        ordinal: usize,
        reserved: &BTreeSet<u16>,
        mode: ExecutionMode,
    ) -> Result<AllocatedEndpoint> {
        match mode {
            ExecutionMode::Run => self.local.allocate(node, decl, ordinal, reserved, mode),
            ExecutionMode::Publish => self.publish.allocate(node, decl, ordinal, reserved, mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ByMode;
    use crate::resource::ResourceKind;

    #[test]
    fn test_local_uses_target_port() {
        let node = ResourceNode::new("chat", ResourceKind::ScriptProcess);
        let alloc = LocalAllocator::default()
            .allocate(&node, &EndpointDecl::http(8001), 0, &BTreeSet::new(), ExecutionMode::Run)
            .unwrap();
        assert_eq!(alloc, AllocatedEndpoint::new("localhost", 8001));
    }

    #[test]
    fn test_local_assigns_from_base() {
        let node = ResourceNode::new("api", ResourceKind::Project);
        let alloc = LocalAllocator::default()
            .allocate(&node, &EndpointDecl::new("http"), 3, &BTreeSet::new(), ExecutionMode::Run)
            .unwrap();
        assert_eq!(alloc.port, DEFAULT_BASE_PORT + 3);
    }

    #[test]
    fn test_local_skips_declared_ports() {
        let node = ResourceNode::new("api", ResourceKind::Project);
        let reserved = BTreeSet::from([DEFAULT_BASE_PORT, DEFAULT_BASE_PORT + 2]);
        let ports: Vec<u16> = (0..3)
            .map(|ordinal| {
                LocalAllocator::default()
                    .allocate(
                        &node,
                        &EndpointDecl::new("http"),
                        ordinal,
                        &reserved,
                        ExecutionMode::Run,
                    )
                    .unwrap()
                    .port
            })
            .collect();
        assert_eq!(
            ports,
            vec![DEFAULT_BASE_PORT + 1, DEFAULT_BASE_PORT + 3, DEFAULT_BASE_PORT + 4]
        );
    }

    #[test]
    fn test_local_port_overflow() {
        let node = ResourceNode::new("api", ResourceKind::Project);
        let allocator = LocalAllocator {
            host: "localhost".into(),
            base_port: u16::MAX,
        };
        let err = allocator
            .allocate(&node, &EndpointDecl::new("http"), 1, &BTreeSet::new(), ExecutionMode::Run)
            .unwrap_err();
        assert!(matches!(err, Error::Allocation { .. }));
    }

    #[test]
    fn test_publish_hosts() {
        let node = ResourceNode::new("frontend", ResourceKind::FrontendApp);
        let decl = EndpointDecl::new("http")
            .with_target_port(ByMode::new(Some(3000), Some(80)))
            .external();
        let alloc = ModeAllocator::with_domain("apps.example")
            .allocate(&node, &decl, 0, &BTreeSet::new(), ExecutionMode::Publish)
            .unwrap();
        assert_eq!(alloc.host, "frontend.apps.example");
        assert_eq!(alloc.port, 443);
        assert_eq!(alloc.target_port, 80);

        let internal = EndpointDecl::http(8002);
        let alloc = PublishAllocator::default()
            .allocate(&node, &internal, 0, &BTreeSet::new(), ExecutionMode::Publish)
            .unwrap();
        assert_eq!(alloc.port, 8002);
        assert_eq!(alloc.host, "frontend.internal");
    }

    #[test]
    fn test_publish_without_port_uses_scheme_default() {
        let node = ResourceNode::new("api", ResourceKind::Project);
        let alloc = PublishAllocator::default()
            .allocate(&node, &EndpointDecl::new("http"), 0, &BTreeSet::new(), ExecutionMode::Publish)
            .unwrap();
        assert_eq!(alloc.port, 443);
        assert_eq!(alloc.url("https"), "https://api.internal");

        let plain = EndpointDecl::new("http").with_scheme(ByMode::same("http".to_string()));
        let alloc = PublishAllocator::default()
            .allocate(&node, &plain, 0, &BTreeSet::new(), ExecutionMode::Publish)
            .unwrap();
        assert_eq!(alloc.port, 80);

        let grpc = EndpointDecl::new("grpc").with_scheme(ByMode::same("grpc".to_string()));
        let err = PublishAllocator::default()
            .allocate(&node, &grpc, 0, &BTreeSet::new(), ExecutionMode::Publish)
            .unwrap_err();
        assert!(matches!(err, Error::Allocation { .. }));
    }
}
