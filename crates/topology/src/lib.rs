//! # Topology
//!
//! A service-topology engine for multi-process applications.
//!
//! This crate models a set of cooperating services as a dependency graph,
//! resolves values that only exist once other services are placed (URLs,
//! ports, hosts), orders startup, and projects each service's final
//! environment for a chosen execution mode.
//!
//! ## Core Concepts
//!
//! - **ResourceNode**: A unit of deployment (service project, script, frontend, container)
//! - **EndpointRef**: A deferred endpoint value that resolves once its owner is placed
//! - **ParameterStore**: Named configuration values with defaults and lineage
//! - **ExecutionMode**: Run locally or produce a publish manifest
//! - **Projector**: Turns a topology into concrete environments
//!
//! ## Example
//!
//! ```ignore
//! use topology::{ExecutionMode, TopologyBuilder, EnvValue, project};
//!
//! let mut builder = TopologyBuilder::new(ExecutionMode::Run);
//! let api = builder
//!     .add_project("api", "../backend")?
//!     .with_http_endpoint(5000)
//!     .with_environment("ERRORS", EnvValue::by_mode("false", "true"))
//!     .id();
//! let api_http = builder.endpoint(&api, "http");
//! builder
//!     .add_frontend("frontend", "../frontend")?
//!     .with_http_endpoint(3000)
//!     .wait_for(&api)
//!     .with_environment("REACT_APP_API_BASE_URL", api_http);
//!
//! let projection = project(&builder.build()?, ExecutionMode::Run)?;
//! assert_eq!(
//!     projection.node("frontend").unwrap().env["REACT_APP_API_BASE_URL"],
//!     "http://localhost:5000",
//! );
//! ```
//!
//! ## Provider Traits
//!
//! Placing and starting services belongs to the caller:
//!
//! - [`EndpointAllocator`]: Assigns concrete addresses to declared endpoints
//! - [`Launcher`]: Starts or deploys a bound node
//! - [`ProgressCallback`]: Receives hand-off progress updates

pub mod allocator;
pub mod endpoint;
pub mod error;
pub mod graph;
pub mod launcher;
pub mod mode;
pub mod parameter;
pub mod projector;
pub mod resource;
pub mod scheduler;
pub mod token;

// Re-export main types at crate root
pub use allocator::{EndpointAllocator, LocalAllocator, ModeAllocator, PublishAllocator};
pub use endpoint::{AllocatedEndpoint, EndpointDecl, EndpointProperty, EndpointRef, EndpointTable};
pub use error::{Error, ErrorCategory, Result};
pub use graph::{NodeBuilder, Topology, TopologyBuilder, url_env_key};
pub use launcher::{LaunchSummary, Launcher, NoProgress, ProgressCallback, hand_off};
pub use mode::{ByMode, ExecutionMode};
pub use parameter::{ParameterEntry, ParameterRef, ParameterStore};
pub use projector::{
    BoundEndpoint, BoundNode, Projection, Projector, ResolvedPublish, project,
    service_discovery_key,
};
pub use resource::{EnvValue, NodeId, Packaging, PublishSpec, ResourceKind, ResourceNode};
