use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use topology::{
    ByMode, EndpointDecl, EndpointProperty, EndpointRef, EnvValue, ExecutionMode, NodeBuilder,
    NodeId, ParameterRef, PublishSpec, ResourceKind, TopologyBuilder,
};

// ============================================================================
// Main Config Schema
// ============================================================================

/// The apphost declaration file
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct AppHostConfig {
    /// Where published services are hosted
    #[serde(default)]
    pub publish: PublishTarget,

    /// Telemetry collector handed to exporting services
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Named parameters, supplied from outside or defaulted
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterConfig>,

    /// Services, in declaration order
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

impl AppHostConfig {
    /// Parse a declaration file
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format in apphost declaration")
    }

    /// Check structural rules serde cannot express
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for resource in &self.resources {
            resource
                .validate()
                .with_context(|| format!("Invalid resource '{}'", resource.id))?;
            // Nodes excluded by `when` may share an id with their other-mode twin
            if !seen.insert((resource.id.as_str(), resource.when)) {
                bail!("Resource '{}' is declared twice", resource.id);
            }
        }
        for (name, parameter) in &self.parameters {
            if let Some(parent) = &parameter.parent
                && !self.resources.iter().any(|r| &r.id == parent)
            {
                bail!("Parameter '{name}' is parented to unknown resource '{parent}'");
            }
        }
        Ok(())
    }

    /// Find a resource by id
    pub fn find_resource(&self, id: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Declare everything for `mode`
    ///
    /// Resources whose `when` names the other mode are never added.
    pub fn into_builder(&self, mode: ExecutionMode) -> Result<TopologyBuilder> {
        self.validate()?;
        let mut builder = TopologyBuilder::new(mode);

        let mut handles = BTreeMap::new();
        for (name, parameter) in &self.parameters {
            let store = builder.parameters_mut();
            let handle = if parameter.secret {
                store.declare_secret(name, parameter.default.clone())
            } else {
                store.declare(name, parameter.default.clone())
            };
            handles.insert(name.clone(), handle);
        }

        for resource in &self.resources {
            if !resource.included_in(mode) {
                log::debug!("skipping '{}' in {mode} mode", resource.id);
                continue;
            }
            let env = resource
                .env
                .iter()
                .map(|(key, value)| Ok((key.clone(), value.to_env_value(&handles)?)))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid environment of '{}'", resource.id))?;
            let publish = resource
                .publish
                .as_ref()
                .map(|p| p.to_spec(&handles))
                .transpose()
                .with_context(|| format!("Invalid publish settings of '{}'", resource.id))?;

            let node = resource.add_to(&mut builder)?;
            resource.declare(node, mode, env, publish);
        }

        for (name, parameter) in &self.parameters {
            if let (Some(parent), Some(handle)) = (&parameter.parent, handles.get(name))
                && self.find_resource(parent).is_some_and(|r| r.included_in(mode))
            {
                builder
                    .node(&NodeId::new(parent))?
                    .with_parameter_parent(handle)?;
            }
        }

        if let Some(otlp) = &self.telemetry.otlp_endpoint {
            builder.otlp_endpoint(otlp.to_env_value(&handles)?);
        }
        Ok(builder)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishTarget {
    /// DNS suffix of published hosts
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for PublishTarget {
    fn default() -> Self {
        Self {
            domain: default_domain(),
        }
    }
}

fn default_domain() -> String {
    topology::allocator::DEFAULT_PUBLISH_DOMAIN.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub otlp_endpoint: Option<ValueConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterConfig {
    #[serde(default)]
    pub default: Option<String>,

    /// Mask the value in output
    #[serde(default)]
    pub secret: bool,

    /// Resource the parameter belongs to, for lineage
    #[serde(default)]
    pub parent: Option<String>,
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: String,
    pub kind: ResourceKind,

    /// Source directory or project path
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Script started for script processes
    #[serde(default)]
    pub entrypoint: Option<String>,

    /// Image for containers
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Only exists in this mode
    #[serde(default)]
    pub when: Option<ExecutionMode>,

    #[serde(default)]
    pub depends_on: Vec<ReferenceConfig>,

    /// Targets whose endpoints are injected as service-discovery entries
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,

    /// Targets bound as `<TARGET>_URL`
    #[serde(default)]
    pub url_of: Vec<String>,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Make every endpoint externally reachable
    #[serde(default)]
    pub external: bool,

    #[serde(default)]
    pub env: BTreeMap<String, ValueConfig>,

    #[serde(default)]
    pub publish: Option<PackagingConfig>,

    /// Export telemetry to the configured collector
    #[serde(default)]
    pub otlp_exporter: bool,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            bail!("Resource id cannot be empty");
        }
        match self.kind {
            ResourceKind::Container if self.image.is_none() => {
                bail!("Container resources need an image");
            }
            ResourceKind::ScriptProcess if self.entrypoint.is_none() => {
                bail!("Script resources need an entrypoint");
            }
            ResourceKind::Project | ResourceKind::ScriptProcess | ResourceKind::FrontendApp
                if self.path.is_none() =>
            {
                bail!("{} resources need a path", self.kind);
            }
            _ => {}
        }
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() {
                bail!("Endpoint name cannot be empty");
            }
        }
        Ok(())
    }

    /// Check the existence predicate
    pub fn included_in(&self, mode: ExecutionMode) -> bool {
        self.when.is_none_or(|when| when == mode)
    }

    fn add_to<'a>(&self, builder: &'a mut TopologyBuilder) -> Result<NodeBuilder<'a>> {
        let path = self.path.clone().unwrap_or_default();
        let node = match self.kind {
            ResourceKind::Project => builder.add_project(self.id.as_str(), path),
            ResourceKind::ScriptProcess => builder.add_script(
                self.id.as_str(),
                path,
                self.entrypoint.clone().unwrap_or_default(),
            ),
            ResourceKind::FrontendApp => builder.add_frontend(self.id.as_str(), path),
            ResourceKind::Container => {
                builder.add_container(self.id.as_str(), self.image.clone().unwrap_or_default())
            }
        };
        node.with_context(|| format!("Could not add resource '{}'", self.id))
    }

    fn declare(
        &self,
        mut node: NodeBuilder<'_>,
        mode: ExecutionMode,
        env: Vec<(String, EnvValue)>,
        publish: Option<PublishSpec>,
    ) {
        if let Some(name) = &self.display_name {
            node = node.with_display_name(name);
        }
        for endpoint in &self.endpoints {
            node = node.with_endpoint(endpoint.to_decl());
        }
        if self.external {
            node = node.with_external_http_endpoints();
        }
        for target in self.depends_on.iter().filter_map(|r| r.target_in(mode)) {
            node = node.wait_for(&target);
        }
        for target in self.references.iter().filter_map(|r| r.target_in(mode)) {
            node = node.with_reference(&target);
        }
        for target in &self.url_of {
            node = node.with_url_of(&NodeId::new(target), "http");
        }
        for (key, value) in env {
            node = node.with_environment(key, value);
        }
        if let Some(spec) = publish {
            node = node.publish_as(spec);
        }
        if self.otlp_exporter {
            node = node.with_otlp_exporter();
        }
        for (key, value) in &self.annotations {
            node = node.with_annotation(key, value);
        }
    }
}

/// A node id, optionally limited to one mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceConfig {
    Always(String),
    Conditional {
        target: String,
        #[serde(default)]
        when: Option<ExecutionMode>,
    },
}

impl ReferenceConfig {
    /// Target id if the edge exists in `mode`
    pub fn target_in(&self, mode: ExecutionMode) -> Option<NodeId> {
        match self {
            Self::Always(target) => Some(NodeId::new(target)),
            Self::Conditional { target, when } => when
                .is_none_or(|when| when == mode)
                .then(|| NodeId::new(target)),
        }
    }
}

/// One value for both modes, or one per mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeValue<T> {
    Same(T),
    Split { run: T, publish: T },
}

impl<T: Clone> ModeValue<T> {
    pub fn to_by_mode(&self) -> ByMode<T> {
        match self {
            Self::Same(value) => ByMode::same(value.clone()),
            Self::Split { run, publish } => ByMode::new(run.clone(), publish.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_endpoint_name")]
    pub name: String,

    /// Defaults to http when run and https when published
    #[serde(default)]
    pub scheme: Option<ModeValue<String>>,

    #[serde(default)]
    pub target_port: Option<ModeValue<u16>>,

    #[serde(default)]
    pub external: bool,
}

fn default_endpoint_name() -> String {
    "http".to_string()
}

impl EndpointConfig {
    pub fn to_decl(&self) -> EndpointDecl {
        let mut decl = EndpointDecl::new(self.name.as_str());
        if let Some(scheme) = &self.scheme {
            decl = decl.with_scheme(scheme.to_by_mode());
        }
        if let Some(port) = &self.target_port {
            decl = decl.with_target_port(port.to_by_mode().map(Some));
        }
        if self.external {
            decl = decl.external();
        }
        decl
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Containerize with this image name
    #[serde(default)]
    pub image: Option<String>,

    /// Build from this file, relative to the resource path
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    /// Hosting target, e.g. "container-app"
    #[serde(default)]
    pub compute: Option<String>,

    #[serde(default)]
    pub build_args: BTreeMap<String, ValueConfig>,
}

impl PackagingConfig {
    fn to_spec(&self, parameters: &BTreeMap<String, ParameterRef>) -> Result<PublishSpec> {
        let mut spec = match (&self.image, &self.dockerfile) {
            (Some(_), Some(_)) => bail!("Use either image or dockerfile, not both"),
            (_, Some(path)) => PublishSpec::build_file(path),
            (image, None) => PublishSpec::generated_image(image.clone()),
        };
        if let Some(compute) = &self.compute {
            spec = spec.with_compute(compute);
        }
        for (key, value) in &self.build_args {
            spec = spec.with_build_arg(key, value.to_env_value(parameters)?);
        }
        Ok(spec)
    }
}

// ============================================================================
// Values
// ============================================================================

/// An environment value as written in the declaration file
///
/// Strings may embed `{api.bindings.http.url}` or `{Name.value}` tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueConfig {
    Text(String),
    Bool(bool),
    Int(i64),
    Endpoint {
        /// `owner/endpoint`, or just `owner` for its http endpoint
        endpoint: String,
        #[serde(default)]
        property: EndpointProperty,
        #[serde(default)]
        scheme: Option<ModeValue<String>>,
    },
    Parameter {
        parameter: String,
    },
    ByMode {
        run: Box<ValueConfig>,
        publish: Box<ValueConfig>,
    },
}

impl ValueConfig {
    pub fn to_env_value(&self, parameters: &BTreeMap<String, ParameterRef>) -> Result<EnvValue> {
        Ok(match self {
            Self::Text(text) => EnvValue::from(text.as_str()),
            Self::Bool(b) => EnvValue::from(b.to_string()),
            Self::Int(i) => EnvValue::from(i.to_string()),
            Self::Endpoint {
                endpoint,
                property,
                scheme,
            } => {
                let (owner, name) = endpoint.split_once('/').unwrap_or((endpoint, "http"));
                let mut reference = EndpointRef::new(owner, name).property(*property);
                if let Some(scheme) = scheme {
                    reference = reference.with_scheme(scheme.to_by_mode());
                }
                EnvValue::from(reference)
            }
            Self::Parameter { parameter } => {
                let handle = parameters
                    .get(parameter)
                    .with_context(|| format!("Parameter '{parameter}' is not declared"))?;
                EnvValue::from(handle)
            }
            Self::ByMode { run, publish } => EnvValue::by_mode(
                run.to_env_value(parameters)?,
                publish.to_env_value(parameters)?,
            ),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
