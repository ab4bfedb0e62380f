// Resolution commands
pub mod graph;
pub mod plan;
pub mod publish;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use topology::{ExecutionMode, ModeAllocator, Projection, Projector, Topology};

use crate::Context;
use crate::config;
use crate::schema::AppHostConfig;

/// A loaded declaration plus the parameter values supplied for this run
pub struct Session {
    pub path: PathBuf,
    pub config: AppHostConfig,
    pub supplied: BTreeMap<String, String>,
}

impl Session {
    /// Locate and load the declaration file
    pub fn open(ctx: &Context) -> Result<Self> {
        let path = config::locate(ctx.file.as_deref())?;
        let config = config::load(&path)?;
        let supplied = config::parameter_values(&ctx.params, std::env::vars_os());
        log::info!(
            "loaded {} resources and {} parameters from {}",
            config.resources.len(),
            config.parameters.len(),
            path.display()
        );
        Ok(Self {
            path,
            config,
            supplied,
        })
    }

    /// Build and validate the topology for `mode`
    pub fn topology(&self, mode: ExecutionMode) -> Result<Topology> {
        let mut builder = self
            .config
            .into_builder(mode)
            .with_context(|| format!("Could not declare topology from {}", self.path.display()))?;
        for (name, value) in &self.supplied {
            if builder.parameters().contains(name) {
                builder.parameters_mut().supply(name, value);
            } else {
                log::warn!("ignoring value for undeclared parameter '{name}'");
            }
        }
        builder.build().map_err(explain)
    }

    /// Projector using the declared publish domain
    pub fn projector(&self, mode: ExecutionMode) -> Projector {
        Projector::new(mode).with_allocator(ModeAllocator::with_domain(&self.config.publish.domain))
    }

    /// Build and project the topology for `mode`
    pub fn project(&self, mode: ExecutionMode) -> Result<(Topology, Projection)> {
        let topology = self.topology(mode)?;
        let projection = self.projector(mode).project(&topology).map_err(explain)?;
        Ok((topology, projection))
    }

    /// Values of secret parameters, for masking output
    pub fn secrets(&self, topology: &Topology) -> Vec<String> {
        topology
            .parameters()
            .iter()
            .filter(|p| p.secret)
            .filter_map(|p| p.value().map(str::to_string))
            .collect()
    }
}

/// Attach the category description and advice to an engine error
pub fn explain(err: topology::Error) -> anyhow::Error {
    let category = err.category();
    anyhow::Error::new(err).context(format!("{category}. {}", category.advice()))
}

/// Content hash of a projection, stable across runs with identical input
pub fn fingerprint(projection: &Projection) -> Result<String> {
    let bytes = serde_json::to_vec(projection).context("Failed to serialize projection")?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
