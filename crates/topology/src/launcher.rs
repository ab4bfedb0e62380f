//! Launcher seam and hand-off
//!
//! Starting or deploying processes is not the engine's job. A [`Launcher`]
//! receives fully bound nodes, wave by wave, and the engine only records
//! what happened. There is no retry and no rollback: the first failure stops
//! the hand-off.

use crate::error::{Error, Result};
use crate::projector::{BoundNode, Projection};
use crate::resource::NodeId;

/// Starts or deploys a single bound node
pub trait Launcher {
    /// Start `node`
    ///
    /// Report failures as [`Error::Launch`].
    fn launch(&mut self, node: &BoundNode) -> Result<()>;
}

/// Progress callback for hand-off
///
/// Implement this trait to receive progress updates while nodes start.
pub trait ProgressCallback {
    /// Called before the nodes of a wave are launched
    fn on_wave_start(&mut self, wave: usize, count: usize);

    /// Called when starting a single node
    fn on_node_start(&mut self, node: &BoundNode);

    /// Called when a node launch completes, successfully or not
    fn on_node_complete(&mut self, node: &BoundNode, result: &Result<()>);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_wave_start(&mut self, _wave: usize, _count: usize) {}
    fn on_node_start(&mut self, _node: &BoundNode) {}
    fn on_node_complete(&mut self, _node: &BoundNode, _result: &Result<()>) {}
}

/// Outcome of a hand-off
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSummary {
    /// Nodes started, in launch order
    pub started: Vec<NodeId>,
    /// The failure that stopped the hand-off
    pub failure: Option<Error>,
    /// Nodes never attempted because of the failure
    pub skipped: usize,
}

impl LaunchSummary {
    /// Check if every node was started
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Started nodes, or the failure
    pub fn into_result(self) -> Result<Vec<NodeId>> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.started),
        }
    }
}

/// Hand every node of `projection` to `launcher` in startup order
pub fn hand_off<L, P>(projection: &Projection, launcher: &mut L, progress: &mut P) -> LaunchSummary
where
    L: Launcher + ?Sized,
    P: ProgressCallback + ?Sized,
{
    let mut summary = LaunchSummary::default();
    let total = projection.nodes.len();

    for (index, wave) in projection.waves().into_iter().enumerate() {
        progress.on_wave_start(index, wave.len());
        for node in wave {
            progress.on_node_start(node);
            let result = launcher.launch(node);
            progress.on_node_complete(node, &result);
            match result {
                Ok(()) => {
                    log::debug!("launched '{}'", node.id);
                    summary.started.push(node.id.clone());
                }
                Err(err) => {
                    log::warn!("launch of '{}' failed: {err}", node.id);
                    summary.skipped = total - summary.started.len() - 1;
                    summary.failure = Some(err);
                    return summary;
                }
            }
        }
    }
    summary
}
