use anyhow::{Result, bail};
use topology::ExecutionMode;

use super::{Session, fingerprint};
use crate::Context;
use crate::ui;

/// Resolve the declaration in both modes; nothing is handed off
pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    ui::header(&format!("Validating {}", session.path.display()));

    let mut failures = 0;
    for mode in [ExecutionMode::Run, ExecutionMode::Publish] {
        match session.project(mode) {
            Ok((topology, projection)) => ui::success(&format!(
                "{mode}: {} resources, {} parameters, fingerprint {}",
                projection.nodes.len(),
                topology.parameters().len(),
                ui::short_digest(&fingerprint(&projection)?)
            )),
            Err(err) => {
                ui::error(&format!("{mode}: {err:#}"));
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of 2 modes failed validation");
    }
    Ok(())
}
