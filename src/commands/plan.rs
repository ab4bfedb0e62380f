use anyhow::{Result, bail};
use colored::Colorize;
use topology::{BoundNode, LaunchSummary, Launcher, ProgressCallback, hand_off};

use super::{Session, explain, fingerprint};
use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;

/// Built-in launcher: prints what would be started instead of starting it
struct PrintLauncher {
    secrets: Vec<String>,
    only: Vec<String>,
    verbose: bool,
}

impl PrintLauncher {
    fn shows(&self, node: &BoundNode) -> bool {
        self.only.is_empty() || self.only.iter().any(|id| id == node.id.as_str())
    }
}

impl Launcher for PrintLauncher {
    fn launch(&mut self, node: &BoundNode) -> topology::Result<()> {
        if !self.shows(node) {
            return Ok(());
        }
        if let Some(source) = &node.source {
            ui::kv("source", &source.display().to_string());
        }
        if let Some(entrypoint) = &node.entrypoint {
            ui::kv("entrypoint", entrypoint);
        }
        for endpoint in &node.endpoints {
            let reach = if endpoint.external { " (external)" } else { "" };
            ui::kv(
                &format!("endpoint {}", endpoint.name),
                &format!("{}{reach}", endpoint.url),
            );
        }
        for (key, value) in &node.env {
            ui::kv(key, &ui::mask_secrets(value, &self.secrets));
        }
        if let Some(publish) = &node.publish {
            ui::kv("packaging", &serde_json::to_string(&publish.packaging).unwrap_or_default());
            for (key, value) in &publish.build_args {
                ui::kv(&format!("build-arg {key}"), &ui::mask_secrets(value, &self.secrets));
            }
        }
        if self.verbose {
            for (key, value) in &node.annotations {
                ui::dim(&format!("{key} = {value}"));
            }
        }
        Ok(())
    }
}

struct StepProgress {
    total: usize,
    done: usize,
    only: Vec<String>,
}

impl ProgressCallback for StepProgress {
    fn on_wave_start(&mut self, wave: usize, count: usize) {
        ui::section(&format!("Wave {} ({count} resources)", wave + 1));
    }

    fn on_node_start(&mut self, node: &BoundNode) {
        self.done += 1;
        if self.only.is_empty() || self.only.iter().any(|id| id == node.id.as_str()) {
            let title = if node.display_name.is_empty() || node.display_name == node.id.as_str() {
                node.id.to_string()
            } else {
                format!("{} \"{}\"", node.id, node.display_name)
            };
            ui::step(
                self.done,
                self.total,
                &format!("{} {}", title.bold(), format!("[{}]", node.kind).dimmed()),
            );
        }
    }

    fn on_node_complete(&mut self, node: &BoundNode, result: &topology::Result<()>) {
        if let Err(err) = result {
            ui::error(&format!("{}: {err}", node.id));
        }
    }
}

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let (topology, projection) = session.project(ctx.mode)?;

    for id in &args.only {
        if projection.node(id).is_none() {
            bail!("Unknown resource '{id}' in --only (not declared in {} mode)", ctx.mode);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&projection)?);
        return Ok(());
    }

    ui::header(&format!("Startup plan ({} mode)", ctx.mode));
    ui::kv("declaration", &session.path.display().to_string());
    ui::kv("fingerprint", ui::short_digest(&fingerprint(&projection)?));

    let mut launcher = PrintLauncher {
        secrets: session.secrets(&topology),
        only: args.only.clone(),
        verbose: ctx.verbose > 0,
    };
    let mut progress = StepProgress {
        total: projection.nodes.len(),
        done: 0,
        only: args.only,
    };
    let summary: LaunchSummary = hand_off(&projection, &mut launcher, &mut progress);
    let started = summary.into_result().map_err(explain)?;

    println!();
    ui::success(&format!("{} resources ready to start", started.len()));
    Ok(())
}
