use anyhow::Result;
use colored::Colorize;
use topology::{ParameterEntry, ResourceNode, Topology};

use super::{Session, explain};
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let topology = session.topology(ctx.mode)?;

    ui::header(&format!("Topology ({} mode)", ctx.mode));

    ui::section("Startup waves");
    let waves = topology.startup_waves().map_err(explain)?;
    for (i, wave) in waves.iter().enumerate() {
        let ids: Vec<&str> = wave.iter().map(|id| id.as_str()).collect();
        println!("  {} {}", format!("{}.", i + 1).bold(), ids.join(", "));
    }

    ui::section("Resources");
    for node in topology.nodes() {
        println!("  {} {}", node.id.as_str().bold(), format!("[{}]", node.kind).dimmed());
        for (label, ids) in edges(&topology, node) {
            if !ids.is_empty() {
                ui::kv(label, &ids.join(", "));
            }
        }
    }

    ui::section("Parameters");
    let entries: Vec<&ParameterEntry> = topology.parameters().iter().collect();
    if entries.is_empty() {
        ui::info("No parameters declared");
    }
    for entry in &entries {
        println!("  {} {}", entry.name.bold(), lineage(entry).dimmed());
    }
    let missing = entries.iter().filter(|e| e.value().is_none()).count();
    if missing > 0 {
        println!();
        ui::warn(&format!(
            "{missing} parameter(s) have no value; supply them with --param or Parameters__<NAME>"
        ));
    }
    Ok(())
}

/// Labelled outgoing edges of `node`
fn edges(topology: &Topology, node: &ResourceNode) -> Vec<(&'static str, Vec<String>)> {
    let mut reads: Vec<String> = node
        .bound_values()
        .flat_map(|v| v.endpoints_in(topology.mode()))
        .map(|r| r.key())
        .collect();
    reads.sort();
    reads.dedup();
    vec![
        ("waits for", node.depends_on.iter().map(ToString::to_string).collect()),
        ("references", node.references.iter().map(ToString::to_string).collect()),
        ("reads", reads),
    ]
}

/// One-line lineage summary of a parameter
fn lineage(entry: &ParameterEntry) -> String {
    let state = match (&entry.supplied, &entry.default) {
        (Some(_), _) => "supplied",
        (None, Some(_)) => "default",
        (None, None) => "missing",
    };
    let mut parts = vec![state.to_string()];
    if entry.secret {
        parts.push("secret".to_string());
    }
    parts.push(format!("owner {}", entry.owner()));
    if !entry.consumers.is_empty() {
        let consumers: Vec<&str> = entry.consumers.iter().map(|c| c.as_str()).collect();
        parts.push(format!("read by {}", consumers.join(", ")));
    }
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use topology::{EndpointRef, ExecutionMode, NodeId, TopologyBuilder};

    #[test]
    fn test_lineage() {
        let entry = ParameterEntry {
            name: "FoundryProjectUrl".into(),
            default: None,
            supplied: None,
            secret: false,
            parent: Some(NodeId::from("chat")),
            consumers: vec![NodeId::from("chat"), NodeId::from("sitter")],
        };
        assert_eq!(lineage(&entry), "[missing, owner chat, read by chat, sitter]");

        let secret = ParameterEntry {
            name: "Token".into(),
            default: Some("x".into()),
            supplied: None,
            secret: true,
            parent: None,
            consumers: Vec::new(),
        };
        assert_eq!(lineage(&secret), "[default, secret, owner <unowned>]");
    }

    #[test]
    fn test_edges_list_endpoint_reads() {
        let mut builder = TopologyBuilder::new(ExecutionMode::Run);
        let api = builder.add_project("api", "../backend").unwrap().with_http_endpoint(5000).id();
        builder
            .add_frontend("frontend", "../frontend")
            .unwrap()
            .wait_for(&api)
            .with_environment("A", EndpointRef::new("api", "http"))
            .with_environment("B", EndpointRef::new("api", "http"));
        let topology = builder.build().unwrap();

        let frontend = topology.node(&NodeId::from("frontend")).unwrap();
        let edges = edges(&topology, frontend);
        assert_eq!(edges[0], ("waits for", vec!["api".to_string()]));
        assert_eq!(edges[2], ("reads", vec!["api/http".to_string()]));
    }
}
