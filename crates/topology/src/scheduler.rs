//! Dependency scheduling
//!
//! Startup order is a depth-first topological sort over `depends_on` edges.
//! Nodes with no ordering constraint between them keep declaration order, so
//! identical input always yields identical output.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::resource::{NodeId, ResourceNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

struct Walk<'a> {
    nodes: &'a [ResourceNode],
    index: HashMap<&'a NodeId, usize>,
    marks: Vec<Mark>,
    path: Vec<usize>,
    order: Vec<usize>,
}

impl<'a> Walk<'a> {
    fn new(nodes: &'a [ResourceNode]) -> Self {
        Self {
            nodes,
            index: nodes.iter().enumerate().map(|(i, n)| (&n.id, i)).collect(),
            marks: vec![Mark::Unvisited; nodes.len()],
            path: Vec::new(),
            order: Vec::with_capacity(nodes.len()),
        }
    }

    fn visit(&mut self, i: usize) -> Result<()> {
        match self.marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = self.path.iter().position(|&p| p == i).unwrap_or(0);
                let cycle = self.path[start..]
                    .iter()
                    .map(|&p| self.nodes[p].id.to_string())
                    .collect();
                return Err(Error::CycleDetected { cycle });
            }
            Mark::Unvisited => {}
        }

        self.marks[i] = Mark::InProgress;
        self.path.push(i);

        let nodes = self.nodes;
        let node = &nodes[i];
        for dep in &node.depends_on {
            let Some(&j) = self.index.get(dep) else {
                return Err(Error::DanglingReference {
                    node: node.id.to_string(),
                    target: dep.to_string(),
                });
            };
            self.visit(j)?;
        }

        self.path.pop();
        self.marks[i] = Mark::Done;
        self.order.push(i);
        Ok(())
    }
}

fn order_indices(nodes: &[ResourceNode]) -> Result<Vec<usize>> {
    let mut walk = Walk::new(nodes);
    for i in 0..nodes.len() {
        walk.visit(i)?;
    }
    Ok(walk.order)
}

/// Startup order: every node appears after all nodes it depends on
///
/// Fails with [`Error::CycleDetected`] (and no partial order) when the
/// dependency relation is not a DAG.
pub fn topological_order(nodes: &[ResourceNode]) -> Result<Vec<NodeId>> {
    let order = order_indices(nodes)?;
    Ok(order.into_iter().map(|i| nodes[i].id.clone()).collect())
}

/// Nodes grouped by dependency depth
///
/// Wave `n` holds nodes whose deepest dependency sits in wave `n - 1`; every
/// node in a wave may start once the previous waves are ready. Within a wave
/// nodes keep declaration order.
pub fn startup_waves(nodes: &[ResourceNode]) -> Result<Vec<Vec<NodeId>>> {
    let order = order_indices(nodes)?;
    let index: HashMap<&NodeId, usize> =
        nodes.iter().enumerate().map(|(i, n)| (&n.id, i)).collect();

    let mut depth = vec![0usize; nodes.len()];
    for &i in &order {
        depth[i] = nodes[i]
            .depends_on
            .iter()
            .filter_map(|d| index.get(d))
            .map(|&j| depth[j] + 1)
            .max()
            .unwrap_or(0);
    }

    let levels = depth.iter().max().map_or(0, |d| d + 1);
    let mut waves: Vec<Vec<NodeId>> = vec![Vec::new(); levels];
    for (i, node) in nodes.iter().enumerate() {
        waves[depth[i]].push(node.id.clone());
    }
    Ok(waves)
}
