use std::collections::HashSet;

use super::{GraphPass, PassContext, PassError, PassResult};
use crate::graph::{Attribute, Graph, GraphError};

/// Assigns every node a program slot.
///
/// An existing assignment is kept when it is complete, unique and respects
/// data dependencies; otherwise nodes are numbered in topological order.
/// Nested graphs are scheduled independently.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulePass;

impl SchedulePass {
    const NAME: &'static str = "Schedule";
}

impl GraphPass for SchedulePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut PassContext<'_>) -> Result<PassResult, PassError> {
        let rescheduled = schedule(graph)?;
        Ok(PassResult::rewrites(rescheduled))
    }
}

fn schedule(graph: &mut Graph) -> Result<usize, GraphError> {
    let mut rescheduled = 0usize;
    let owners: Vec<_> = graph.subgraphs().into_iter().map(|(id, key, _)| (id, key)).collect();
    for (id, key) in owners {
        if let Some(Attribute::Graph(body)) = graph.node_mut(id)?.attributes_mut().get_mut(&key) {
            rescheduled += schedule(body)?;
        }
    }

    if is_consistent(graph)? {
        return Ok(rescheduled);
    }
    let order = graph.sorted_nodes()?;
    for (slot, id) in order.iter().enumerate() {
        graph.node_mut(*id)?.set_order(Some(slot));
    }
    tracing::trace!(graph = graph.name(), nodes = order.len(), "assigned schedule");
    Ok(rescheduled + 1)
}

fn is_consistent(graph: &Graph) -> Result<bool, GraphError> {
    let mut seen = HashSet::new();
    for (_, node) in graph.live_nodes() {
        let Some(slot) = node.order() else {
            return Ok(false);
        };
        if !seen.insert(slot) {
            return Ok(false);
        }
        for &input in node.inputs() {
            if let Some(producer) = graph.value(input)?.producer() {
                match graph.node(producer)?.order() {
                    Some(p) if p < slot => {}
                    _ => return Ok(false),
                }
            }
        }
    }
    Ok(true)
}
