use std::collections::BTreeSet;

use super::{GraphPass, PassContext, PassError, PassResult};
use crate::graph::Graph;

/// Removes nodes none of whose outputs reach a graph output.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadNodeEliminationPass;

impl DeadNodeEliminationPass {
    const NAME: &'static str = "DeadNodeElimination";
}

impl GraphPass for DeadNodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut PassContext<'_>) -> Result<PassResult, PassError> {
        let captured = captured_names(graph);
        let order = graph.sorted_nodes()?;
        let mut removed = 0usize;
        for id in order.into_iter().rev() {
            let node = graph.node(id)?;
            if node.outputs().is_empty() {
                continue;
            }
            let dead = node.outputs().iter().all(|&out| {
                !graph.is_graph_output(out)
                    && !captured.contains(graph.value_name(out))
                    && graph.value(out).map_or(true, |value| value.users().is_empty())
            });
            if dead {
                graph.remove_node(id)?;
                removed += 1;
            }
        }
        Ok(PassResult {
            changed: removed > 0,
            erased_nodes: removed,
            ..PassResult::default()
        })
    }
}

/// Names nested graphs still read implicitly from an enclosing scope.
fn captured_names(graph: &Graph) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for (_, _, body) in graph.subgraphs() {
        names.extend(body.free_values().iter().map(|&id| body.value_name(id).to_string()));
        names.extend(captured_names(body));
    }
    names
}
