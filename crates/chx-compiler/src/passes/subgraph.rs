use super::{GraphPass, PassContext, PassError, PassResult};
use crate::graph::{Attribute, Graph, GraphError, NodeId};

/// Closes nested graphs over the values they capture from enclosing scopes.
///
/// Every captured name becomes a trailing input of each nested graph attached
/// to the owning node and a trailing input of the node itself, in first-use
/// order. All bodies of one node receive the same input list, so `If`
/// branches stay interchangeable.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubgraphCanonicalizationPass;

impl SubgraphCanonicalizationPass {
    const NAME: &'static str = "SubgraphCanonicalization";
}

impl GraphPass for SubgraphCanonicalizationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut PassContext<'_>) -> Result<PassResult, PassError> {
        let rewrites = canonicalize(graph, false)?;
        Ok(PassResult::rewrites(rewrites))
    }
}

fn canonicalize(graph: &mut Graph, nested: bool) -> Result<usize, GraphError> {
    let owners: Vec<NodeId> = graph
        .subgraphs()
        .into_iter()
        .map(|(id, _, _)| id)
        .fold(Vec::new(), |mut acc, id| {
            if acc.last() != Some(&id) {
                acc.push(id);
            }
            acc
        });

    let mut rewrites = 0usize;
    for owner in owners {
        let mut bodies: Vec<(String, Graph)> = Vec::new();
        for (key, attr) in graph.node_mut(owner)?.attributes_mut().iter_mut() {
            if let Attribute::Graph(body) = attr {
                bodies.push((key.clone(), std::mem::take(body.as_mut())));
            }
        }

        let mut captured: Vec<String> = Vec::new();
        for (_, body) in bodies.iter_mut() {
            rewrites += canonicalize(body, true)?;
            for &id in body.free_values() {
                let name = body.value_name(id).to_string();
                if !captured.contains(&name) {
                    captured.push(name);
                }
            }
        }

        if !captured.is_empty() {
            for (_, body) in bodies.iter_mut() {
                for name in &captured {
                    body.add_explicit_capture(name)?;
                }
            }
            let mut inputs = graph.node(owner)?.inputs().to_vec();
            for name in &captured {
                let id = match graph.value_by_name(name) {
                    Some(id) => id,
                    None if nested => graph.add_captured_value(name.clone())?,
                    None => {
                        return Err(GraphError::UndefinedValue {
                            graph: graph.name().to_string(),
                            name: name.clone(),
                        })
                    }
                };
                inputs.push(id);
            }
            graph.set_node_inputs(owner, &inputs)?;
            tracing::debug!(
                node = graph.node(owner)?.name(),
                captured = ?captured,
                "made captured values explicit"
            );
            rewrites += captured.len();
        }

        let node = graph.node_mut(owner)?;
        for (key, body) in bodies {
            node.set_attr(key, Attribute::Graph(Box::new(body)));
        }
    }
    Ok(rewrites)
}
