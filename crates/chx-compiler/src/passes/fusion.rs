//! Elementwise operator fusion.
//!
//! Single-consumer trees of elementwise nodes are collapsed into one
//! `ChxFusionGroup` node whose body lives in the `subgraph` attribute. The
//! group's root is rewritten in place so its output value keeps its identity.

use std::collections::HashSet;

use super::{GraphPass, PassContext, PassError, PassResult};
use crate::graph::{Attribute, Graph, GraphError, NodeId, ValueId};
use crate::ops::{names, OpKind, OpRegistry};

pub const FUSION_SUBGRAPH_ATTR: &str = "subgraph";
pub const FUSION_TYPE_ATTR: &str = "fusion_type";
const FUSION_TYPE_ELEMENTWISE: &str = "elementwise";

/// Backend hook deciding whether it can compile a fused body.
pub trait SubgraphAcceptor {
    fn backend_name(&self) -> &str;
    fn accept(&self, candidate: &Graph) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FusionPass;

impl FusionPass {
    const NAME: &'static str = "Fusion";
}

struct Candidate {
    root: NodeId,
    /// Members in topological order, root last.
    members: Vec<NodeId>,
    inputs: Vec<ValueId>,
}

impl GraphPass for FusionPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<PassResult, PassError> {
        let config = cx.config();
        let acceptor = if config.use_alt_backend {
            match cx.acceptor() {
                Some(acceptor) if acceptor.backend_name() == config.backend_name => Some(acceptor),
                _ => return Err(PassError::MissingAcceptor(config.backend_name.clone())),
            }
        } else {
            None
        };
        let fusion_type = match acceptor {
            Some(acceptor) => acceptor.backend_name().to_string(),
            None => FUSION_TYPE_ELEMENTWISE.to_string(),
        };

        let candidates = discover_candidates(graph, cx.registry())?;
        let mut result = PassResult::default();
        for (index, candidate) in candidates.into_iter().enumerate() {
            let body = build_body(graph, &candidate, index)?;
            if let Some(acceptor) = acceptor {
                if !acceptor.accept(&body) {
                    tracing::debug!(
                        backend = acceptor.backend_name(),
                        root = graph.node(candidate.root)?.name(),
                        "fusion candidate rejected"
                    );
                    continue;
                }
            }
            result.erased_nodes += materialize(graph, candidate, body, &fusion_type)?;
            result.rewrites_applied += 1;
            result.changed = true;
        }
        Ok(result)
    }
}

fn is_fusible(graph: &Graph, registry: &OpRegistry, id: NodeId) -> bool {
    graph.node(id).is_ok_and(|node| {
        node.outputs().len() == 1
            && node.op_type() != names::IDENTITY
            && registry.kind(node.op_type()) == Some(OpKind::Elementwise)
    })
}

fn discover_candidates(graph: &Graph, registry: &OpRegistry) -> Result<Vec<Candidate>, GraphError> {
    let order = graph.sorted_nodes()?;
    let position = |id: NodeId| order.iter().position(|&n| n == id).unwrap_or(usize::MAX);
    let mut assigned: HashSet<NodeId> = HashSet::new();
    let mut candidates = Vec::new();

    for &root in order.iter().rev() {
        if assigned.contains(&root) || !is_fusible(graph, registry, root) {
            continue;
        }
        let mut members: HashSet<NodeId> = HashSet::from([root]);
        let mut frontier = vec![root];
        while let Some(id) = frontier.pop() {
            for &input in graph.node(id)?.inputs() {
                let Some(producer) = graph.value(input)?.producer() else {
                    continue;
                };
                if members.contains(&producer)
                    || assigned.contains(&producer)
                    || !is_fusible(graph, registry, producer)
                    || graph.is_graph_output(input)
                {
                    continue;
                }
                let consumers_inside = graph
                    .value(input)?
                    .users()
                    .iter()
                    .all(|user| members.contains(user));
                if consumers_inside {
                    members.insert(producer);
                    frontier.push(producer);
                }
            }
        }
        if members.len() < 2 {
            continue;
        }
        let mut ordered: Vec<NodeId> = members.iter().copied().collect();
        ordered.sort_by_key(|&id| position(id));
        let mut inputs = Vec::new();
        for &id in &ordered {
            for &input in graph.node(id)?.inputs() {
                let internal = graph
                    .value(input)?
                    .producer()
                    .is_some_and(|p| members.contains(&p));
                if !internal && !inputs.contains(&input) {
                    inputs.push(input);
                }
            }
        }
        assigned.extend(members.iter().copied());
        candidates.push(Candidate {
            root,
            members: ordered,
            inputs,
        });
    }
    candidates.reverse();
    Ok(candidates)
}

fn build_body(graph: &Graph, candidate: &Candidate, index: usize) -> Result<Graph, GraphError> {
    let mut body = Graph::new(format!("fusion_{index}"));
    for &input in &candidate.inputs {
        let value = graph.value(input)?;
        body.add_input_value(value.name().to_string(), value.ty.clone())?;
    }
    for &id in &candidate.members {
        let node = graph.node(id)?;
        let mut inputs = Vec::with_capacity(node.inputs().len());
        for &input in node.inputs() {
            let name = graph.value_name(input);
            let mapped = body
                .value_by_name(name)
                .ok_or_else(|| GraphError::UndefinedValue {
                    graph: body.name().to_string(),
                    name: name.to_string(),
                })?;
            inputs.push(mapped);
        }
        let mut outputs = Vec::with_capacity(1);
        for &output in node.outputs() {
            let value = graph.value(output)?;
            let local = if id == candidate.root {
                body.add_output_value(value.name().to_string(), value.ty.clone())?
            } else {
                body.add_temp_value(value.name().to_string(), value.ty.clone())?
            };
            outputs.push(local);
        }
        let local = body.add_named_node(node.name(), node.op_type(), &inputs, &outputs)?;
        *body.node_mut(local)?.attributes_mut() = node.attributes().clone();
    }
    Ok(body)
}

fn materialize(
    graph: &mut Graph,
    candidate: Candidate,
    body: Graph,
    fusion_type: &str,
) -> Result<usize, GraphError> {
    let root = candidate.root;
    graph.set_node_inputs(root, &candidate.inputs)?;
    let node = graph.node_mut(root)?;
    node.set_op_type(names::FUSION_GROUP);
    node.attributes_mut().clear();
    node.set_attr(FUSION_SUBGRAPH_ATTR, Attribute::Graph(Box::new(body)));
    node.set_attr(FUSION_TYPE_ATTR, Attribute::String(fusion_type.to_string()));

    let mut erased = 0usize;
    for &member in candidate.members.iter().rev() {
        if member != root {
            graph.remove_node(member)?;
            erased += 1;
        }
    }
    tracing::debug!(
        node = graph.node(root)?.name(),
        fused = erased + 1,
        "materialized fusion group"
    );
    Ok(erased)
}
