use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::{Graph, GraphError, NodeId, ValueKind};

/// Lazy topological walk over the live nodes of a graph.
///
/// Ties between ready nodes are broken by insertion order, so the sequence is
/// deterministic for a given graph. Iteration stops early on a cycle; compare
/// the number of yielded nodes with [`Graph::num_live_nodes`] to detect it.
pub struct TopologicalOrder<'g> {
    graph: &'g Graph,
    pending: Vec<usize>,
    ready: BinaryHeap<Reverse<NodeId>>,
}

impl<'g> TopologicalOrder<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        let mut pending = vec![0usize; graph.nodes.len()];
        let mut ready = BinaryHeap::new();
        for (id, node) in graph.live_nodes() {
            let count = node
                .inputs
                .iter()
                .filter(|v| graph.values[v.0 as usize].producer.is_some())
                .count();
            pending[id.0 as usize] = count;
            if count == 0 {
                ready.push(Reverse(id));
            }
        }
        Self {
            graph,
            pending,
            ready,
        }
    }
}

impl Iterator for TopologicalOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let Reverse(id) = self.ready.pop()?;
        let node = &self.graph.nodes[id.0 as usize];
        for out in &node.outputs {
            for &user in &self.graph.values[out.0 as usize].users {
                let slot = &mut self.pending[user.0 as usize];
                *slot = slot.saturating_sub(1);
                if *slot == 0 {
                    self.ready.push(Reverse(user));
                }
            }
        }
        Some(id)
    }
}

impl Graph {
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(self)
    }

    /// Materialized topological order; fails when the graph has a cycle.
    pub fn sorted_nodes(&self) -> Result<Vec<NodeId>, GraphError> {
        let order: Vec<NodeId> = self.topological_order().collect();
        if order.len() != self.num_live_nodes() {
            return Err(GraphError::CyclicGraph {
                graph: self.name.clone(),
            });
        }
        Ok(order)
    }

    /// Nodes sorted by their schedule slot when every live node has one,
    /// otherwise the topological order.
    pub fn scheduled_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut order = self.sorted_nodes()?;
        let slots: Option<Vec<usize>> = order
            .iter()
            .map(|id| self.nodes[id.0 as usize].order)
            .collect();
        if slots.is_some() {
            order.sort_by_key(|id| self.nodes[id.0 as usize].order);
        }
        Ok(order)
    }

    /// Verifies use-def consistency, producer presence and acyclicity.
    pub fn check_sanity(&self) -> Result<(), GraphError> {
        for (id, node) in self.live_nodes() {
            for &input in &node.inputs {
                let value = self.value(input).map_err(|_| GraphError::BrokenUseDef {
                    value: format!("{input:?}"),
                    node: node.name.clone(),
                })?;
                let slots = node.inputs.iter().filter(|&&v| v == input).count();
                let uses = value.users.iter().filter(|&&u| u == id).count();
                if slots != uses {
                    return Err(GraphError::BrokenUseDef {
                        value: value.name.clone(),
                        node: node.name.clone(),
                    });
                }
            }
            for &out in &node.outputs {
                let value = self.value(out).map_err(|_| GraphError::BrokenUseDef {
                    value: format!("{out:?}"),
                    node: node.name.clone(),
                })?;
                if value.producer != Some(id) {
                    return Err(GraphError::BrokenUseDef {
                        value: value.name.clone(),
                        node: node.name.clone(),
                    });
                }
            }
        }
        for (id, value) in self.live_values() {
            if let Some(producer) = value.producer {
                if self.node(producer).is_err() {
                    return Err(GraphError::ProducerRequired {
                        value: value.name.clone(),
                    });
                }
            }
            let consumed = !value.users.is_empty() || self.is_graph_output(id);
            let sourced = matches!(value.kind, ValueKind::Input | ValueKind::Captured);
            if consumed && !sourced && value.producer.is_none() {
                return Err(GraphError::ProducerRequired {
                    value: value.name.clone(),
                });
            }
        }
        self.sorted_nodes().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ValueType;
    use crate::tensor::Dtype;

    #[test]
    fn ready_nodes_follow_insertion_order() {
        let mut graph = Graph::new("g");
        let ty = ValueType::new(Dtype::Float32, &[2]);
        let x = graph.add_input_value("x", ty.clone()).unwrap();
        let a = graph.add_temp_value("a", ty.clone()).unwrap();
        let b = graph.add_temp_value("b", ty.clone()).unwrap();
        let y = graph.add_output_value("y", ty).unwrap();
        let n2 = graph.add_node("Add", &[a, b], &[y]).unwrap();
        let n0 = graph.add_node("Neg", &[x], &[a]).unwrap();
        let n1 = graph.add_node("Relu", &[x], &[b]).unwrap();
        assert_eq!(graph.sorted_nodes().unwrap(), vec![n0, n1, n2]);
        graph.check_sanity().unwrap();
    }

    #[test]
    fn insertion_closing_a_loop_is_rejected() {
        let mut graph = Graph::new("g");
        let ty = ValueType::new(Dtype::Float32, &[2]);
        let x = graph.add_input_value("x", ty.clone()).unwrap();
        let a = graph.add_temp_value("a", ty.clone()).unwrap();
        let b = graph.add_temp_value("b", ty.clone()).unwrap();
        let c = graph.add_temp_value("c", ty).unwrap();
        let first = graph.add_node("Add", &[x, c], &[a]).unwrap();
        graph.add_node("Relu", &[a], &[b]).unwrap();
        let err = graph.add_node("Neg", &[b], &[c]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        let err = graph.set_node_inputs(first, &[b]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }
}
