//! Static FLOP estimates.
//!
//! One multiply-add counts as one FLOP for the linear-algebra ops. Elementwise
//! ops count one per output element, reductions one per input element. Shapes
//! that are not fully static contribute nothing.

use crate::graph::{Graph, NodeId, ValueId};
use crate::ops::{builtin_schema, names, OpKind};
use crate::passes::FUSION_SUBGRAPH_ATTR;

/// Estimated FLOPs of one node; zero for unknown shapes and unsupported ops.
pub fn node_flops(graph: &Graph, id: NodeId) -> i64 {
    let Ok(node) = graph.node(id) else {
        return 0;
    };
    let op = node.op_type();
    let estimate = match op {
        names::MATMUL => matmul_flops(graph, node.inputs(), node.outputs()),
        names::GEMM => {
            let trans_a = node.int_attr(TRANS_A).ok().flatten().unwrap_or(0) != 0;
            gemm_flops(graph, node.inputs(), node.outputs(), trans_a)
        }
        names::CONV => conv_flops(graph, node.inputs(), node.outputs()),
        names::FUSION_GROUP => match node.graph_attr(FUSION_SUBGRAPH_ATTR) {
            Ok(Some(body)) => Some(calculate_total_flops(body)),
            _ => None,
        },
        names::IDENTITY | names::CAST => Some(0),
        names::SUM => {
            let terms = node.inputs().len().saturating_sub(1) as u64;
            output_elements(graph, node.outputs()).map(|n| saturate(n.saturating_mul(terms)))
        }
        _ => match builtin_schema(op).map(|schema| schema.kind) {
            Some(OpKind::Elementwise | OpKind::Comparison) => {
                output_elements(graph, node.outputs()).map(saturate)
            }
            Some(OpKind::Reduction) => node
                .inputs()
                .first()
                .and_then(|&input| elements(graph, input))
                .map(saturate),
            Some(OpKind::DataMovement | OpKind::Source) => Some(0),
            _ => None,
        },
    };
    estimate.unwrap_or(0)
}

/// Sum of [`node_flops`] over the topological order.
pub fn calculate_total_flops(graph: &Graph) -> i64 {
    graph
        .topological_order()
        .map(|id| node_flops(graph, id))
        .fold(0i64, i64::saturating_add)
}

const TRANS_A: &str = "transA";

fn elements(graph: &Graph, value: ValueId) -> Option<u64> {
    graph.value_type(value)?.num_elements()
}

fn output_elements(graph: &Graph, outputs: &[ValueId]) -> Option<u64> {
    outputs.first().and_then(|&out| elements(graph, out))
}

fn static_dims(graph: &Graph, value: ValueId) -> Option<Vec<usize>> {
    graph.value_type(value)?.static_dims()
}

fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn matmul_flops(graph: &Graph, inputs: &[ValueId], outputs: &[ValueId]) -> Option<i64> {
    let lhs = static_dims(graph, *inputs.first()?)?;
    let k = *lhs.last()? as u64;
    let out = output_elements(graph, outputs)?;
    Some(saturate(out.saturating_mul(k)))
}

fn gemm_flops(
    graph: &Graph,
    inputs: &[ValueId],
    outputs: &[ValueId],
    trans_a: bool,
) -> Option<i64> {
    let lhs = static_dims(graph, *inputs.first()?)?;
    if lhs.len() != 2 {
        return None;
    }
    let k = if trans_a { lhs[0] } else { lhs[1] } as u64;
    let out = output_elements(graph, outputs)?;
    Some(saturate(out.saturating_mul(k)))
}

/// Each output element accumulates `C_in / group * prod(kernel)` products,
/// which is exactly the product of the weight dims after the first.
fn conv_flops(graph: &Graph, inputs: &[ValueId], outputs: &[ValueId]) -> Option<i64> {
    let weight = static_dims(graph, *inputs.get(1)?)?;
    let per_output = weight
        .iter()
        .skip(1)
        .try_fold(1u64, |acc, &dim| acc.checked_mul(dim as u64))?;
    let out = output_elements(graph, outputs)?;
    Some(saturate(out.saturating_mul(per_output)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ValueType;
    use crate::tensor::Dtype;

    #[test]
    fn matmul_counts_one_flop_per_multiply_add() {
        let mut graph = Graph::new("mm");
        let a = graph
            .add_input_value("a", ValueType::new(Dtype::Float32, &[2, 3]))
            .unwrap();
        let b = graph
            .add_input_value("b", ValueType::new(Dtype::Float32, &[3, 4]))
            .unwrap();
        let c = graph
            .add_output_value("c", ValueType::new(Dtype::Float32, &[2, 4]))
            .unwrap();
        let node = graph.add_node(names::MATMUL, &[a, b], &[c]).unwrap();
        assert_eq!(node_flops(&graph, node), 2 * 4 * 3);
    }

    #[test]
    fn symbolic_shapes_count_zero() {
        let mut graph = Graph::new("relu");
        let x = graph.add_input_value("x", ValueType::unknown()).unwrap();
        let y = graph.add_output_value("y", ValueType::unknown()).unwrap();
        let node = graph.add_node(names::RELU, &[x], &[y]).unwrap();
        assert_eq!(node_flops(&graph, node), 0);
    }
}
