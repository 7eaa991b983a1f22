//! Local rewrites that lower decomposable operators into the primitive set a
//! backend implements. Each rewrite is a separately named pass so backend
//! configurations can enable them individually.

use super::{GraphPass, PassContext, PassError, PassResult};
use crate::graph::{Attribute, Graph, GraphError, NodeId, ValueType};
use crate::ops::names;
use crate::tensor::{Dtype, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrite {
    Less,
    LessOrEqual,
    GreaterOrEqual,
    Identity,
    Sum,
    ReduceMean,
    Sub,
}

/// A single named simplification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimplifierPass {
    rewrite: Rewrite,
}

impl SimplifierPass {
    pub const ALL_NAMES: &'static [&'static str] = &[
        "ReplaceLess",
        "ReplaceLessOrEqual",
        "ReplaceGreaterOrEqual",
        "ReplaceIdentity",
        "ReplaceSum",
        "ReplaceReduceMean",
        "ReplaceSub",
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let rewrite = match name {
            "ReplaceLess" => Rewrite::Less,
            "ReplaceLessOrEqual" => Rewrite::LessOrEqual,
            "ReplaceGreaterOrEqual" => Rewrite::GreaterOrEqual,
            "ReplaceIdentity" => Rewrite::Identity,
            "ReplaceSum" => Rewrite::Sum,
            "ReplaceReduceMean" => Rewrite::ReduceMean,
            "ReplaceSub" => Rewrite::Sub,
            _ => return None,
        };
        Some(Self { rewrite })
    }

    fn op_type(self) -> &'static str {
        match self.rewrite {
            Rewrite::Less => names::LESS,
            Rewrite::LessOrEqual => names::LESS_OR_EQUAL,
            Rewrite::GreaterOrEqual => names::GREATER_OR_EQUAL,
            Rewrite::Identity => names::IDENTITY,
            Rewrite::Sum => names::SUM,
            Rewrite::ReduceMean => names::REDUCE_MEAN,
            Rewrite::Sub => names::SUB,
        }
    }

    fn apply(self, graph: &mut Graph, id: NodeId) -> Result<bool, GraphError> {
        let node = graph.node(id)?;
        let inputs = node.inputs().to_vec();
        let output = match node.outputs() {
            [output] => *output,
            _ => return Ok(false),
        };
        let out_ty = graph.value(output)?.ty.clone();
        match self.rewrite {
            Rewrite::Less => {
                let [a, b] = inputs[..] else { return Ok(false) };
                graph.set_node_inputs(id, &[b, a])?;
                graph.node_mut(id)?.set_op_type(names::GREATER);
            }
            Rewrite::LessOrEqual | Rewrite::GreaterOrEqual => {
                let [a, b] = inputs[..] else { return Ok(false) };
                let (lhs, rhs) = match self.rewrite {
                    Rewrite::LessOrEqual => (a, b),
                    _ => (b, a),
                };
                let cmp = graph.add_fresh_value(&format!("{}_gt", graph.value_name(output)), out_ty);
                graph.add_node(names::GREATER, &[lhs, rhs], &[cmp])?;
                graph.set_node_inputs(id, &[cmp])?;
                graph.node_mut(id)?.set_op_type(names::NOT);
            }
            Rewrite::Identity => {
                let [x] = inputs[..] else { return Ok(false) };
                if graph.is_graph_output(output) {
                    return Ok(false);
                }
                graph.replace_all_uses(output, x)?;
                graph.remove_node(id)?;
            }
            Rewrite::Sum => match inputs.len() {
                0 => return Ok(false),
                1 => graph.node_mut(id)?.set_op_type(names::IDENTITY),
                _ => {
                    let mut acc = inputs[0];
                    for (idx, &next) in inputs[1..inputs.len() - 1].iter().enumerate() {
                        let partial = graph.add_fresh_value(
                            &format!("{}_sum{idx}", graph.value_name(output)),
                            out_ty.clone(),
                        );
                        graph.add_node(names::ADD, &[acc, next], &[partial])?;
                        acc = partial;
                    }
                    let last = inputs[inputs.len() - 1];
                    graph.set_node_inputs(id, &[acc, last])?;
                    graph.node_mut(id)?.set_op_type(names::ADD);
                }
            },
            Rewrite::ReduceMean => {
                let [x] = inputs[..] else { return Ok(false) };
                let in_ty = graph.value(x)?.ty.clone();
                let (Some(dims), Some(dtype)) = (in_ty.static_dims(), in_ty.dtype) else {
                    return Ok(false);
                };
                if !dtype.is_float() {
                    return Ok(false);
                }
                let node = graph.node(id)?;
                let axes = node.ints_attr("axes")?;
                let rank = dims.len() as i64;
                let count: usize = match &axes {
                    None => dims.iter().product(),
                    Some(axes) => {
                        let mut count = 1usize;
                        for &axis in axes {
                            let axis = if axis < 0 { axis + rank } else { axis };
                            if !(0..rank).contains(&axis) {
                                return Ok(false);
                            }
                            count *= dims[axis as usize];
                        }
                        count
                    }
                };
                let base = graph.value_name(output).to_string();
                let sum = graph.add_fresh_value(&format!("{base}_sum"), out_ty);
                let divisor_value = Tensor::scalar(format!("{base}_count"), dtype, count as f64)?;
                let divisor = graph.add_fresh_value(
                    &format!("{base}_count"),
                    ValueType::new(dtype, &[]),
                );
                let constant = graph.add_node(names::CONSTANT, &[], &[divisor])?;
                graph
                    .node_mut(constant)?
                    .set_attr("value", Attribute::Tensor(divisor_value));
                let reduce = graph.add_node(names::REDUCE_SUM, &[x], &[sum])?;
                let attrs = std::mem::take(graph.node_mut(id)?.attributes_mut());
                *graph.node_mut(reduce)?.attributes_mut() = attrs;
                graph.set_node_inputs(id, &[sum, divisor])?;
                graph.node_mut(id)?.set_op_type(names::DIV);
            }
            Rewrite::Sub => {
                let [a, b] = inputs[..] else { return Ok(false) };
                let b_ty = graph.value(b)?.ty.clone();
                if matches!(b_ty.dtype, Some(Dtype::Bool | Dtype::UInt8)) {
                    return Ok(false);
                }
                let negated = graph.add_fresh_value(&format!("{}_neg", graph.value_name(b)), b_ty);
                graph.add_node(names::NEG, &[b], &[negated])?;
                graph.set_node_inputs(id, &[a, negated])?;
                graph.node_mut(id)?.set_op_type(names::ADD);
            }
        }
        Ok(true)
    }
}

impl GraphPass for SimplifierPass {
    fn name(&self) -> &'static str {
        match self.rewrite {
            Rewrite::Less => "ReplaceLess",
            Rewrite::LessOrEqual => "ReplaceLessOrEqual",
            Rewrite::GreaterOrEqual => "ReplaceGreaterOrEqual",
            Rewrite::Identity => "ReplaceIdentity",
            Rewrite::Sum => "ReplaceSum",
            Rewrite::ReduceMean => "ReplaceReduceMean",
            Rewrite::Sub => "ReplaceSub",
        }
    }

    fn run(&self, graph: &mut Graph, _cx: &mut PassContext<'_>) -> Result<PassResult, PassError> {
        let op_type = self.op_type();
        let candidates: Vec<NodeId> = graph
            .sorted_nodes()?
            .into_iter()
            .filter(|&id| graph.node(id).is_ok_and(|n| n.op_type() == op_type))
            .collect();
        let mut rewrites = 0usize;
        let mut erased = 0usize;
        for id in candidates {
            if self.apply(graph, id)? {
                rewrites += 1;
                if graph.node(id).is_err() {
                    erased += 1;
                }
            }
        }
        Ok(PassResult {
            erased_nodes: erased,
            ..PassResult::rewrites(rewrites)
        })
    }
}
