//! Dtype and shape propagation along graph edges.
//!
//! Inference only refines: a known dtype or static extent is never replaced,
//! and a conflict between a declared and an inferred type is an error. Values
//! whose extent depends on data the compiler cannot see get a symbolic
//! dimension named after the producing node.

use super::{GraphPass, PassContext, PassError, PassResult};
use crate::graph::{Attribute, Dimension, Graph, NodeId, ValueKind, ValueType};
use crate::ops::{names, OpRegistry};
use crate::tensor::Dtype;

#[derive(Debug, Default, Clone, Copy)]
pub struct ShapeInferencePass;

impl ShapeInferencePass {
    const NAME: &'static str = "ShapeInference";
}

impl GraphPass for ShapeInferencePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<PassResult, PassError> {
        let config = cx.config();
        if config.reset_shape || config.reset_output_shape {
            reset_types(graph, config.reset_shape, config.reset_output_shape);
        }
        let updated = infer_graph(graph, cx.registry(), config.permissive)?;
        Ok(PassResult {
            changed: updated > 0,
            ..PassResult::default()
        })
    }
}

fn reset_types(graph: &mut Graph, temps: bool, outputs: bool) {
    let targets: Vec<_> = graph
        .live_values()
        .filter(|(id, value)| match value.kind() {
            ValueKind::Temp => temps && !graph.is_graph_output(*id),
            ValueKind::Output => outputs,
            _ => false,
        })
        .map(|(id, _)| id)
        .collect();
    for id in targets {
        if let Ok(value) = graph.value_mut(id) {
            value.ty = ValueType::unknown();
        }
    }
}

/// Propagates types through `graph` and every nested graph, returning how many
/// value types were refined.
fn infer_graph(graph: &mut Graph, registry: &OpRegistry, permissive: bool) -> Result<usize, PassError> {
    let mut updated = 0usize;
    for id in graph.sorted_nodes()? {
        updated += infer_bodies(graph, id, registry, permissive)?;
        let node = graph.node(id)?;
        let outputs = node.outputs().to_vec();
        let result = infer_node(graph, id, registry).and_then(|types| {
            outputs
                .iter()
                .zip(types)
                .map(|(&out, ty)| {
                    let current = &graph.value(out).map_err(|e| e.to_string())?.ty;
                    let merged = merge(current, ty)
                        .map_err(|msg| format!("output '{}': {msg}", graph.value_name(out)))?;
                    Ok((out, merged))
                })
                .collect::<Result<Vec<_>, String>>()
        });
        match result {
            Ok(assignments) => {
                for (out, ty) in assignments {
                    let value = graph.value_mut(out)?;
                    if value.ty != ty {
                        value.ty = ty;
                        updated += 1;
                    }
                }
            }
            Err(message) => {
                let node = graph.node(id)?;
                if permissive {
                    tracing::warn!(
                        node = node.name(),
                        op = node.op_type(),
                        %message,
                        "inference failed, leaving outputs unresolved"
                    );
                } else {
                    return Err(PassError::Inference {
                        node: node.name().to_string(),
                        op_type: node.op_type().to_string(),
                        message,
                    });
                }
            }
        }
    }
    Ok(updated)
}

/// Seeds nested graph inputs from the owning node, then infers the bodies.
fn infer_bodies(
    graph: &mut Graph,
    id: NodeId,
    registry: &OpRegistry,
    permissive: bool,
) -> Result<usize, PassError> {
    let node = graph.node(id)?;
    if !node.attributes().values().any(|a| matches!(a, Attribute::Graph(_))) {
        return Ok(0);
    }
    let op_type = node.op_type().to_string();
    let input_types: Vec<ValueType> = node
        .inputs()
        .iter()
        .map(|&v| graph.value_type(v).cloned().unwrap_or_default())
        .collect();

    let mut updated = 0usize;
    let keys: Vec<String> = node
        .attributes()
        .iter()
        .filter(|(_, a)| matches!(a, Attribute::Graph(_)))
        .map(|(k, _)| k.clone())
        .collect();
    for key in keys {
        let mut body = match graph.node_mut(id)?.attributes_mut().get_mut(&key) {
            Some(Attribute::Graph(body)) => std::mem::take(body.as_mut()),
            _ => continue,
        };
        let body_inputs = body.input_values().to_vec();
        for (pos, &input) in body_inputs.iter().enumerate() {
            let seed = match op_type.as_str() {
                names::IF => input_types.get(pos + 1).cloned(),
                names::LOOP if pos == 0 => Some(ValueType::new(Dtype::Int64, &[])),
                names::LOOP if pos == 1 => Some(ValueType::new(Dtype::Bool, &[])),
                _ => input_types.get(pos).cloned(),
            };
            if let Some(seed) = seed {
                let value = body.value_mut(input)?;
                if let Ok(merged) = merge(&value.ty, seed) {
                    value.ty = merged;
                }
            }
        }
        let result = infer_graph(&mut body, registry, permissive);
        if let Some(slot) = graph.node_mut(id)?.attributes_mut().get_mut(&key) {
            *slot = Attribute::Graph(Box::new(body));
        }
        updated += result?;
    }
    Ok(updated)
}

/// Output types of one node computed from its current input types.
pub fn infer_node(graph: &Graph, id: NodeId, registry: &OpRegistry) -> Result<Vec<ValueType>, String> {
    let node = graph.node(id).map_err(|e| e.to_string())?;
    let op = node.op_type();
    let Some(schema) = registry.get(op) else {
        return Err(format!("unknown operator type '{op}'"));
    };
    if !schema.accepts_inputs(node.inputs().len()) {
        return Err(format!("unexpected number of inputs: {}", node.inputs().len()));
    }
    let ins: Vec<ValueType> = node
        .inputs()
        .iter()
        .map(|&v| graph.value_type(v).cloned().unwrap_or_default())
        .collect();
    let attr_err = |e: crate::graph::AttributeKindError| e.to_string();
    let name = node.name();

    let ty = match op {
        names::IDENTITY | names::NEG | names::RELU | names::SIGMOID | names::TANH | names::EXP
        | names::LOG | names::SQRT | names::ABS | names::RECIPROCAL | names::FLOOR | names::CEIL
        | names::SOFTMAX | names::LOG_SOFTMAX | names::ZEROS_LIKE => ins[0].clone(),
        names::RELU_GRAD | names::SIGMOID_GRAD | names::TANH_GRAD => ins[1].clone(),
        names::CAST => {
            let to = node
                .int_attr("to")
                .map_err(attr_err)?
                .ok_or("missing attribute 'to'")?;
            let dtype = Dtype::from_onnx(to as i32).map_err(|e| e.to_string())?;
            ValueType {
                dtype: Some(dtype),
                shape: ins[0].shape.clone(),
            }
        }
        names::NOT => ValueType {
            dtype: Some(Dtype::Bool),
            shape: ins[0].shape.clone(),
        },
        names::ADD | names::SUB | names::MUL | names::DIV | names::POW | names::SUM | names::MAX | names::MIN => {
            let mut acc = ins[0].clone();
            for other in &ins[1..] {
                acc = ValueType {
                    dtype: same_dtype(acc.dtype, other.dtype)?,
                    shape: broadcast(&acc.shape, &other.shape)?,
                };
            }
            acc
        }
        names::LESS | names::GREATER | names::LESS_OR_EQUAL | names::GREATER_OR_EQUAL | names::EQUAL
        | names::AND | names::OR => ValueType {
            dtype: Some(Dtype::Bool),
            shape: broadcast(&ins[0].shape, &ins[1].shape)?,
        },
        names::WHERE => ValueType {
            dtype: same_dtype(ins[1].dtype, ins[2].dtype)?,
            shape: broadcast(&broadcast(&ins[0].shape, &ins[1].shape)?, &ins[2].shape)?,
        },
        names::CONSTANT => {
            let tensor = node
                .tensor_attr("value")
                .map_err(attr_err)?
                .ok_or("missing attribute 'value'")?;
            ValueType::of_tensor(tensor)
        }
        names::SHAPE => ValueType {
            dtype: Some(Dtype::Int64),
            shape: ins[0].rank().map(|r| vec![Dimension::Static(r)]),
        },
        names::RESHAPE => ValueType {
            dtype: ins[0].dtype,
            shape: match constant_ints(graph, node.inputs()[1]) {
                Some(target) => reshape(name, &ins[0], &target)?,
                None => None,
            },
        },
        names::TRANSPOSE => {
            let perm = node.ints_attr("perm").map_err(attr_err)?;
            ValueType {
                dtype: ins[0].dtype,
                shape: match &ins[0].shape {
                    None => None,
                    Some(dims) => {
                        let perm = perm.unwrap_or_else(|| (0..dims.len() as i64).rev().collect());
                        if perm.len() != dims.len() {
                            return Err(format!("perm {perm:?} does not match rank {}", dims.len()));
                        }
                        let mut out = Vec::with_capacity(dims.len());
                        for p in perm {
                            let axis = normalize_axis(p, dims.len())?;
                            out.push(dims[axis].clone());
                        }
                        Some(out)
                    }
                },
            }
        }
        names::FLATTEN => {
            let axis = node.int_attr("axis").map_err(attr_err)?.unwrap_or(1);
            ValueType {
                dtype: ins[0].dtype,
                shape: match ins[0].static_dims() {
                    Some(dims) => {
                        let axis = normalize_axis_inclusive(axis, dims.len())?;
                        let outer: usize = dims[..axis].iter().product();
                        let inner: usize = dims[axis..].iter().product();
                        Some(vec![Dimension::Static(outer), Dimension::Static(inner)])
                    }
                    None => None,
                },
            }
        }
        names::SQUEEZE | names::UNSQUEEZE => {
            let axes = match node.ints_attr("axes").map_err(attr_err)? {
                Some(axes) => Some(axes),
                None => node.inputs().get(1).and_then(|&v| constant_ints(graph, v)),
            };
            ValueType {
                dtype: ins[0].dtype,
                shape: if op == names::SQUEEZE {
                    squeeze(&ins[0], axes.as_deref())?
                } else {
                    match (&ins[0].shape, axes) {
                        (Some(dims), Some(axes)) => Some(unsqueeze(dims, &axes)?),
                        _ => None,
                    }
                },
            }
        }
        names::CONCAT => {
            let axis = node
                .int_attr("axis")
                .map_err(attr_err)?
                .ok_or("missing attribute 'axis'")?;
            let mut dtype = ins[0].dtype;
            for other in &ins[1..] {
                dtype = same_dtype(dtype, other.dtype)?;
            }
            ValueType {
                dtype,
                shape: concat(name, &ins, axis)?,
            }
        }
        names::EXPAND => ValueType {
            dtype: ins[0].dtype,
            shape: match constant_ints(graph, node.inputs()[1]) {
                Some(target) => broadcast(&ins[0].shape, &Some(static_shape(&target)?))?,
                None => None,
            },
        },
        names::GATHER => {
            let axis = node.int_attr("axis").map_err(attr_err)?.unwrap_or(0);
            ValueType {
                dtype: ins[0].dtype,
                shape: match (&ins[0].shape, &ins[1].shape) {
                    (Some(data), Some(indices)) => {
                        let axis = normalize_axis(axis, data.len())?;
                        let mut out = data[..axis].to_vec();
                        out.extend(indices.iter().cloned());
                        out.extend(data[axis + 1..].iter().cloned());
                        Some(out)
                    }
                    _ => None,
                },
            }
        }
        names::REDUCE_SUM | names::REDUCE_MEAN | names::REDUCE_MAX => {
            let axes = match node.ints_attr("axes").map_err(attr_err)? {
                Some(axes) => Some(axes),
                None => match node.inputs().get(1) {
                    Some(&v) => Some(constant_ints(graph, v).ok_or("axes input is not constant")?),
                    None => None,
                },
            };
            let keepdims = node.int_attr("keepdims").map_err(attr_err)?.unwrap_or(1) != 0;
            ValueType {
                dtype: ins[0].dtype,
                shape: match &ins[0].shape {
                    Some(dims) => Some(reduce(dims, axes.as_deref(), keepdims)?),
                    None => None,
                },
            }
        }
        names::REDUCE_SUM_TO => {
            let target = match node.ints_attr("shape").map_err(attr_err)? {
                Some(shape) => Some(shape),
                None => node.inputs().get(1).and_then(|&v| constant_ints(graph, v)),
            };
            ValueType {
                dtype: ins[0].dtype,
                shape: match target {
                    Some(target) => Some(static_shape(&target)?),
                    None => node
                        .inputs()
                        .get(1)
                        .and_then(|&v| shape_source(graph, v))
                        .and_then(|src| src.shape.clone()),
                },
            }
        }
        names::MATMUL => ValueType {
            dtype: same_dtype(ins[0].dtype, ins[1].dtype)?,
            shape: matmul(&ins[0].shape, &ins[1].shape)?,
        },
        names::GEMM => {
            let trans_a = node.int_attr("transA").map_err(attr_err)?.unwrap_or(0) != 0;
            let trans_b = node.int_attr("transB").map_err(attr_err)?.unwrap_or(0) != 0;
            ValueType {
                dtype: same_dtype(ins[0].dtype, ins[1].dtype)?,
                shape: gemm(&ins[0].shape, &ins[1].shape, trans_a, trans_b)?,
            }
        }
        names::CONV => {
            let strides = node.ints_attr("strides").map_err(attr_err)?;
            let pads = node.ints_attr("pads").map_err(attr_err)?;
            let dilations = node.ints_attr("dilations").map_err(attr_err)?;
            ValueType {
                dtype: same_dtype(ins[0].dtype, ins[1].dtype)?,
                shape: conv(
                    name,
                    &ins[0].shape,
                    &ins[1].shape,
                    strides.as_deref(),
                    pads.as_deref(),
                    dilations.as_deref(),
                )?,
            }
        }
        names::IF | names::FUSION_GROUP => {
            let key = if op == names::IF { "then_branch" } else { "subgraph" };
            let body = node
                .graph_attr(key)
                .map_err(attr_err)?
                .ok_or_else(|| format!("missing attribute '{key}'"))?;
            return Ok(body
                .output_values()
                .iter()
                .map(|&v| body.value_type(v).cloned().unwrap_or_default())
                .collect());
        }
        names::LOOP => {
            let body = node
                .graph_attr("body")
                .map_err(attr_err)?
                .ok_or("missing attribute 'body'")?;
            return Ok(body
                .output_values()
                .iter()
                .skip(1)
                .map(|&v| ValueType {
                    dtype: body.value_type(v).and_then(|t| t.dtype),
                    shape: None,
                })
                .collect());
        }
        _ => return Ok(vec![ValueType::unknown(); node.outputs().len()]),
    };
    Ok(vec![ty])
}

/// Combines a current type with an inferred one, keeping every known fact.
pub(crate) fn merge(current: &ValueType, inferred: ValueType) -> Result<ValueType, String> {
    let dtype = same_dtype(current.dtype, inferred.dtype)
        .map_err(|_| format!("declared {current}, inferred {inferred}"))?;
    let shape = match (&current.shape, inferred.shape.clone()) {
        (None, shape) => shape,
        (Some(dims), None) => Some(dims.clone()),
        (Some(a), Some(b)) => {
            if a.len() != b.len() {
                return Err(format!("declared {current}, inferred {inferred}"));
            }
            let mut out = Vec::with_capacity(a.len());
            for (x, y) in a.iter().zip(b) {
                out.push(match (x, y) {
                    (Dimension::Static(p), Dimension::Static(q)) if *p != q => {
                        return Err(format!("declared {current}, inferred {inferred}"));
                    }
                    (Dimension::Static(_), _) => x.clone(),
                    (Dimension::Symbolic(_), y @ Dimension::Static(_)) => y,
                    (Dimension::Symbolic(_), _) => x.clone(),
                });
            }
            Some(out)
        }
    };
    Ok(ValueType { dtype, shape })
}

fn same_dtype(a: Option<Dtype>, b: Option<Dtype>) -> Result<Option<Dtype>, String> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(format!("dtype mismatch: {x} vs {y}")),
        (Some(x), _) => Ok(Some(x)),
        (None, y) => Ok(y),
    }
}

/// Numpy-style broadcast of two shapes.
pub(crate) fn broadcast(
    a: &Option<Vec<Dimension>>,
    b: &Option<Vec<Dimension>>,
) -> Result<Option<Vec<Dimension>>, String> {
    let (Some(a), Some(b)) = (a, b) else {
        return Ok(None);
    };
    let rank = a.len().max(b.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let x = (i + a.len()).checked_sub(rank).map(|j| &a[j]);
        let y = (i + b.len()).checked_sub(rank).map(|j| &b[j]);
        out.push(match (x, y) {
            (Some(x), None) => x.clone(),
            (None, Some(y)) => y.clone(),
            (Some(x), Some(y)) => match (x, y) {
                (Dimension::Static(1), other) | (other, Dimension::Static(1)) => other.clone(),
                (Dimension::Static(p), Dimension::Static(q)) if p != q => {
                    return Err(format!("cannot broadcast dimension {p} against {q}"));
                }
                (Dimension::Symbolic(_), s @ Dimension::Static(_)) => s.clone(),
                (x, _) => x.clone(),
            },
            (None, None) => unreachable!("index is below the larger rank"),
        });
    }
    Ok(Some(out))
}

fn normalize_axis(axis: i64, rank: usize) -> Result<usize, String> {
    let r = rank as i64;
    let a = if axis < 0 { axis + r } else { axis };
    if (0..r).contains(&a) {
        Ok(a as usize)
    } else {
        Err(format!("axis {axis} out of range for rank {rank}"))
    }
}

fn normalize_axis_inclusive(axis: i64, rank: usize) -> Result<usize, String> {
    let r = rank as i64;
    let a = if axis < 0 { axis + r } else { axis };
    if (0..=r).contains(&a) {
        Ok(a as usize)
    } else {
        Err(format!("axis {axis} out of range for rank {rank}"))
    }
}

fn static_shape(dims: &[i64]) -> Result<Vec<Dimension>, String> {
    dims.iter()
        .map(|&d| {
            usize::try_from(d)
                .map(Dimension::Static)
                .map_err(|_| format!("negative extent {d}"))
        })
        .collect()
}

/// Integer contents of a value known at compile time: an initializer, a
/// `Constant` output, or the result of `Shape` on a statically shaped value.
pub(crate) fn constant_ints(graph: &Graph, value: crate::graph::ValueId) -> Option<Vec<i64>> {
    let slot = graph.value(value).ok()?;
    if let Some(init) = slot.initializer() {
        return init.to_i64_vec().ok();
    }
    let producer = graph.node(slot.producer()?).ok()?;
    match producer.op_type() {
        names::CONSTANT => producer.tensor_attr("value").ok()??.to_i64_vec().ok(),
        names::SHAPE => {
            let dims = graph.value_type(producer.inputs()[0])?.static_dims()?;
            Some(dims.into_iter().map(|d| d as i64).collect())
        }
        _ => None,
    }
}

/// The value whose shape a `Shape` node exposes.
fn shape_source(graph: &Graph, value: crate::graph::ValueId) -> Option<&ValueType> {
    let producer = graph.node(graph.value(value).ok()?.producer()?).ok()?;
    if producer.op_type() != names::SHAPE {
        return None;
    }
    graph.value_type(producer.inputs()[0])
}

fn reshape(node: &str, input: &ValueType, target: &[i64]) -> Result<Option<Vec<Dimension>>, String> {
    let in_dims = input.shape.as_ref();
    let mut out = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (i, &t) in target.iter().enumerate() {
        out.push(match t {
            0 => match in_dims.and_then(|d| d.get(i)) {
                Some(dim) => dim.clone(),
                None => Dimension::Symbolic(format!("{node}:{i}")),
            },
            -1 => {
                if infer_at.replace(i).is_some() {
                    return Err("reshape target has more than one -1".into());
                }
                Dimension::Symbolic(format!("{node}:{i}"))
            }
            t if t > 0 => Dimension::Static(t as usize),
            t => return Err(format!("invalid reshape extent {t}")),
        });
    }
    if let (Some(i), Some(total)) = (infer_at, input.num_elements()) {
        let known: Option<u64> = out
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, d)| match d {
                Dimension::Static(s) => Some(*s as u64),
                Dimension::Symbolic(_) => None,
            })
            .product();
        if let Some(known) = known {
            if known == 0 || total % known != 0 {
                return Err(format!("cannot reshape {total} elements into {target:?}"));
            }
            out[i] = Dimension::Static((total / known) as usize);
        }
    } else if let (None, Some(total)) = (infer_at, input.num_elements()) {
        let count: Option<u64> = out
            .iter()
            .map(|d| match d {
                Dimension::Static(s) => Some(*s as u64),
                Dimension::Symbolic(_) => None,
            })
            .product();
        if count.is_some_and(|c| c != total) {
            return Err(format!("cannot reshape {total} elements into {target:?}"));
        }
    }
    Ok(Some(out))
}

fn squeeze(input: &ValueType, axes: Option<&[i64]>) -> Result<Option<Vec<Dimension>>, String> {
    let Some(dims) = &input.shape else {
        return Ok(None);
    };
    match axes {
        Some(axes) => {
            let mut drop = Vec::with_capacity(axes.len());
            for &axis in axes {
                let axis = normalize_axis(axis, dims.len())?;
                if matches!(dims[axis], Dimension::Static(d) if d != 1) {
                    return Err(format!("cannot squeeze axis {axis} of extent {}", dims[axis]));
                }
                drop.push(axis);
            }
            Ok(Some(
                dims.iter()
                    .enumerate()
                    .filter(|(i, _)| !drop.contains(i))
                    .map(|(_, d)| d.clone())
                    .collect(),
            ))
        }
        None => {
            if dims.iter().any(|d| matches!(d, Dimension::Symbolic(_))) {
                return Ok(None);
            }
            Ok(Some(
                dims.iter()
                    .filter(|d| **d != Dimension::Static(1))
                    .cloned()
                    .collect(),
            ))
        }
    }
}

fn unsqueeze(dims: &[Dimension], axes: &[i64]) -> Result<Vec<Dimension>, String> {
    let rank = dims.len() + axes.len();
    let mut positions = Vec::with_capacity(axes.len());
    for &axis in axes {
        positions.push(normalize_axis(axis, rank)?);
    }
    positions.sort_unstable();
    let mut out = Vec::with_capacity(rank);
    let mut source = dims.iter();
    for i in 0..rank {
        if positions.contains(&i) {
            out.push(Dimension::Static(1));
        } else if let Some(dim) = source.next() {
            out.push(dim.clone());
        }
    }
    Ok(out)
}

fn concat(node: &str, ins: &[ValueType], axis: i64) -> Result<Option<Vec<Dimension>>, String> {
    let Some(first) = ins[0].shape.as_ref() else {
        return Ok(None);
    };
    let axis = normalize_axis(axis, first.len())?;
    let mut out = first.clone();
    let mut total = Some(0usize);
    for input in ins {
        let Some(dims) = &input.shape else {
            return Ok(None);
        };
        if dims.len() != first.len() {
            return Err(format!("rank mismatch: {} vs {}", dims.len(), first.len()));
        }
        total = match (&dims[axis], total) {
            (Dimension::Static(d), Some(t)) => Some(t + d),
            _ => None,
        };
    }
    out[axis] = match total {
        Some(t) => Dimension::Static(t),
        None => Dimension::Symbolic(format!("{node}:{axis}")),
    };
    Ok(Some(out))
}

fn reduce(dims: &[Dimension], axes: Option<&[i64]>, keepdims: bool) -> Result<Vec<Dimension>, String> {
    let reduced: Vec<usize> = match axes {
        None => (0..dims.len()).collect(),
        Some(axes) => axes
            .iter()
            .map(|&a| normalize_axis(a, dims.len()))
            .collect::<Result<_, _>>()?,
    };
    let mut out = Vec::with_capacity(dims.len());
    for (i, dim) in dims.iter().enumerate() {
        if reduced.contains(&i) {
            if keepdims {
                out.push(Dimension::Static(1));
            }
        } else {
            out.push(dim.clone());
        }
    }
    Ok(out)
}

fn check_contraction(a: &Dimension, b: &Dimension) -> Result<(), String> {
    match (a, b) {
        (Dimension::Static(p), Dimension::Static(q)) if p != q => {
            Err(format!("contraction mismatch: {p} vs {q}"))
        }
        _ => Ok(()),
    }
}

fn matmul(
    a: &Option<Vec<Dimension>>,
    b: &Option<Vec<Dimension>>,
) -> Result<Option<Vec<Dimension>>, String> {
    let (Some(a), Some(b)) = (a, b) else {
        return Ok(None);
    };
    if a.is_empty() || b.is_empty() {
        return Err("matmul operands must have rank >= 1".into());
    }
    let a_vec = a.len() == 1;
    let b_vec = b.len() == 1;
    let a2: Vec<Dimension> = if a_vec {
        vec![Dimension::Static(1), a[0].clone()]
    } else {
        a.clone()
    };
    let b2: Vec<Dimension> = if b_vec {
        vec![b[0].clone(), Dimension::Static(1)]
    } else {
        b.clone()
    };
    check_contraction(&a2[a2.len() - 1], &b2[b2.len() - 2])?;
    let batch = broadcast(
        &Some(a2[..a2.len() - 2].to_vec()),
        &Some(b2[..b2.len() - 2].to_vec()),
    )?
    .unwrap_or_default();
    let mut out = batch;
    if !a_vec {
        out.push(a2[a2.len() - 2].clone());
    }
    if !b_vec {
        out.push(b2[b2.len() - 1].clone());
    }
    Ok(Some(out))
}

fn gemm(
    a: &Option<Vec<Dimension>>,
    b: &Option<Vec<Dimension>>,
    trans_a: bool,
    trans_b: bool,
) -> Result<Option<Vec<Dimension>>, String> {
    let (Some(a), Some(b)) = (a, b) else {
        return Ok(None);
    };
    if a.len() != 2 || b.len() != 2 {
        return Err("gemm operands must be rank 2".into());
    }
    let (m, ka) = if trans_a { (&a[1], &a[0]) } else { (&a[0], &a[1]) };
    let (kb, n) = if trans_b { (&b[1], &b[0]) } else { (&b[0], &b[1]) };
    check_contraction(ka, kb)?;
    Ok(Some(vec![m.clone(), n.clone()]))
}

fn conv(
    node: &str,
    x: &Option<Vec<Dimension>>,
    w: &Option<Vec<Dimension>>,
    strides: Option<&[i64]>,
    pads: Option<&[i64]>,
    dilations: Option<&[i64]>,
) -> Result<Option<Vec<Dimension>>, String> {
    let (Some(x), Some(w)) = (x, w) else {
        return Ok(None);
    };
    if x.len() < 3 || x.len() != w.len() {
        return Err(format!("conv rank mismatch: input {} vs weight {}", x.len(), w.len()));
    }
    let spatial = x.len() - 2;
    let mut out = vec![x[0].clone(), w[0].clone()];
    for i in 0..spatial {
        let stride = strides.and_then(|s| s.get(i)).copied().unwrap_or(1);
        let dilation = dilations.and_then(|d| d.get(i)).copied().unwrap_or(1);
        let pad = pads
            .map(|p| p.get(i).copied().unwrap_or(0) + p.get(i + spatial).copied().unwrap_or(0))
            .unwrap_or(0);
        if stride <= 0 || dilation <= 0 {
            return Err("conv strides and dilations must be positive".into());
        }
        out.push(match (&x[i + 2], &w[i + 2]) {
            (Dimension::Static(input), Dimension::Static(kernel)) => {
                let span = dilation * (*kernel as i64 - 1) + 1;
                let extent = *input as i64 + pad - span;
                if extent < 0 {
                    return Err(format!("kernel larger than padded input on axis {}", i + 2));
                }
                Dimension::Static((extent / stride + 1) as usize)
            }
            _ => Dimension::Symbolic(format!("{node}:{}", i + 2)),
        });
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(values: &[usize]) -> Option<Vec<Dimension>> {
        Some(values.iter().map(|&v| Dimension::Static(v)).collect())
    }

    #[test]
    fn broadcast_follows_numpy_rules() {
        assert_eq!(broadcast(&dims(&[2, 1, 3]), &dims(&[4, 1])).unwrap(), dims(&[2, 4, 3]));
        assert!(broadcast(&dims(&[2, 3]), &dims(&[4, 3])).is_err());
    }

    #[test]
    fn matmul_handles_batches_and_vectors() {
        assert_eq!(matmul(&dims(&[5, 2, 3]), &dims(&[3, 4])).unwrap(), dims(&[5, 2, 4]));
        assert_eq!(matmul(&dims(&[3]), &dims(&[3, 4])).unwrap(), dims(&[4]));
        assert!(matmul(&dims(&[2, 3]), &dims(&[2, 4])).is_err());
    }

    #[test]
    fn reshape_resolves_single_wildcard() {
        let input = ValueType::new(Dtype::Float32, &[2, 3, 4]);
        assert_eq!(reshape("r", &input, &[0, -1]).unwrap(), dims(&[2, 12]));
        assert!(reshape("r", &input, &[5, -1]).is_err());
    }
}
