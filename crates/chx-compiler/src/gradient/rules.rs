//! Per-operator backward rules.
//!
//! A rule receives the gradients of the node's outputs (`None` where an output
//! has no gradient) and returns one optional gradient per node input. Rules
//! only build gradients for inputs the caller needs.

use super::{Builder, GradientError};
use crate::graph::{Attribute, GraphError, Node, NodeId, ValueId, ValueType};
use crate::ops::names;
use crate::passes::constant_ints;
use crate::tensor::{Dtype, Tensor};

type RuleResult = Result<Vec<Option<ValueId>>, GradientError>;

/// Backward rule signature.
pub type BackwardRule = fn(&mut RuleContext<'_, '_>, &[Option<ValueId>]) -> RuleResult;

/// Looks up the registered backward rule for an operator type.
pub fn backward_rule(op_type: &str) -> Option<BackwardRule> {
    let rule: BackwardRule = match op_type {
        names::IDENTITY => identity,
        names::ADD => add,
        names::SUB => sub,
        names::MUL => mul,
        names::DIV => div,
        names::NEG => neg,
        names::RELU => relu,
        names::SIGMOID => sigmoid,
        names::TANH => tanh,
        names::EXP => exp,
        names::LOG => log,
        names::SQRT => sqrt,
        names::MATMUL => matmul,
        names::GEMM => gemm,
        names::TRANSPOSE => transpose,
        names::RESHAPE => reshape,
        names::REDUCE_SUM => reduce_sum,
        names::REDUCE_MEAN => reduce_mean,
        names::SOFTMAX => softmax,
        names::SUM => sum,
        names::WHERE => where_,
        names::CAST => cast,
        names::LESS | names::GREATER | names::LESS_OR_EQUAL | names::GREATER_OR_EQUAL | names::EQUAL
        | names::AND | names::OR | names::NOT | names::SHAPE | names::CONSTANT | names::ZEROS_LIKE => {
            non_differentiable
        }
        _ => return None,
    };
    Some(rule)
}

/// View of one forward node while its backward rule runs.
pub struct RuleContext<'b, 'f> {
    builder: &'b mut Builder<'f>,
    node: &'f Node,
    needs: Vec<bool>,
}

impl<'b, 'f> RuleContext<'b, 'f> {
    pub(crate) fn new(
        builder: &'b mut Builder<'f>,
        node: NodeId,
        needs: Vec<bool>,
    ) -> Result<Self, GraphError> {
        let forward = builder.forward;
        let node = forward.node(node)?;
        Ok(Self {
            builder,
            node,
            needs,
        })
    }

    fn inputs_len(&self) -> usize {
        self.node.inputs().len()
    }

    fn needs(&self, index: usize) -> bool {
        self.needs.get(index).copied().unwrap_or(false)
    }

    fn x(&mut self, index: usize) -> Result<ValueId, GradientError> {
        Ok(self.builder.forward_value(self.node.inputs()[index])?)
    }

    fn y(&mut self, index: usize) -> Result<ValueId, GradientError> {
        Ok(self.builder.forward_value(self.node.outputs()[index])?)
    }

    fn in_type(&self, index: usize) -> ValueType {
        self.builder
            .forward
            .value_type(self.node.inputs()[index])
            .cloned()
            .unwrap_or_default()
    }

    fn out_type(&self, index: usize) -> ValueType {
        self.builder
            .forward
            .value_type(self.node.outputs()[index])
            .cloned()
            .unwrap_or_default()
    }

    fn float_dtype(&self) -> Dtype {
        self.out_type(0)
            .dtype
            .filter(|d| d.is_float())
            .unwrap_or(Dtype::Float32)
    }

    fn op(&mut self, op_type: &str, inputs: &[ValueId]) -> Result<ValueId, GradientError> {
        Ok(self.builder.emit(op_type, inputs, Vec::new())?)
    }

    fn op_with(
        &mut self,
        op_type: &str,
        inputs: &[ValueId],
        attrs: Vec<(&str, Attribute)>,
    ) -> Result<ValueId, GradientError> {
        Ok(self.builder.emit(op_type, inputs, attrs)?)
    }

    fn scalar(&mut self, value: f64) -> Result<ValueId, GradientError> {
        let dtype = self.float_dtype();
        let tensor = Tensor::scalar("grad_const", dtype, value)?;
        self.op_with(names::CONSTANT, &[], vec![("value", Attribute::Tensor(tensor))])
    }

    /// Shape of forward input `index` as an int64 vector value.
    fn shape_of(&mut self, index: usize) -> Result<ValueId, GradientError> {
        match self.in_type(index).static_dims() {
            Some(dims) => {
                let values: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
                let tensor = Tensor::from_values("grad_shape", Dtype::Int64, vec![values.len()], &values)?;
                self.op_with(names::CONSTANT, &[], vec![("value", Attribute::Tensor(tensor))])
            }
            None => {
                let x = self.x(index)?;
                self.op(names::SHAPE, &[x])
            }
        }
    }

    /// Sums a broadcast gradient back down to the shape of input `index`.
    fn reduce_to(&mut self, grad: ValueId, index: usize) -> Result<ValueId, GradientError> {
        let in_ty = self.in_type(index);
        let out_ty = self.out_type(0);
        if in_ty.shape.is_some() && in_ty.static_dims().is_some() && in_ty.shape == out_ty.shape {
            return Ok(grad);
        }
        match in_ty.static_dims() {
            Some(dims) => {
                let dims = dims.iter().map(|&d| d as i64).collect();
                self.op_with(names::REDUCE_SUM_TO, &[grad], vec![("shape", Attribute::Ints(dims))])
            }
            None => {
                let x = self.x(index)?;
                let shape = self.op(names::SHAPE, &[x])?;
                self.op(names::REDUCE_SUM_TO, &[grad, shape])
            }
        }
    }

    fn fail(&self, message: impl Into<String>) -> GradientError {
        GradientError::Rule {
            node: self.node.name().to_string(),
            message: message.into(),
        }
    }
}

fn first(gys: &[Option<ValueId>]) -> Option<ValueId> {
    gys.first().copied().flatten()
}

fn none(cx: &RuleContext<'_, '_>) -> Vec<Option<ValueId>> {
    vec![None; cx.inputs_len()]
}

fn non_differentiable(cx: &mut RuleContext<'_, '_>, _gys: &[Option<ValueId>]) -> RuleResult {
    Ok(none(cx))
}

fn identity(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    Ok(vec![first(gys).filter(|_| cx.needs(0))])
}

fn add(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    for i in 0..2 {
        if cx.needs(i) {
            out[i] = Some(cx.reduce_to(gy, i)?);
        }
    }
    Ok(out)
}

fn sub(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    if cx.needs(0) {
        out[0] = Some(cx.reduce_to(gy, 0)?);
    }
    if cx.needs(1) {
        let negated = cx.op(names::NEG, &[gy])?;
        out[1] = Some(cx.reduce_to(negated, 1)?);
    }
    Ok(out)
}

fn mul(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    for (i, other) in [(0, 1), (1, 0)] {
        if cx.needs(i) {
            let factor = cx.x(other)?;
            let scaled = cx.op(names::MUL, &[gy, factor])?;
            out[i] = Some(cx.reduce_to(scaled, i)?);
        }
    }
    Ok(out)
}

fn div(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    let b = cx.x(1)?;
    if cx.needs(0) {
        let ga = cx.op(names::DIV, &[gy, b])?;
        out[0] = Some(cx.reduce_to(ga, 0)?);
    }
    if cx.needs(1) {
        let y = cx.y(0)?;
        let gy_y = cx.op(names::MUL, &[gy, y])?;
        let quotient = cx.op(names::DIV, &[gy_y, b])?;
        let gb = cx.op(names::NEG, &[quotient])?;
        out[1] = Some(cx.reduce_to(gb, 1)?);
    }
    Ok(out)
}

fn neg(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    Ok(vec![Some(cx.op(names::NEG, &[gy])?)])
}

fn activation(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>], grad_op: &str) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    let y = cx.y(0)?;
    Ok(vec![Some(cx.op(grad_op, &[y, gy])?)])
}

fn relu(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    activation(cx, gys, names::RELU_GRAD)
}

fn sigmoid(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    activation(cx, gys, names::SIGMOID_GRAD)
}

fn tanh(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    activation(cx, gys, names::TANH_GRAD)
}

fn exp(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    let y = cx.y(0)?;
    Ok(vec![Some(cx.op(names::MUL, &[gy, y])?)])
}

fn log(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    let x = cx.x(0)?;
    Ok(vec![Some(cx.op(names::DIV, &[gy, x])?)])
}

fn sqrt(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    let half = cx.scalar(0.5)?;
    let scaled = cx.op(names::MUL, &[gy, half])?;
    let y = cx.y(0)?;
    Ok(vec![Some(cx.op(names::DIV, &[scaled, y])?)])
}

fn transposed(cx: &mut RuleContext<'_, '_>, value: ValueId) -> Result<ValueId, GradientError> {
    cx.op_with(names::TRANSPOSE, &[value], vec![("perm", Attribute::Ints(vec![1, 0]))])
}

fn matmul(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    if cx.in_type(0).rank() != Some(2) || cx.in_type(1).rank() != Some(2) {
        return Err(cx.fail("MatMul gradient requires rank-2 operands"));
    }
    if cx.needs(0) {
        let b = cx.x(1)?;
        let bt = transposed(cx, b)?;
        out[0] = Some(cx.op(names::MATMUL, &[gy, bt])?);
    }
    if cx.needs(1) {
        let a = cx.x(0)?;
        let at = transposed(cx, a)?;
        out[1] = Some(cx.op(names::MATMUL, &[at, gy])?);
    }
    Ok(out)
}

fn gemm(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    let trans_a = cx.node.int_attr("transA")?.unwrap_or(0) != 0;
    let trans_b = cx.node.int_attr("transB")?.unwrap_or(0) != 0;
    let alpha = cx.node.float_attr("alpha")?.unwrap_or(1.0);
    let beta = cx.node.float_attr("beta")?.unwrap_or(1.0);

    if cx.needs(0) {
        let b = cx.x(1)?;
        let ga = if trans_a {
            let op_b = if trans_b { transposed(cx, b)? } else { b };
            let gyt = transposed(cx, gy)?;
            cx.op(names::MATMUL, &[op_b, gyt])?
        } else {
            let op_bt = if trans_b { b } else { transposed(cx, b)? };
            cx.op(names::MATMUL, &[gy, op_bt])?
        };
        out[0] = Some(scaled(cx, ga, alpha)?);
    }
    if cx.needs(1) {
        let a = cx.x(0)?;
        let gb = if trans_b {
            let op_a = if trans_a { transposed(cx, a)? } else { a };
            let gyt = transposed(cx, gy)?;
            cx.op(names::MATMUL, &[gyt, op_a])?
        } else {
            let op_at = if trans_a { a } else { transposed(cx, a)? };
            cx.op(names::MATMUL, &[op_at, gy])?
        };
        out[1] = Some(scaled(cx, gb, alpha)?);
    }
    if cx.inputs_len() > 2 && cx.needs(2) {
        let gc = scaled(cx, gy, beta)?;
        out[2] = Some(cx.reduce_to(gc, 2)?);
    }
    Ok(out)
}

fn scaled(cx: &mut RuleContext<'_, '_>, value: ValueId, factor: f32) -> Result<ValueId, GradientError> {
    if factor == 1.0 {
        return Ok(value);
    }
    let k = cx.scalar(f64::from(factor))?;
    cx.op(names::MUL, &[value, k])
}

fn transpose(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    let gx = match cx.node.ints_attr("perm")? {
        Some(perm) => {
            let mut inverse = vec![0i64; perm.len()];
            for (i, &p) in perm.iter().enumerate() {
                let slot = usize::try_from(p)
                    .ok()
                    .filter(|&p| p < perm.len())
                    .ok_or_else(|| cx.fail(format!("invalid perm {perm:?}")))?;
                inverse[slot] = i as i64;
            }
            cx.op_with(names::TRANSPOSE, &[gy], vec![("perm", Attribute::Ints(inverse))])?
        }
        None => cx.op(names::TRANSPOSE, &[gy])?,
    };
    Ok(vec![Some(gx)])
}

fn reshape(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    let shape = cx.shape_of(0)?;
    out[0] = Some(cx.op(names::RESHAPE, &[gy, shape])?);
    Ok(out)
}

/// Axes a reduction node reduces over, normalized against the input rank.
fn reduction_axes(cx: &RuleContext<'_, '_>) -> Result<Option<Vec<i64>>, GradientError> {
    let axes = match cx.node.ints_attr("axes")? {
        Some(axes) => Some(axes),
        None => match cx.node.inputs().get(1) {
            Some(&v) => Some(
                constant_ints(cx.builder.forward, v)
                    .ok_or_else(|| cx.fail("reduction axes must be constant"))?,
            ),
            None => None,
        },
    };
    let Some(axes) = axes else { return Ok(None) };
    let rank = cx.in_type(0).rank();
    axes.into_iter()
        .map(|a| match (a < 0, rank) {
            (false, _) => Ok(a),
            (true, Some(rank)) => Ok(a + rank as i64),
            (true, None) => Err(cx.fail("negative reduction axis on a value of unknown rank")),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn broadcast_reduction_grad(
    cx: &mut RuleContext<'_, '_>,
    gy: ValueId,
) -> Result<(ValueId, Option<Vec<i64>>), GradientError> {
    let axes = reduction_axes(cx)?;
    let keepdims = cx.node.int_attr("keepdims")?.unwrap_or(1) != 0;
    let restored = match (&axes, keepdims) {
        (Some(axes), false) => {
            cx.op_with(names::UNSQUEEZE, &[gy], vec![("axes", Attribute::Ints(axes.clone()))])?
        }
        _ => gy,
    };
    let shape = cx.shape_of(0)?;
    Ok((cx.op(names::EXPAND, &[restored, shape])?, axes))
}

fn reduce_sum(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    out[0] = Some(broadcast_reduction_grad(cx, gy)?.0);
    Ok(out)
}

fn reduce_mean(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    let dims = cx
        .in_type(0)
        .static_dims()
        .ok_or_else(|| cx.fail("ReduceMean gradient requires a static input shape"))?;
    let (expanded, axes) = broadcast_reduction_grad(cx, gy)?;
    let count: usize = match axes {
        None => dims.iter().product(),
        Some(axes) => axes
            .iter()
            .map(|&a| dims.get(a as usize).copied().unwrap_or(1))
            .product(),
    };
    let inv = cx.scalar(1.0 / count.max(1) as f64)?;
    out[0] = Some(cx.op(names::MUL, &[expanded, inv])?);
    Ok(out)
}

fn softmax(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    let axis = cx.node.int_attr("axis")?.unwrap_or(-1);
    let y = cx.y(0)?;
    let gy_y = cx.op(names::MUL, &[gy, y])?;
    let summed = cx.op_with(
        names::REDUCE_SUM,
        &[gy_y],
        vec![
            ("axes", Attribute::Ints(vec![axis])),
            ("keepdims", Attribute::Int(1)),
        ],
    )?;
    let centered = cx.op(names::SUB, &[gy, summed])?;
    Ok(vec![Some(cx.op(names::MUL, &[y, centered])?)])
}

fn sum(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    for i in 0..cx.inputs_len() {
        if cx.needs(i) {
            out[i] = Some(cx.reduce_to(gy, i)?);
        }
    }
    Ok(out)
}

fn where_(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let mut out = none(cx);
    let Some(gy) = first(gys) else { return Ok(out) };
    if !cx.needs(1) && !cx.needs(2) {
        return Ok(out);
    }
    let cond = cx.x(0)?;
    let zeros = cx.op(names::ZEROS_LIKE, &[gy])?;
    if cx.needs(1) {
        let masked = cx.op(names::WHERE, &[cond, gy, zeros])?;
        out[1] = Some(cx.reduce_to(masked, 1)?);
    }
    if cx.needs(2) {
        let masked = cx.op(names::WHERE, &[cond, zeros, gy])?;
        out[2] = Some(cx.reduce_to(masked, 2)?);
    }
    Ok(out)
}

fn cast(cx: &mut RuleContext<'_, '_>, gys: &[Option<ValueId>]) -> RuleResult {
    let Some(gy) = first(gys) else { return Ok(none(cx)) };
    match (cx.in_type(0).dtype, cx.out_type(0).dtype) {
        (Some(from), Some(to)) if from.is_float() && to.is_float() => {
            let back = cx.op_with(
                names::CAST,
                &[gy],
                vec![("to", Attribute::Int(i64::from(from.to_onnx())))],
            )?;
            Ok(vec![Some(back)])
        }
        _ => Ok(none(cx)),
    }
}
