use std::collections::BTreeMap;

use super::super::{InstAttr, Opcode};
use super::{attrs, EmitContext, EmitError};
use crate::ops::names;
use crate::tensor::Dtype;

pub(super) fn emit_node(ctx: &mut EmitContext<'_>) -> Result<bool, EmitError> {
    let opcode = match ctx.op_type() {
        names::IDENTITY => Opcode::Identity,
        names::ADD => Opcode::Add,
        names::SUB => Opcode::Sub,
        names::MUL => Opcode::Mul,
        names::DIV => Opcode::Div,
        names::POW => Opcode::Pow,
        names::NEG => Opcode::Neg,
        names::ABS => Opcode::Abs,
        names::RECIPROCAL => Opcode::Reciprocal,
        names::FLOOR => Opcode::Floor,
        names::CEIL => Opcode::Ceil,
        names::NOT => Opcode::Not,
        names::AND => Opcode::And,
        names::OR => Opcode::Or,
        names::EQUAL => Opcode::Equal,
        names::GREATER => Opcode::Greater,
        names::RELU => Opcode::Relu,
        names::SIGMOID => Opcode::Sigmoid,
        names::TANH => Opcode::Tanh,
        names::EXP => Opcode::Exp,
        names::LOG => Opcode::Log,
        names::SQRT => Opcode::Sqrt,
        names::RELU_GRAD => Opcode::ReluGrad,
        names::SIGMOID_GRAD => Opcode::SigmoidGrad,
        names::TANH_GRAD => Opcode::TanhGrad,
        names::WHERE => Opcode::Where,
        names::ZEROS_LIKE => Opcode::ZerosLike,
        names::LESS => return emit_less(ctx).map(|()| true),
        names::LESS_OR_EQUAL => return emit_negated_greater(ctx, false).map(|()| true),
        names::GREATER_OR_EQUAL => return emit_negated_greater(ctx, true).map(|()| true),
        names::SUM | names::MAX | names::MIN => return emit_variadic(ctx).map(|()| true),
        names::CAST => return emit_cast(ctx).map(|()| true),
        names::CONSTANT => return emit_constant(ctx).map(|()| true),
        _ => return Ok(false),
    };
    ctx.lower_as(opcode);
    Ok(true)
}

/// `Less(a, b)` runs as `Greater(b, a)`.
fn emit_less(ctx: &mut EmitContext<'_>) -> Result<(), EmitError> {
    ctx.expect_inputs(2, 2)?;
    let lhs = ctx.input(0)?;
    let rhs = ctx.input(1)?;
    let out = ctx.output(0)?;
    ctx.push(Opcode::Greater, [rhs, lhs], [out], BTreeMap::new());
    Ok(())
}

/// `LessOrEqual(a, b) = Not(Greater(a, b))`, `GreaterOrEqual(a, b) = Not(Greater(b, a))`.
fn emit_negated_greater(ctx: &mut EmitContext<'_>, swap: bool) -> Result<(), EmitError> {
    ctx.expect_inputs(2, 2)?;
    let mut lhs = ctx.input(0)?;
    let mut rhs = ctx.input(1)?;
    if swap {
        std::mem::swap(&mut lhs, &mut rhs);
    }
    let out = ctx.output(0)?;
    let greater = ctx.temp();
    ctx.push(Opcode::Greater, [lhs, rhs], [greater], BTreeMap::new());
    ctx.push(Opcode::Not, [greater], [out], BTreeMap::new());
    Ok(())
}

/// N-ary `Sum`/`Max`/`Min` become a left fold of binary instructions.
fn emit_variadic(ctx: &mut EmitContext<'_>) -> Result<(), EmitError> {
    let step = match ctx.op_type() {
        names::SUM => Opcode::Add,
        names::MAX => Opcode::Max,
        _ => Opcode::Min,
    };
    let inputs = ctx.inputs();
    let out = ctx.output(0)?;
    let Some((&first, rest)) = inputs.split_first() else {
        return Err(ctx.operand_error("expects at least one input"));
    };
    if rest.is_empty() {
        ctx.push(Opcode::Identity, [first], [out], BTreeMap::new());
        return Ok(());
    }
    let mut acc = first;
    for (index, &next) in rest.iter().enumerate() {
        let dst = if index + 1 == rest.len() {
            out
        } else {
            ctx.temp()
        };
        ctx.push(step, [acc, next], [dst], BTreeMap::new());
        acc = dst;
    }
    Ok(())
}

fn emit_cast(ctx: &mut EmitContext<'_>) -> Result<(), EmitError> {
    let tag = ctx.required_int("to")?;
    let dtype = i32::try_from(tag)
        .ok()
        .and_then(|tag| Dtype::from_onnx(tag).ok())
        .ok_or_else(|| ctx.attr_error("to", format!("names unsupported element type {tag}")))?;
    let input = ctx.input(0)?;
    let out = ctx.output(0)?;
    ctx.push(
        Opcode::Cast,
        [input],
        [out],
        attrs([("to", InstAttr::Dtype(dtype))]),
    );
    Ok(())
}

fn emit_constant(ctx: &mut EmitContext<'_>) -> Result<(), EmitError> {
    let tensor = ctx
        .node
        .tensor_attr("value")?
        .ok_or_else(|| ctx.missing_attr("value"))?;
    let record = tensor.to_raw_record();
    let out = ctx.output(0)?;
    ctx.push(
        Opcode::Constant,
        [],
        [out],
        attrs([("value", InstAttr::Tensor(record))]),
    );
    Ok(())
}
