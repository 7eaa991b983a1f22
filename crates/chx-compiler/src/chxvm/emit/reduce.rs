use std::collections::BTreeMap;

use super::super::{InstAttr, Opcode};
use super::{EmitContext, EmitError};
use crate::ops::names;

pub(super) fn emit_node(ctx: &mut EmitContext<'_>) -> Result<bool, EmitError> {
    match ctx.op_type() {
        names::REDUCE_SUM => emit_reduce(ctx, Opcode::ReduceSum)?,
        names::REDUCE_MEAN => emit_reduce(ctx, Opcode::ReduceMean)?,
        names::REDUCE_MAX => emit_reduce(ctx, Opcode::ReduceMax)?,
        names::REDUCE_SUM_TO => emit_reduce_sum_to(ctx)?,
        names::SOFTMAX => emit_softmax(ctx, Opcode::Softmax)?,
        names::LOG_SOFTMAX => emit_softmax(ctx, Opcode::LogSoftmax)?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// Missing `axes` reduces over every dimension.
fn emit_reduce(ctx: &mut EmitContext<'_>, op: Opcode) -> Result<(), EmitError> {
    ctx.expect_inputs(1, 1)?;
    let mut attrs = BTreeMap::new();
    if let Some(axes) = ctx.node.ints_attr("axes")? {
        attrs.insert("axes".to_string(), InstAttr::Ints(axes));
    }
    let keepdims = ctx.int_or("keepdims", 1)?;
    attrs.insert("keepdims".to_string(), InstAttr::Int(keepdims));
    let input = ctx.input(0)?;
    let out = ctx.output(0)?;
    ctx.push(op, [input], [out], attrs);
    Ok(())
}

/// Target shape comes from the `shape` attribute or, failing that, a second
/// operand holding the runtime shape.
fn emit_reduce_sum_to(ctx: &mut EmitContext<'_>) -> Result<(), EmitError> {
    let mut attrs = BTreeMap::new();
    match ctx.node.ints_attr("shape")? {
        Some(shape) => {
            ctx.expect_inputs(1, 1)?;
            attrs.insert("shape".to_string(), InstAttr::Ints(shape));
        }
        None => {
            if ctx.node.inputs().len() != 2 {
                return Err(ctx.missing_attr("shape"));
            }
        }
    }
    let inputs = ctx.inputs();
    let out = ctx.output(0)?;
    ctx.push(Opcode::ReduceSumTo, inputs, [out], attrs);
    Ok(())
}

fn emit_softmax(ctx: &mut EmitContext<'_>, op: Opcode) -> Result<(), EmitError> {
    ctx.expect_inputs(1, 1)?;
    let axis = ctx.int_or("axis", -1)?;
    let input = ctx.input(0)?;
    let out = ctx.output(0)?;
    ctx.push(op, [input], [out], super::attrs([("axis", InstAttr::Int(axis))]));
    Ok(())
}
