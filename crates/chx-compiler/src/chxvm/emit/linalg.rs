use std::collections::BTreeMap;

use super::super::{InstAttr, Opcode};
use super::{attrs, EmitContext, EmitError};
use crate::ops::names;

pub(super) fn emit_node(ctx: &mut EmitContext<'_>) -> Result<bool, EmitError> {
    match ctx.op_type() {
        names::MATMUL => {
            ctx.expect_inputs(2, 2)?;
            ctx.lower_as(Opcode::MatMul);
        }
        names::GEMM => emit_gemm(ctx)?,
        names::CONV => emit_conv(ctx)?,
        _ => return Ok(false),
    }
    Ok(true)
}

fn emit_gemm(ctx: &mut EmitContext<'_>) -> Result<(), EmitError> {
    ctx.expect_inputs(2, 3)?;
    let attrs = attrs([
        ("alpha", InstAttr::Float(ctx.float_or("alpha", 1.0)?)),
        ("beta", InstAttr::Float(ctx.float_or("beta", 1.0)?)),
        ("transA", InstAttr::Int(ctx.int_or("transA", 0)?)),
        ("transB", InstAttr::Int(ctx.int_or("transB", 0)?)),
    ]);
    let inputs = ctx.inputs();
    let out = ctx.output(0)?;
    ctx.push(Opcode::Gemm, inputs, [out], attrs);
    Ok(())
}

fn emit_conv(ctx: &mut EmitContext<'_>) -> Result<(), EmitError> {
    ctx.expect_inputs(2, 3)?;
    let mut attrs = BTreeMap::new();
    for key in ["strides", "pads", "dilations", "kernel_shape"] {
        if let Some(values) = ctx.node.ints_attr(key)? {
            attrs.insert(key.to_string(), InstAttr::Ints(values));
        }
    }
    let group = ctx.int_or("group", 1)?;
    if group < 1 {
        return Err(ctx.attr_error("group", format!("must be positive, got {group}")));
    }
    attrs.insert("group".to_string(), InstAttr::Int(group));
    let inputs = ctx.inputs();
    let out = ctx.output(0)?;
    ctx.push(Opcode::Conv, inputs, [out], attrs);
    Ok(())
}
