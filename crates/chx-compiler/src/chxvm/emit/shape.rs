use std::collections::BTreeMap;

use super::super::{InstAttr, Opcode};
use super::{attrs, EmitContext, EmitError};
use crate::ops::names;

pub(super) fn emit_node(ctx: &mut EmitContext<'_>) -> Result<bool, EmitError> {
    match ctx.op_type() {
        names::SHAPE => ctx.lower_as(Opcode::Shape),
        names::RESHAPE => {
            ctx.expect_inputs(2, 2)?;
            ctx.lower_as(Opcode::Reshape);
        }
        names::EXPAND => {
            ctx.expect_inputs(2, 2)?;
            ctx.lower_as(Opcode::Expand);
        }
        names::TRANSPOSE => {
            let mut extra = BTreeMap::new();
            if let Some(perm) = ctx.node.ints_attr("perm")? {
                extra.insert("perm".to_string(), InstAttr::Ints(perm));
            }
            emit_with(ctx, Opcode::Transpose, extra);
        }
        names::FLATTEN => {
            let axis = ctx.int_or("axis", 1)?;
            emit_with(ctx, Opcode::Flatten, attrs([("axis", InstAttr::Int(axis))]));
        }
        names::SQUEEZE => {
            let axes = ctx.node.ints_attr("axes")?.unwrap_or_default();
            emit_with(ctx, Opcode::Squeeze, attrs([("axes", InstAttr::Ints(axes))]));
        }
        names::UNSQUEEZE => {
            let axes = ctx.required_ints("axes")?;
            emit_with(
                ctx,
                Opcode::Unsqueeze,
                attrs([("axes", InstAttr::Ints(axes))]),
            );
        }
        names::CONCAT => {
            let axis = ctx.required_int("axis")?;
            emit_with(ctx, Opcode::Concat, attrs([("axis", InstAttr::Int(axis))]));
        }
        names::GATHER => {
            ctx.expect_inputs(2, 2)?;
            let axis = ctx.int_or("axis", 0)?;
            emit_with(ctx, Opcode::Gather, attrs([("axis", InstAttr::Int(axis))]));
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn emit_with(ctx: &mut EmitContext<'_>, op: Opcode, extra: BTreeMap<String, InstAttr>) {
    let inputs = ctx.inputs();
    let outputs = ctx.outputs();
    ctx.push(op, inputs, outputs, extra);
}
