use std::collections::BTreeMap;

use super::super::{InstAttr, Opcode};
use super::{emit_graph, EmitContext, EmitError};
use crate::ops::names;
use crate::passes::{FUSION_SUBGRAPH_ATTR, FUSION_TYPE_ATTR};

const IF_BODIES: &[&str] = &["then_branch", "else_branch"];
const LOOP_BODIES: &[&str] = &["body"];
const FUSION_BODIES: &[&str] = &[FUSION_SUBGRAPH_ATTR];

pub(super) fn emit_node(ctx: &mut EmitContext<'_>) -> Result<bool, EmitError> {
    let (op, bodies): (Opcode, &[&str]) = match ctx.op_type() {
        names::IF => (Opcode::If, IF_BODIES),
        names::LOOP => (Opcode::Loop, LOOP_BODIES),
        names::FUSION_GROUP => (Opcode::FusionGroup, FUSION_BODIES),
        _ => return Ok(false),
    };

    let mut attrs = BTreeMap::new();
    for &key in bodies {
        let body = ctx
            .node
            .graph_attr(key)?
            .ok_or_else(|| ctx.missing_attr(key))?;
        let program = emit_graph(body, ctx.options)?;
        attrs.insert(key.to_string(), InstAttr::Program(Box::new(program)));
    }
    if op == Opcode::FusionGroup {
        if let Some(kind) = ctx.node.string_attr(FUSION_TYPE_ATTR)? {
            attrs.insert(FUSION_TYPE_ATTR.to_string(), InstAttr::String(kind));
        }
    }
    tracing::trace!(
        node = ctx.node.name(),
        op = %op,
        bodies = bodies.len(),
        "lowered nested program"
    );

    let inputs = ctx.inputs();
    let outputs = ctx.outputs();
    ctx.push(op, inputs, outputs, attrs);
    Ok(true)
}
