//! Graph to ChxVM lowering.
//!
//! Nodes are visited in schedule order and handed to each operator family in
//! turn; the first family that recognises the op type lowers it. Registers are
//! handed out on first sight, graph inputs first.

mod control_flow;
mod elementwise;
mod linalg;
mod reduce;
mod shape;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use smallvec::SmallVec;
use thiserror::Error;

use super::{Device, InstAttr, Instruction, Opcode, Program, Register};
use crate::graph::{AttributeKindError, Graph, GraphError, Node, ValueId};
use crate::ops::OpRegistry;

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Record the graph value name behind every register.
    pub dump_value_names: bool,
    /// Operator names lowered to `CustomOp` instructions.
    pub custom_ops: BTreeSet<String>,
    /// Stamped on the program and every nested body.
    pub device: Device,
}

impl EmitOptions {
    pub fn with_value_names(mut self) -> Self {
        self.dump_value_names = true;
        self
    }

    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_custom_ops(mut self, registry: &OpRegistry) -> Self {
        self.custom_ops
            .extend(registry.custom_ops().map(|schema| schema.name.clone()));
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmitError {
    #[error("no ChxVM lowering for op '{op_type}' (node '{node}')")]
    NoLoweringRule { op_type: String, node: String },
    #[error("node '{node}': attribute '{key}' {message}")]
    Attribute {
        node: String,
        key: String,
        message: String,
    },
    #[error("node '{node}': {message}")]
    Operand { node: String, message: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<AttributeKindError> for EmitError {
    fn from(err: AttributeKindError) -> Self {
        EmitError::Attribute {
            node: err.node,
            key: err.key,
            message: format!("must be {}, found {}", err.expected, err.found),
        }
    }
}

/// Lowers `graph` into a standalone program.
pub fn emit(graph: &Graph, options: &EmitOptions) -> Result<Program, EmitError> {
    let program = emit_graph(graph, options)?;
    tracing::debug!(
        graph = graph.name(),
        instructions = program.instructions.len(),
        registers = program.num_registers,
        "emitted ChxVM program"
    );
    Ok(program)
}

pub(super) fn emit_graph(graph: &Graph, options: &EmitOptions) -> Result<Program, EmitError> {
    let mut registers = RegisterFile::default();
    let mut program = Program::new(graph.name());
    program.device = options.device;
    for &input in graph.input_values().iter().chain(graph.free_values()) {
        let register = registers.get_or_assign(input);
        program
            .inputs
            .push((graph.value_name(input).to_string(), register));
    }

    let mut instructions = Vec::new();
    for id in graph.scheduled_order()? {
        let node = graph.node(id)?;
        let mut ctx = EmitContext {
            node,
            options,
            registers: &mut registers,
            instructions: &mut instructions,
        };
        if elementwise::emit_node(&mut ctx)?
            || shape::emit_node(&mut ctx)?
            || reduce::emit_node(&mut ctx)?
            || linalg::emit_node(&mut ctx)?
            || control_flow::emit_node(&mut ctx)?
            || emit_custom_op(&mut ctx)?
        {
            continue;
        }
        return Err(EmitError::NoLoweringRule {
            op_type: node.op_type().to_string(),
            node: node.name().to_string(),
        });
    }

    for &output in graph.output_values() {
        let register = registers.get_or_assign(output);
        program
            .outputs
            .push((graph.value_name(output).to_string(), register));
    }
    program.instructions = instructions;
    program.num_registers = registers.next;
    if options.dump_value_names {
        program.value_names = Some(registers.names(graph));
    }
    Ok(program)
}

fn emit_custom_op(ctx: &mut EmitContext<'_>) -> Result<bool, EmitError> {
    if !ctx.options.custom_ops.contains(ctx.node.op_type()) {
        return Ok(false);
    }
    let mut attrs = BTreeMap::new();
    attrs.insert(
        "name".to_string(),
        InstAttr::String(ctx.node.op_type().to_string()),
    );
    let inputs = ctx.inputs();
    let outputs = ctx.outputs();
    ctx.push(Opcode::CustomOp, inputs, outputs, attrs);
    Ok(true)
}

#[derive(Debug, Default)]
struct RegisterFile {
    assigned: HashMap<ValueId, Register>,
    next: u32,
}

impl RegisterFile {
    fn get_or_assign(&mut self, value: ValueId) -> Register {
        if let Some(&register) = self.assigned.get(&value) {
            return register;
        }
        let register = self.fresh();
        self.assigned.insert(value, register);
        register
    }

    fn fresh(&mut self) -> Register {
        let register = Register(self.next);
        self.next += 1;
        register
    }

    fn names(&self, graph: &Graph) -> BTreeMap<Register, String> {
        self.assigned
            .iter()
            .map(|(&value, &register)| (register, graph.value_name(value).to_string()))
            .collect()
    }
}

/// Per-node lowering state shared by the operator families.
pub(super) struct EmitContext<'a> {
    pub(super) node: &'a Node,
    pub(super) options: &'a EmitOptions,
    registers: &'a mut RegisterFile,
    instructions: &'a mut Vec<Instruction>,
}

impl EmitContext<'_> {
    pub(super) fn op_type(&self) -> &str {
        self.node.op_type()
    }

    pub(super) fn inputs(&mut self) -> SmallVec<[Register; 4]> {
        let node = self.node;
        node.inputs()
            .iter()
            .map(|&value| self.registers.get_or_assign(value))
            .collect()
    }

    pub(super) fn outputs(&mut self) -> SmallVec<[Register; 2]> {
        let node = self.node;
        node.outputs()
            .iter()
            .map(|&value| self.registers.get_or_assign(value))
            .collect()
    }

    pub(super) fn input(&mut self, index: usize) -> Result<Register, EmitError> {
        let value = *self
            .node
            .inputs()
            .get(index)
            .ok_or_else(|| self.operand_error(format!("missing input #{index}")))?;
        Ok(self.registers.get_or_assign(value))
    }

    pub(super) fn output(&mut self, index: usize) -> Result<Register, EmitError> {
        let value = *self
            .node
            .outputs()
            .get(index)
            .ok_or_else(|| self.operand_error(format!("missing output #{index}")))?;
        Ok(self.registers.get_or_assign(value))
    }

    /// Scratch register not bound to any graph value.
    pub(super) fn temp(&mut self) -> Register {
        self.registers.fresh()
    }

    pub(super) fn expect_inputs(&self, min: usize, max: usize) -> Result<(), EmitError> {
        let count = self.node.inputs().len();
        if count < min || count > max {
            return Err(self.operand_error(format!(
                "expects {min}..={max} inputs, got {count}"
            )));
        }
        Ok(())
    }

    pub(super) fn push(
        &mut self,
        op: Opcode,
        inputs: impl IntoIterator<Item = Register>,
        outputs: impl IntoIterator<Item = Register>,
        attrs: BTreeMap<String, InstAttr>,
    ) {
        self.instructions.push(Instruction {
            op,
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
            attrs,
            debug_info: self.node.name().to_string(),
        });
    }

    /// One-to-one lowering carrying no attributes.
    pub(super) fn lower_as(&mut self, op: Opcode) {
        let inputs = self.inputs();
        let outputs = self.outputs();
        self.push(op, inputs, outputs, BTreeMap::new());
    }

    pub(super) fn required_int(&self, key: &str) -> Result<i64, EmitError> {
        self.node
            .int_attr(key)?
            .ok_or_else(|| self.missing_attr(key))
    }

    pub(super) fn required_ints(&self, key: &str) -> Result<Vec<i64>, EmitError> {
        self.node
            .ints_attr(key)?
            .ok_or_else(|| self.missing_attr(key))
    }

    pub(super) fn int_or(&self, key: &str, default: i64) -> Result<i64, EmitError> {
        Ok(self.node.int_attr(key)?.unwrap_or(default))
    }

    pub(super) fn float_or(&self, key: &str, default: f32) -> Result<f32, EmitError> {
        Ok(self.node.float_attr(key)?.unwrap_or(default))
    }

    pub(super) fn missing_attr(&self, key: &str) -> EmitError {
        self.attr_error(key, "is required")
    }

    pub(super) fn attr_error(&self, key: &str, message: impl Into<String>) -> EmitError {
        EmitError::Attribute {
            node: self.node.name().to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub(super) fn operand_error(&self, message: impl Into<String>) -> EmitError {
        EmitError::Operand {
            node: self.node.name().to_string(),
            message: message.into(),
        }
    }
}

pub(super) fn attrs<const N: usize>(entries: [(&str, InstAttr); N]) -> BTreeMap<String, InstAttr> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
