use std::collections::{BTreeMap, BTreeSet};

use chx_compiler::chxvm::Register;
use chx_compiler::{Program, Tensor};

use crate::{RunOptions, VmError};

/// Runtime value bound to a program register.
#[derive(Debug, Clone, PartialEq)]
pub enum Var {
    Array(Tensor),
    Sequence(Vec<Var>),
}

impl Var {
    pub fn as_array(&self) -> Option<&Tensor> {
        match self {
            Var::Array(tensor) => Some(tensor),
            Var::Sequence(_) => None,
        }
    }

    pub fn into_array(self) -> Option<Tensor> {
        match self {
            Var::Array(tensor) => Some(tensor),
            Var::Sequence(_) => None,
        }
    }
}

impl From<Tensor> for Var {
    fn from(tensor: Tensor) -> Self {
        Var::Array(tensor)
    }
}

pub type Inputs = BTreeMap<String, Var>;
pub type Outputs = BTreeMap<String, Var>;

/// Something that can run a ChxVM program.
pub trait ExecutionEngine {
    fn name(&self) -> &str;

    fn run(&self, program: &Program, inputs: Inputs, options: &RunOptions)
        -> Result<Outputs, VmError>;
}

/// Pairs every declared program input with its bound value, in declaration
/// order.
pub fn bind_inputs(program: &Program, mut inputs: Inputs) -> Result<Vec<(Register, Var)>, VmError> {
    let declared: BTreeSet<&str> = program.input_names().collect();
    if let Some(name) = inputs.keys().find(|name| !declared.contains(name.as_str())) {
        return Err(VmError::UnexpectedInput {
            program: program.name.clone(),
            name: name.clone(),
        });
    }
    let mut bound = Vec::with_capacity(program.inputs.len());
    for (name, register) in &program.inputs {
        let value = inputs.remove(name).ok_or_else(|| VmError::MissingInput {
            program: program.name.clone(),
            name: name.clone(),
        })?;
        bound.push((*register, value));
    }
    tracing::trace!(program = %program.name, bound = bound.len(), "bound program inputs");
    Ok(bound)
}
