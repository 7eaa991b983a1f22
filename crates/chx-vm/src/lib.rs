//! Execution contract for ChxVM programs.
//!
//! This crate defines what an engine receives (a [`chx_compiler::Program`],
//! bound [`Var`]s and [`RunOptions`]) and what it hands back. It also owns the
//! custom-operator table engines consult when they meet a `CustomOp`
//! instruction. Engines themselves live elsewhere.

mod custom_op;
mod engine;
mod options;

use thiserror::Error;

pub use custom_op::{CustomOp, CustomOpOutput, CustomOpRegistry};
pub use engine::{bind_inputs, ExecutionEngine, Inputs, Outputs, Var};
pub use options::{RunOptions, TraceLevel};

#[derive(Debug, Error)]
pub enum VmError {
    #[error("custom op '{0}' is already registered")]
    DuplicateCustomOp(String),
    #[error("custom op '{0}' is not registered")]
    UnknownCustomOp(String),
    #[error("custom op '{op}' returned {found} value(s), expected {expected}")]
    MalformedReturn {
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("custom op '{op}' failed: {message}")]
    CustomOpFailed { op: String, message: String },
    #[error("program '{program}' input '{name}' is not bound")]
    MissingInput { program: String, name: String },
    #[error("program '{program}' has no input named '{name}'")]
    UnexpectedInput { program: String, name: String },
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}
