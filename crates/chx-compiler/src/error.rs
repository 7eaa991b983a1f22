use thiserror::Error;

use crate::chxvm::{EmitError, ProgramIoError, ProgramSerdeError};
use crate::gradient::GradientError;
use crate::graph::document::DocumentError;
use crate::graph::GraphError;
use crate::ops::OpRegistryError;
use crate::passes::PassError;
use crate::tensor::TensorError;

/// Any failure surfaced by the compiler core.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Registry(#[from] OpRegistryError),
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error(transparent)]
    Gradient(#[from] GradientError),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error(transparent)]
    ProgramSerde(#[from] ProgramSerdeError),
    #[error(transparent)]
    ProgramIo(#[from] ProgramIoError),
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
