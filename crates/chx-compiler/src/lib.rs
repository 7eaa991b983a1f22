//! Graph compiler targeting the ChxVM bytecode.
//!
//! The usual flow is [`graph::document::GraphDocument`] → [`graph::Graph`] →
//! [`passes::run_default_passes`] → optionally [`gradient::generate_backward`]
//! → [`chxvm::emit`]. The cost estimators in [`cost`] can run on any graph
//! whose types have been inferred.

pub mod backend_config;
pub mod chxvm;
pub mod config;
pub mod cost;
mod error;
pub mod gradient;
pub mod graph;
pub mod ops;
pub mod passes;
pub mod tensor;

pub use backend_config::{list_backend_configs, BackendConfig};
pub use chxvm::{emit, Device, EmitOptions, Program};
pub use config::CompilerConfig;
pub use error::{CompileError, Result};
pub use graph::{Graph, ParamNaming, ValueType};
pub use tensor::{Dtype, Tensor};

/// Runs the default pipeline over `graph` in place and lowers the result.
pub fn compile(graph: &mut Graph, config: &CompilerConfig) -> Result<Program> {
    passes::run_default_passes(graph, config)?;
    let options = EmitOptions {
        dump_value_names: config.compiler_log,
        device: if config.use_cuda { Device::Cuda } else { Device::Cpu },
        ..EmitOptions::default()
    };
    Ok(chxvm::emit(graph, &options)?)
}
