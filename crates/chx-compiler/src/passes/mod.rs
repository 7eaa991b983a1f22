//! Graph-to-graph transformations and the pipeline that sequences them.
//!
//! Every pass mutates a [`Graph`] in place and must leave it passing
//! [`Graph::check_sanity`]; the pipeline verifies this after each pass.

mod dce;
mod fusion;
mod pipeline;
mod schedule;
mod shape_inference;
mod simplify;
mod subgraph;

use thiserror::Error;

use crate::backend_config::BackendConfig;
use crate::config::CompilerConfig;
use crate::graph::{Graph, GraphError};
use crate::ops::{OpRegistry, OpRegistryError, OpSchema};

pub use dce::DeadNodeEliminationPass;
pub use fusion::{FusionPass, SubgraphAcceptor, FUSION_SUBGRAPH_ATTR, FUSION_TYPE_ATTR};
pub use pipeline::{
    build_default_pipeline, run_default_passes, run_default_passes_before_gradient,
    run_default_passes_with, Pipeline, PipelineBuilder, Stage, Step,
};
pub use schedule::SchedulePass;
pub(crate) use shape_inference::constant_ints;
pub use shape_inference::{infer_node, ShapeInferencePass};
pub use simplify::SimplifierPass;
pub use subgraph::SubgraphCanonicalizationPass;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Fixed-point iterations executed.
    pub iterations: usize,
    /// Number of local rewrites applied.
    pub rewrites_applied: usize,
    /// Nodes removed by the pass.
    pub erased_nodes: usize,
}

impl PassResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn rewrites(count: usize) -> Self {
        Self {
            changed: count > 0,
            rewrites_applied: count,
            ..Self::default()
        }
    }

    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error("inference failed at node '{node}' ({op_type}): {message}")]
    Inference {
        node: String,
        op_type: String,
        message: String,
    },
    #[error("pass '{pass}' broke a graph invariant: {source}")]
    Invariant {
        pass: &'static str,
        #[source]
        source: GraphError,
    },
    #[error("unknown backend configuration '{0}'")]
    UnknownBackend(String),
    #[error("no subgraph acceptor registered for backend '{0}'")]
    MissingAcceptor(String),
    #[error(transparent)]
    Registry(#[from] OpRegistryError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Canonical interface implemented by graph passes.
pub trait GraphPass {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<PassResult, PassError>;
}

/// Receives a rendered graph at each enabled dump point.
pub type DumpHook<'a> = Box<dyn FnMut(&str, &Graph) + 'a>;

/// Shared state handed to every pass of one pipeline run.
pub struct PassContext<'a> {
    config: &'a CompilerConfig,
    registry: OpRegistry,
    backend: &'static BackendConfig,
    acceptor: Option<&'a dyn SubgraphAcceptor>,
    dump_hook: Option<DumpHook<'a>>,
}

impl<'a> PassContext<'a> {
    /// Resolves the simplifier backend named by the configuration.
    pub fn new(config: &'a CompilerConfig) -> Result<Self, PassError> {
        let backend = BackendConfig::from_name(&config.simplifier_backend)
            .ok_or_else(|| PassError::UnknownBackend(config.simplifier_backend.clone()))?;
        Ok(Self {
            config,
            registry: OpRegistry::new(),
            backend,
            acceptor: None,
            dump_hook: None,
        })
    }

    /// Extends the recognised operator set; must happen before the pipeline runs.
    pub fn register_custom_ops(
        &mut self,
        schemas: impl IntoIterator<Item = OpSchema>,
    ) -> Result<(), PassError> {
        self.registry.register_custom_ops(schemas)?;
        Ok(())
    }

    pub fn with_acceptor(mut self, acceptor: &'a dyn SubgraphAcceptor) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    pub fn with_dump_hook(mut self, hook: impl FnMut(&str, &Graph) + 'a) -> Self {
        self.dump_hook = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        self.config
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &'static BackendConfig {
        self.backend
    }

    pub fn acceptor(&self) -> Option<&'a dyn SubgraphAcceptor> {
        self.acceptor
    }

    /// Renders `graph` (and nested graphs when `dump_subgraphs` is set) through
    /// the installed hook, or the log when none is installed.
    pub fn dump(&mut self, stage: &str, graph: &Graph) {
        let dump_subgraphs = self.config.dump_subgraphs;
        let mut emit = |label: &str, g: &Graph| match self.dump_hook.as_mut() {
            Some(hook) => hook(label, g),
            None => tracing::info!(stage = label, graph = g.name(), "\n{}", g.debug_string()),
        };
        emit(stage, graph);
        if dump_subgraphs {
            let mut stack: Vec<&Graph> = graph.subgraphs().into_iter().map(|(_, _, g)| g).collect();
            while let Some(nested) = stack.pop() {
                emit(stage, nested);
                stack.extend(nested.subgraphs().into_iter().map(|(_, _, g)| g));
            }
        }
    }
}
