use super::{
    DeadNodeEliminationPass, FusionPass, GraphPass, PassContext, PassError, PassResult,
    SchedulePass, ShapeInferencePass, SimplifierPass, SubgraphCanonicalizationPass,
};
use crate::config::CompilerConfig;
use crate::graph::Graph;

/// Points at which the pipeline can hand the graph to the dump hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Inference,
    Simplification,
    Fusion,
    Scheduling,
    Gradient,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Inference => "after_inference",
            Stage::Simplification => "after_simplification",
            Stage::Fusion => "after_fusion",
            Stage::Scheduling => "after_scheduling",
            Stage::Gradient => "after_gradient",
        }
    }

    pub fn enabled(self, config: &CompilerConfig) -> bool {
        match self {
            Stage::Inference => config.dump_after_inference,
            Stage::Simplification => config.dump_after_simplification,
            Stage::Fusion => config.dump_after_fusion,
            Stage::Scheduling => config.dump_after_scheduling,
            Stage::Gradient => config.dump_after_gradient,
        }
    }
}

pub enum Step {
    Pass(Box<dyn GraphPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
    Dump(Stage),
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: impl GraphPass + 'static) {
        self.steps.push(Step::Pass(Box::new(pass)));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn dump(&mut self, stage: Stage) {
        self.steps.push(Step::Dump(stage));
    }

    pub fn finish(self) -> Pipeline {
        Pipeline { steps: self.steps }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn run(&self, graph: &mut Graph, cx: &mut PassContext<'_>) -> Result<PassResult, PassError> {
        let mut totals = PassResult::default();
        run_steps(&self.steps, graph, cx, &mut totals)?;
        Ok(totals)
    }

    /// Names of the passes in execution order, fixed-point bodies flattened.
    pub fn pass_names(&self) -> Vec<&'static str> {
        fn collect(steps: &[Step], out: &mut Vec<&'static str>) {
            for step in steps {
                match step {
                    Step::Pass(pass) => out.push(pass.name()),
                    Step::FixedPoint { steps, .. } => collect(steps, out),
                    Step::Dump(_) => {}
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.steps, &mut out);
        out
    }
}

fn run_steps(
    steps: &[Step],
    graph: &mut Graph,
    cx: &mut PassContext<'_>,
    totals: &mut PassResult,
) -> Result<bool, PassError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(graph, cx)?;
                graph.check_sanity().map_err(|source| PassError::Invariant {
                    pass: pass.name(),
                    source,
                })?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                log_pass_stats(cx.config(), pass.name(), graph, stats);
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        tracing::debug!(graph = graph.name(), max_iters, "fixed point did not converge");
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, graph, cx, &mut local)?;
                    local.iterations += 1;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
            Step::Dump(stage) => {
                if stage.enabled(cx.config()) {
                    cx.dump(stage.label(), graph);
                }
            }
        }
    }
    Ok(changed_any)
}

fn log_pass_stats(config: &CompilerConfig, name: &str, graph: &Graph, stats: PassResult) {
    if config.compiler_log {
        tracing::info!(
            pass = name,
            graph = graph.name(),
            changed = stats.changed,
            rewrites = stats.rewrites_applied,
            erased = stats.erased_nodes,
            nodes = graph.num_live_nodes(),
            "pass finished"
        );
    } else {
        tracing::debug!(
            pass = name,
            graph = graph.name(),
            changed = stats.changed,
            rewrites = stats.rewrites_applied,
            erased = stats.erased_nodes,
            "pass finished"
        );
    }
}

fn populate_before_gradient(builder: &mut PipelineBuilder, cx: &PassContext<'_>) {
    let config = cx.config();
    // Captures must be explicit before anything counts users.
    builder.pass(SubgraphCanonicalizationPass);
    if !config.skip_inference {
        builder.pass(ShapeInferencePass);
        builder.dump(Stage::Inference);
    }
    let backend = cx.backend();
    builder.fixed_point(config.max_simplify_iters, |p| {
        for name in backend.simplifiers() {
            if let Some(pass) = SimplifierPass::from_name(name) {
                p.pass(pass);
            }
        }
        p.pass(DeadNodeEliminationPass);
    });
    builder.dump(Stage::Simplification);
    if !config.skip_inference {
        builder.pass(ShapeInferencePass);
    }
}

/// Assembles the standard phase sequence for the configuration carried by `cx`.
pub fn build_default_pipeline(cx: &PassContext<'_>, before_gradient_only: bool) -> Pipeline {
    let mut builder = PipelineBuilder::new();
    populate_before_gradient(&mut builder, cx);
    if !before_gradient_only {
        if cx.config().fuse_operations {
            builder.pass(FusionPass);
            builder.dump(Stage::Fusion);
        }
        builder.pass(SchedulePass);
        builder.dump(Stage::Scheduling);
    }
    builder.finish()
}

/// Runs every standard phase with a context built from `config`.
pub fn run_default_passes(graph: &mut Graph, config: &CompilerConfig) -> Result<PassResult, PassError> {
    let mut cx = PassContext::new(config)?;
    run_default_passes_with(graph, &mut cx)
}

/// Runs every standard phase with a caller-prepared context (custom operators,
/// subgraph acceptor, dump hook).
pub fn run_default_passes_with(
    graph: &mut Graph,
    cx: &mut PassContext<'_>,
) -> Result<PassResult, PassError> {
    let pipeline = build_default_pipeline(cx, false);
    tracing::debug!(graph = graph.name(), passes = ?pipeline.pass_names(), "running default passes");
    pipeline.run(graph, cx)
}

/// Runs the normalization phases gradient synthesis depends on.
pub fn run_default_passes_before_gradient(
    graph: &mut Graph,
    cx: &mut PassContext<'_>,
) -> Result<PassResult, PassError> {
    let pipeline = build_default_pipeline(cx, true);
    pipeline.run(graph, cx)
}
