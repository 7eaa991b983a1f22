//! Reverse-mode differentiation producing a separate backward graph.
//!
//! The forward and backward graphs share no ids. The backward graph reads
//! forward values through inputs that carry the same names, and receives one
//! seed input `grad_in@<output>` per forward output. It produces one
//! `grad_out@<target>` output per requested target, in request order.

mod order;
mod rules;

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::config::CompilerConfig;
use crate::graph::{Attribute, Graph, GraphError, NodeId, ValueId, ValueKind, ValueType};
use crate::ops::{names, OpRegistry};
use crate::passes::{
    run_default_passes_before_gradient, DeadNodeEliminationPass, GraphPass, PassContext,
    PassError, ShapeInferencePass, Stage,
};

pub use order::{ComputationOrderPolicy, Decision, OrderPlan};
pub use rules::{backward_rule, BackwardRule};

pub const GRAD_IN_PREFIX: &str = "grad_in@";
pub const GRAD_OUT_PREFIX: &str = "grad_out@";

#[derive(Debug, Error)]
pub enum GradientError {
    #[error("unknown gradient target '{0}'")]
    UnknownTarget(String),
    #[error("unknown computation order policy '{0}'")]
    UnknownOrderPolicy(String),
    #[error("no backward rule for operator '{op_type}' at node '{node}'")]
    MissingRule { op_type: String, node: String },
    #[error("backward rule for node '{node}' failed: {message}")]
    Rule { node: String, message: String },
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<crate::graph::AttributeKindError> for GradientError {
    fn from(err: crate::graph::AttributeKindError) -> Self {
        GradientError::Graph(err.into())
    }
}

impl From<crate::tensor::TensorError> for GradientError {
    fn from(err: crate::tensor::TensorError) -> Self {
        GradientError::Graph(err.into())
    }
}

/// Backward graph for every parameter that influences an output.
pub fn generate_backward(
    forward: Graph,
    config: &CompilerConfig,
) -> Result<(Graph, Graph), GradientError> {
    let mut cx = PassContext::new(config)?;
    synthesize(forward, Targets::Params, "", &mut cx)
}

/// Backward graph for the named parameters or inputs.
pub fn generate_backward_to(
    forward: Graph,
    targets: &[&str],
    config: &CompilerConfig,
) -> Result<(Graph, Graph), GradientError> {
    let mut cx = PassContext::new(config)?;
    let requested = targets.iter().map(|s| s.to_string()).collect();
    synthesize(forward, Targets::Named(requested), "", &mut cx)
}

/// Backward graph for every parameter, placing activations according to the
/// named computation-order policy.
pub fn generate_backward_to_with_order(
    forward: Graph,
    policy: &str,
    config: &CompilerConfig,
) -> Result<(Graph, Graph), GradientError> {
    let mut cx = PassContext::new(config)?;
    synthesize(forward, Targets::Params, policy, &mut cx)
}

/// Which values receive gradients.
#[derive(Debug, Clone)]
pub enum Targets {
    Params,
    Named(Vec<String>),
}

/// Full synthesis with a caller-provided pass context.
pub fn synthesize(
    mut forward: Graph,
    targets: Targets,
    policy: &str,
    cx: &mut PassContext<'_>,
) -> Result<(Graph, Graph), GradientError> {
    let policy = ComputationOrderPolicy::resolve(policy, &cx.config().computation_order)?;
    run_default_passes_before_gradient(&mut forward, cx)?;

    let order = forward.sorted_nodes()?;
    let reaches_output = values_reaching_outputs(&forward, &order)?;
    let target_ids: Vec<ValueId> = match targets {
        Targets::Params => {
            let naming = cx.config().param_naming();
            forward
                .input_values()
                .iter()
                .copied()
                .filter(|&id| forward.is_param(id, naming) && reaches_output.contains(&id))
                .collect()
        }
        Targets::Named(requested) => {
            let mut ids = Vec::with_capacity(requested.len());
            for name in requested {
                let id = forward
                    .value_by_name(&name)
                    .ok_or_else(|| GradientError::UnknownTarget(name.clone()))?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            ids
        }
    };
    let depends = values_depending_on(&forward, &order, &target_ids)?;

    let mut builder = Builder::new(&forward, cx.registry(), policy);
    for &output in forward.output_values() {
        let value = forward.value(output)?;
        let seed = builder
            .backward
            .add_input_value(format!("{GRAD_IN_PREFIX}{}", value.name()), value.ty.clone())?;
        builder.seeds.insert(seed);
        builder.grads.entry(output).or_default().push(seed);
    }

    for &id in order.iter().rev() {
        let node = forward.node(id)?;
        let on_path = node.inputs().iter().any(|v| depends.contains(v))
            && node.outputs().iter().any(|v| reaches_output.contains(v));
        if !on_path {
            continue;
        }
        let mut gys = Vec::with_capacity(node.outputs().len());
        for &out in node.outputs() {
            gys.push(builder.total_grad(out)?);
        }
        if gys.iter().all(Option::is_none) {
            continue;
        }
        let rule = backward_rule(node.op_type()).ok_or_else(|| GradientError::MissingRule {
            op_type: node.op_type().to_string(),
            node: node.name().to_string(),
        })?;
        let needs: Vec<bool> = node.inputs().iter().map(|v| depends.contains(v)).collect();
        let gxs = {
            let mut rcx = rules::RuleContext::new(&mut builder, id, needs)?;
            rule(&mut rcx, &gys)?
        };
        for (&input, gx) in node.inputs().iter().zip(gxs) {
            if let Some(gx) = gx {
                if depends.contains(&input) {
                    builder.grads.entry(input).or_default().push(gx);
                }
            }
        }
    }

    for &target in &target_ids {
        let name = forward.value_name(target).to_string();
        let grad = match builder.total_grad(target)? {
            Some(grad) => grad,
            None => {
                tracing::debug!(target = %name, "target does not influence any output, using zeros");
                let source = builder.forward_value(target)?;
                builder.emit(names::ZEROS_LIKE, &[source], Vec::new())?
            }
        };
        let out = builder
            .backward
            .add_output_value(format!("{GRAD_OUT_PREFIX}{name}"), forward.value(target)?.ty.clone())?;
        builder.backward.add_node(names::IDENTITY, &[grad], &[out])?;
    }

    let Builder {
        mut backward,
        seeds,
        plan,
        ..
    } = builder;
    DeadNodeEliminationPass.run(&mut backward, cx)?;
    let referenced = prune_unused_inputs(&mut backward, &seeds)?;
    if !cx.config().skip_inference {
        ShapeInferencePass.run(&mut backward, cx)?;
    }
    backward.check_sanity()?;

    let mut retained = 0usize;
    for name in &referenced {
        if let Some(id) = forward.value_by_name(name) {
            if !forward.is_graph_input(id) && !forward.is_graph_output(id) {
                forward.mark_output(id)?;
                retained += 1;
            }
        }
    }
    tracing::debug!(
        forward = forward.name(),
        backward = backward.name(),
        policy = plan.policy().name(),
        targets = target_ids.len(),
        retained,
        recomputed = plan
            .decisions()
            .values()
            .filter(|d| **d == Decision::Recompute)
            .count(),
        nodes = backward.num_live_nodes(),
        "generated backward graph"
    );
    if Stage::Gradient.enabled(cx.config()) {
        cx.dump(Stage::Gradient.label(), &backward);
    }
    Ok((forward, backward))
}

/// Drops forward-value inputs nothing reads; returns the names still read.
fn prune_unused_inputs(backward: &mut Graph, seeds: &HashSet<ValueId>) -> Result<Vec<String>, GraphError> {
    let mut referenced = Vec::new();
    for id in backward.input_values().to_vec() {
        if seeds.contains(&id) {
            continue;
        }
        if backward.value(id)?.users().is_empty() && !backward.is_graph_output(id) {
            backward.remove_value(id)?;
        } else {
            referenced.push(backward.value_name(id).to_string());
        }
    }
    Ok(referenced)
}

fn values_reaching_outputs(graph: &Graph, order: &[NodeId]) -> Result<HashSet<ValueId>, GraphError> {
    let mut reach: HashSet<ValueId> = graph.output_values().iter().copied().collect();
    for &id in order.iter().rev() {
        let node = graph.node(id)?;
        if node.outputs().iter().any(|v| reach.contains(v)) {
            reach.extend(node.inputs().iter().copied());
        }
    }
    Ok(reach)
}

fn values_depending_on(
    graph: &Graph,
    order: &[NodeId],
    targets: &[ValueId],
) -> Result<HashSet<ValueId>, GraphError> {
    let mut depends: HashSet<ValueId> = targets.iter().copied().collect();
    for &id in order {
        let node = graph.node(id)?;
        if node.inputs().iter().any(|v| depends.contains(v)) {
            depends.extend(node.outputs().iter().copied());
        }
    }
    Ok(depends)
}

/// Mutable state while the backward graph is assembled.
pub(crate) struct Builder<'f> {
    forward: &'f Graph,
    registry: &'f OpRegistry,
    backward: Graph,
    grads: HashMap<ValueId, Vec<ValueId>>,
    bound: HashMap<ValueId, ValueId>,
    seeds: HashSet<ValueId>,
    plan: OrderPlan,
}

impl<'f> Builder<'f> {
    fn new(forward: &'f Graph, registry: &'f OpRegistry, policy: ComputationOrderPolicy) -> Self {
        Self {
            forward,
            registry,
            backward: Graph::new(format!("{}_backprop", forward.name())),
            grads: HashMap::new(),
            bound: HashMap::new(),
            seeds: HashSet::new(),
            plan: OrderPlan::new(policy),
        }
    }

    /// Accumulated gradient of a forward value, summing fan-out contributions.
    fn total_grad(&mut self, value: ValueId) -> Result<Option<ValueId>, GraphError> {
        let Some(parts) = self.grads.get(&value) else {
            return Ok(None);
        };
        match parts.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            many => {
                let many = many.to_vec();
                let total = self.emit(names::SUM, &many, Vec::new())?;
                self.grads.insert(value, vec![total]);
                Ok(Some(total))
            }
        }
    }

    /// The backward-graph handle for a forward value, retained or recomputed
    /// according to the plan.
    pub(crate) fn forward_value(&mut self, value: ValueId) -> Result<ValueId, GraphError> {
        if let Some(&bound) = self.bound.get(&value) {
            return Ok(bound);
        }
        let forward = self.forward;
        let slot = forward.value(value)?;
        let decision = self.plan.decide(forward, self.registry, value);
        let bound = match (decision, slot.producer()) {
            (Decision::Recompute, Some(producer)) => {
                let node = forward.node(producer)?;
                let mut inputs = Vec::with_capacity(node.inputs().len());
                for &input in node.inputs() {
                    inputs.push(self.forward_value(input)?);
                }
                let out = self.backward.add_temp_value(slot.name(), slot.ty.clone())?;
                let id = self.backward.add_named_node(
                    format!("{}@recompute", node.name()),
                    node.op_type(),
                    &inputs,
                    &[out],
                )?;
                *self.backward.node_mut(id)?.attributes_mut() = node.attributes().clone();
                out
            }
            _ => self.backward.add_input_value(slot.name(), slot.ty.clone())?,
        };
        self.bound.insert(value, bound);
        Ok(bound)
    }

    /// Appends a single-output node with a fresh result value.
    pub(crate) fn emit(
        &mut self,
        op_type: &str,
        inputs: &[ValueId],
        attrs: Vec<(&str, Attribute)>,
    ) -> Result<ValueId, GraphError> {
        let out = self
            .backward
            .add_fresh_value(&format!("{op_type}@grad"), ValueType::unknown());
        let id = self.backward.add_node(op_type, inputs, &[out])?;
        let node = self.backward.node_mut(id)?;
        for (key, value) in attrs {
            node.set_attr(key, value);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("backward", &self.backward.name())
            .field("pending", &self.grads.len())
            .finish()
    }
}

/// Names of the backward graph's forward-value inputs, keyed to their kind in
/// the forward graph. Mostly useful for diagnostics.
pub fn forward_references(forward: &Graph, backward: &Graph) -> BTreeMap<String, ValueKind> {
    backward
        .input_names_with(crate::graph::ParamNaming::InitializerOnly)
        .into_iter()
        .filter(|name| !name.starts_with(GRAD_IN_PREFIX))
        .filter_map(|name| {
            let kind = forward.value_by_name(&name).and_then(|id| forward.value(id).ok())?.kind();
            Some((name, kind))
        })
        .collect()
}
