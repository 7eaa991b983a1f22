//! Computation-order policies: per forward value, keep it alive for the
//! backward pass or recompute it there.

use std::collections::BTreeMap;

use super::GradientError;
use crate::graph::{Attribute, Graph, ValueId};
use crate::ops::{OpKind, OpRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Read the forward value; non-output activations become extra forward outputs.
    Retain,
    /// Re-run the producing node inside the backward graph.
    Recompute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationOrderPolicy {
    RetainAll,
    Recompute,
}

impl ComputationOrderPolicy {
    pub const NAMES: &'static [&'static str] = &["none", "recompute"];

    pub fn from_name(name: &str) -> Result<Self, GradientError> {
        match name {
            "none" => Ok(ComputationOrderPolicy::RetainAll),
            "recompute" => Ok(ComputationOrderPolicy::Recompute),
            other => Err(GradientError::UnknownOrderPolicy(other.to_string())),
        }
    }

    /// An empty request falls back to the configured policy, then to `none`.
    pub fn resolve(requested: &str, configured: &str) -> Result<Self, GradientError> {
        let name = [requested, configured]
            .into_iter()
            .find(|n| !n.is_empty())
            .unwrap_or("none");
        Self::from_name(name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ComputationOrderPolicy::RetainAll => "none",
            ComputationOrderPolicy::Recompute => "recompute",
        }
    }
}

/// Decisions taken for one backward graph. Each forward value is decided once.
#[derive(Debug, Clone)]
pub struct OrderPlan {
    policy: ComputationOrderPolicy,
    decisions: BTreeMap<String, Decision>,
}

impl OrderPlan {
    pub fn new(policy: ComputationOrderPolicy) -> Self {
        Self {
            policy,
            decisions: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> ComputationOrderPolicy {
        self.policy
    }

    pub fn decisions(&self) -> &BTreeMap<String, Decision> {
        &self.decisions
    }

    pub(crate) fn decide(&mut self, forward: &Graph, registry: &OpRegistry, value: ValueId) -> Decision {
        let name = forward.value_name(value).to_string();
        if let Some(&decision) = self.decisions.get(&name) {
            return decision;
        }
        let decision = match self.policy {
            ComputationOrderPolicy::RetainAll => Decision::Retain,
            ComputationOrderPolicy::Recompute => {
                if is_cheap_to_recompute(forward, registry, value) {
                    Decision::Recompute
                } else {
                    Decision::Retain
                }
            }
        };
        tracing::trace!(value = %name, ?decision, policy = self.policy.name(), "order decision");
        self.decisions.insert(name, decision);
        decision
    }
}

fn is_cheap_to_recompute(forward: &Graph, registry: &OpRegistry, value: ValueId) -> bool {
    if forward.is_graph_input(value) || forward.is_graph_output(value) {
        return false;
    }
    let Some(producer) = forward.value(value).ok().and_then(|v| v.producer()) else {
        return false;
    };
    let Ok(node) = forward.node(producer) else {
        return false;
    };
    node.outputs().len() == 1
        && !node.attributes().values().any(|a| matches!(a, Attribute::Graph(_)))
        && matches!(
            registry.kind(node.op_type()),
            Some(OpKind::Elementwise | OpKind::Comparison | OpKind::DataMovement | OpKind::Source)
        )
}
