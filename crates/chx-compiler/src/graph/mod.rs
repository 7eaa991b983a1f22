//! Mutable graph IR: an arena of operation nodes and typed value edges.
//!
//! The [`Graph`] owns every [`Value`] and [`Node`]; both are addressed by stable
//! indices ([`ValueId`], [`NodeId`]) that are never reused. Removing an entry
//! tombstones it. Nodes never own values; they only reference them by id.
//! Nested graphs (loop and branch bodies) are owned by the attribute slot of
//! the node that uses them, so the overall structure is a DAG of graphs.
//!
//! Every mutation keeps the graph acyclic and refuses to leave a consumed
//! value without a producer.

mod attribute;
pub mod document;
mod dump;
mod topology;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{Dtype, Tensor};

pub use attribute::{Attribute, AttributeKindError};
pub use topology::TopologicalOrder;

/// Stable index of a value inside its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Stable index of a node inside its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Errors raised by graph mutations and structural checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("value name '{0}' is already declared")]
    DuplicateValue(String),
    #[error("value name must not be empty")]
    EmptyName,
    #[error("unknown value id {0:?}")]
    UnknownValue(ValueId),
    #[error("unknown node id {0:?}")]
    UnknownNode(NodeId),
    #[error("value '{name}' is not declared in graph '{graph}'")]
    UndefinedValue { graph: String, name: String },
    #[error("value '{value}' is already produced by node '{producer}'")]
    MultipleProducers { value: String, producer: String },
    #[error("value '{value}' is a graph input and cannot be produced by node '{node}'")]
    ProducesInput { value: String, node: String },
    #[error("inserting node '{node}' would create a cycle")]
    Cycle { node: String },
    #[error("graph '{graph}' contains a cycle")]
    CyclicGraph { graph: String },
    #[error("value '{value}' requires a producer")]
    ProducerRequired { value: String },
    #[error("inconsistent use-def chain on value '{value}' at node '{node}'")]
    BrokenUseDef { value: String, node: String },
    #[error(transparent)]
    Attribute(#[from] AttributeKindError),
    #[error(transparent)]
    Tensor(#[from] crate::tensor::TensorError),
}

/// Role of a value within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Input,
    Output,
    Temp,
    /// A name a nested graph reads from its enclosing scope. Subgraph
    /// canonicalization turns these into explicit inputs.
    Captured,
}

/// One axis extent of a value shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Symbolic(String),
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(size) => write!(f, "{size}"),
            Dimension::Symbolic(name) => write!(f, "?{name}"),
        }
    }
}

/// Element type and shape of a value; either part may still be unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    pub dtype: Option<Dtype>,
    pub shape: Option<Vec<Dimension>>,
}

impl ValueType {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn new(dtype: Dtype, dims: &[usize]) -> Self {
        Self {
            dtype: Some(dtype),
            shape: Some(dims.iter().map(|&d| Dimension::Static(d)).collect()),
        }
    }

    pub fn of_tensor(tensor: &Tensor) -> Self {
        Self::new(tensor.dtype(), tensor.dims())
    }

    pub fn with_dtype(dtype: Dtype) -> Self {
        Self {
            dtype: Some(dtype),
            shape: None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }

    /// Returns the dimensions when every axis is static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.shape
            .as_ref()?
            .iter()
            .map(|dim| match dim {
                Dimension::Static(size) => Some(*size),
                Dimension::Symbolic(_) => None,
            })
            .collect()
    }

    pub fn num_elements(&self) -> Option<u64> {
        self.static_dims()?
            .iter()
            .try_fold(1u64, |acc, &dim| acc.checked_mul(dim as u64))
    }

    /// Storage size in bytes when both dtype and a static shape are known.
    pub fn nbytes(&self) -> Option<u64> {
        let elems = self.num_elements()?;
        elems.checked_mul(self.dtype?.size_of() as u64)
    }

    pub fn is_fully_known(&self) -> bool {
        self.dtype.is_some() && self.static_dims().is_some()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dtype {
            Some(dtype) => write!(f, "{dtype}")?,
            None => f.write_str("?")?,
        }
        match &self.shape {
            Some(dims) => {
                let dims = dims.iter().map(|d| d.to_string()).collect::<Vec<_>>();
                write!(f, "[{}]", dims.join(", "))
            }
            None => f.write_str("[?]"),
        }
    }
}

/// Rule used to decide which graph inputs count as parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParamNaming {
    /// Only inputs carrying an initializer are parameters.
    InitializerOnly,
    /// Inputs whose name starts with `/` are parameters too. Deprecated; kept
    /// for graphs produced by the historical tracer.
    #[default]
    LegacySlashPrefix,
}

/// Typed, named edge of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    name: String,
    kind: ValueKind,
    pub ty: ValueType,
    initializer: Option<Tensor>,
    producer: Option<NodeId>,
    users: Vec<NodeId>,
    pub doc_string: String,
    detached: bool,
}

impl Value {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn initializer(&self) -> Option<&Tensor> {
        self.initializer.as_ref()
    }

    pub fn producer(&self) -> Option<NodeId> {
        self.producer
    }

    /// Consumers of the value, one entry per consuming input slot.
    pub fn users(&self) -> &[NodeId] {
        &self.users
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

/// Operation instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    op_type: String,
    name: String,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
    attributes: BTreeMap<String, Attribute>,
    order: Option<usize>,
    detached: bool,
}

impl Node {
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, Attribute> {
        &mut self.attributes
    }

    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: Attribute) {
        self.attributes.insert(key.into(), value);
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_op_type(&mut self, op_type: impl Into<String>) {
        self.op_type = op_type.into();
    }

    /// Program slot assigned by the scheduler.
    pub fn order(&self) -> Option<usize> {
        self.order
    }

    pub fn set_order(&mut self, order: Option<usize>) {
        self.order = order;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn int_attr(&self, key: &str) -> Result<Option<i64>, AttributeKindError> {
        self.typed_attr(key, "int", Attribute::as_int)
    }

    pub fn float_attr(&self, key: &str) -> Result<Option<f32>, AttributeKindError> {
        self.typed_attr(key, "float", Attribute::as_float)
    }

    pub fn ints_attr(&self, key: &str) -> Result<Option<Vec<i64>>, AttributeKindError> {
        self.typed_attr(key, "ints", |attr| attr.as_ints().map(<[i64]>::to_vec))
    }

    pub fn string_attr(&self, key: &str) -> Result<Option<String>, AttributeKindError> {
        self.typed_attr(key, "string", |attr| attr.as_str().map(str::to_string))
    }

    pub fn tensor_attr(&self, key: &str) -> Result<Option<&Tensor>, AttributeKindError> {
        self.typed_attr(key, "tensor", Attribute::as_tensor)
    }

    pub fn graph_attr(&self, key: &str) -> Result<Option<&Graph>, AttributeKindError> {
        self.typed_attr(key, "graph", Attribute::as_graph)
    }

    fn typed_attr<'a, T>(
        &'a self,
        key: &str,
        expected: &'static str,
        get: impl FnOnce(&'a Attribute) -> Option<T>,
    ) -> Result<Option<T>, AttributeKindError> {
        match self.attributes.get(key) {
            None => Ok(None),
            Some(attr) => match get(attr) {
                Some(value) => Ok(Some(value)),
                None => Err(AttributeKindError {
                    node: self.name.clone(),
                    key: key.to_string(),
                    expected,
                    found: attr.kind(),
                }),
            },
        }
    }
}

/// Owned, mutable collection of nodes and values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Graph {
    name: String,
    pub doc_string: String,
    values: Vec<Value>,
    nodes: Vec<Node>,
    input_values: Vec<ValueId>,
    output_values: Vec<ValueId>,
    free_values: Vec<ValueId>,
    names: HashMap<String, ValueId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn add_input_value(
        &mut self,
        name: impl Into<String>,
        ty: ValueType,
    ) -> Result<ValueId, GraphError> {
        let id = self.push_value(name.into(), ValueKind::Input, ty)?;
        self.input_values.push(id);
        Ok(id)
    }

    pub fn add_output_value(
        &mut self,
        name: impl Into<String>,
        ty: ValueType,
    ) -> Result<ValueId, GraphError> {
        let id = self.push_value(name.into(), ValueKind::Output, ty)?;
        self.output_values.push(id);
        Ok(id)
    }

    pub fn add_temp_value(
        &mut self,
        name: impl Into<String>,
        ty: ValueType,
    ) -> Result<ValueId, GraphError> {
        self.push_value(name.into(), ValueKind::Temp, ty)
    }

    /// Declares a temporary whose name is derived from `base` and guaranteed unique.
    pub fn add_fresh_value(&mut self, base: &str, ty: ValueType) -> ValueId {
        let name = self.fresh_name(base);
        match self.push_value(name, ValueKind::Temp, ty) {
            Ok(id) => id,
            Err(_) => unreachable!("fresh names are unique by construction"),
        }
    }

    pub(crate) fn add_captured_value(&mut self, name: String) -> Result<ValueId, GraphError> {
        let id = self.push_value(name, ValueKind::Captured, ValueType::unknown())?;
        self.free_values.push(id);
        Ok(id)
    }

    fn push_value(
        &mut self,
        name: String,
        kind: ValueKind,
        ty: ValueType,
    ) -> Result<ValueId, GraphError> {
        if name.is_empty() {
            return Err(GraphError::EmptyName);
        }
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateValue(name));
        }
        let id = ValueId(self.values.len() as u32);
        self.names.insert(name.clone(), id);
        self.values.push(Value {
            name,
            kind,
            ty,
            initializer: None,
            producer: None,
            users: Vec::new(),
            doc_string: String::new(),
            detached: false,
        });
        Ok(id)
    }

    pub fn fresh_name(&self, base: &str) -> String {
        if !base.is_empty() && !self.names.contains_key(base) {
            return base.to_string();
        }
        let mut counter = self.values.len();
        loop {
            let candidate = format!("{base}_{counter}");
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    pub fn set_initializer(&mut self, value: ValueId, tensor: Tensor) -> Result<(), GraphError> {
        let ty = ValueType::of_tensor(&tensor);
        let slot = self.value_mut(value)?;
        if slot.ty.dtype.is_none() {
            slot.ty.dtype = ty.dtype;
        }
        if slot.ty.shape.is_none() {
            slot.ty.shape = ty.shape;
        }
        slot.initializer = Some(tensor);
        Ok(())
    }

    /// Appends an existing value to the graph outputs.
    pub fn mark_output(&mut self, value: ValueId) -> Result<(), GraphError> {
        let slot = self.value_mut(value)?;
        if slot.kind == ValueKind::Temp {
            slot.kind = ValueKind::Output;
        }
        if !self.output_values.contains(&value) {
            self.output_values.push(value);
        }
        Ok(())
    }

    /// Inserts a node, rejecting insertions that would break acyclicity or give
    /// a value two producers.
    pub fn add_node(
        &mut self,
        op_type: impl Into<String>,
        inputs: &[ValueId],
        outputs: &[ValueId],
    ) -> Result<NodeId, GraphError> {
        let op_type = op_type.into();
        let id = NodeId(self.nodes.len() as u32);
        let name = format!("{op_type}_{}", id.0);
        self.add_named_node(name, op_type, inputs, outputs)
    }

    pub fn add_named_node(
        &mut self,
        name: impl Into<String>,
        op_type: impl Into<String>,
        inputs: &[ValueId],
        outputs: &[ValueId],
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        for id in inputs.iter().chain(outputs) {
            self.value(*id)?;
        }
        for &out in outputs {
            let value = &self.values[out.0 as usize];
            if let Some(producer) = value.producer {
                return Err(GraphError::MultipleProducers {
                    value: value.name.clone(),
                    producer: self.nodes[producer.0 as usize].name.clone(),
                });
            }
            if matches!(value.kind, ValueKind::Input | ValueKind::Captured) {
                return Err(GraphError::ProducesInput {
                    value: value.name.clone(),
                    node: name,
                });
            }
        }
        if self.reaches_any_producer(outputs, inputs) {
            return Err(GraphError::Cycle { node: name });
        }

        let id = NodeId(self.nodes.len() as u32);
        for &input in inputs {
            self.values[input.0 as usize].users.push(id);
        }
        for &out in outputs {
            self.values[out.0 as usize].producer = Some(id);
        }
        self.nodes.push(Node {
            op_type: op_type.into(),
            name,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            attributes: BTreeMap::new(),
            order: None,
            detached: false,
        });
        Ok(id)
    }

    /// Replaces the inputs of `node`, keeping use lists consistent.
    pub fn set_node_inputs(&mut self, node: NodeId, inputs: &[ValueId]) -> Result<(), GraphError> {
        for id in inputs {
            self.value(*id)?;
        }
        let outputs = self.node(node)?.outputs.clone();
        if self.reaches_any_producer(&outputs, inputs) {
            return Err(GraphError::Cycle {
                node: self.nodes[node.0 as usize].name.clone(),
            });
        }
        let old = std::mem::take(&mut self.nodes[node.0 as usize].inputs);
        for input in old {
            self.remove_one_use(input, node);
        }
        for &input in inputs {
            self.values[input.0 as usize].users.push(node);
        }
        self.nodes[node.0 as usize].inputs = inputs.to_vec();
        Ok(())
    }

    /// Redirects every consumer of `old` to read `new` instead. Graph outputs are
    /// not affected.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) -> Result<(), GraphError> {
        self.value(old)?;
        self.value(new)?;
        if old == new {
            return Ok(());
        }
        let users = std::mem::take(&mut self.values[old.0 as usize].users);
        for &user in &users {
            for input in self.nodes[user.0 as usize].inputs.iter_mut() {
                if *input == old {
                    *input = new;
                }
            }
        }
        self.values[new.0 as usize].users.extend(users);
        Ok(())
    }

    /// Detaches a node together with its output values.
    ///
    /// Fails when an output still feeds a live node or is a graph output, since
    /// that value would be left without a producer.
    pub fn remove_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        let outputs = self.node(node)?.outputs.clone();
        for &out in &outputs {
            let value = &self.values[out.0 as usize];
            if !value.users.is_empty() || self.output_values.contains(&out) {
                return Err(GraphError::ProducerRequired {
                    value: value.name.clone(),
                });
            }
        }
        let inputs = std::mem::take(&mut self.nodes[node.0 as usize].inputs);
        for input in inputs {
            self.remove_one_use(input, node);
        }
        for out in outputs {
            let value = &mut self.values[out.0 as usize];
            value.producer = None;
            value.detached = true;
            let name = value.name.clone();
            self.names.remove(&name);
        }
        self.nodes[node.0 as usize].detached = true;
        Ok(())
    }

    /// Detaches a temporary value nobody produces or consumes.
    pub fn remove_value(&mut self, value: ValueId) -> Result<(), GraphError> {
        let slot = self.value(value)?;
        if slot.producer.is_some() || !slot.users.is_empty() {
            return Err(GraphError::ProducerRequired {
                value: slot.name.clone(),
            });
        }
        let name = slot.name.clone();
        self.names.remove(&name);
        self.input_values.retain(|&v| v != value);
        self.output_values.retain(|&v| v != value);
        self.free_values.retain(|&v| v != value);
        self.values[value.0 as usize].detached = true;
        Ok(())
    }

    fn remove_one_use(&mut self, value: ValueId, node: NodeId) {
        let users = &mut self.values[value.0 as usize].users;
        if let Some(pos) = users.iter().position(|&u| u == node) {
            users.remove(pos);
        }
    }

    /// Returns true when a node consuming one of `from`'s values transitively
    /// produces one of `targets`, or when the two sets overlap.
    fn reaches_any_producer(&self, from: &[ValueId], targets: &[ValueId]) -> bool {
        if from.iter().any(|v| targets.contains(v)) {
            return true;
        }
        let target_producers: HashSet<NodeId> = targets
            .iter()
            .filter_map(|v| self.values[v.0 as usize].producer)
            .collect();
        if target_producers.is_empty() {
            return false;
        }
        let mut visited = HashSet::new();
        let mut stack: Vec<NodeId> = from
            .iter()
            .flat_map(|v| self.values[v.0 as usize].users.iter().copied())
            .collect();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if target_producers.contains(&node) {
                return true;
            }
            for out in &self.nodes[node.0 as usize].outputs {
                stack.extend(self.values[out.0 as usize].users.iter().copied());
            }
        }
        false
    }

    pub fn value(&self, id: ValueId) -> Result<&Value, GraphError> {
        self.values
            .get(id.0 as usize)
            .filter(|v| !v.detached)
            .ok_or(GraphError::UnknownValue(id))
    }

    pub fn value_mut(&mut self, id: ValueId) -> Result<&mut Value, GraphError> {
        self.values
            .get_mut(id.0 as usize)
            .filter(|v| !v.detached)
            .ok_or(GraphError::UnknownValue(id))
    }

    pub fn value_by_name(&self, name: &str) -> Option<ValueId> {
        self.names.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id.0 as usize)
            .filter(|n| !n.detached)
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.0 as usize)
            .filter(|n| !n.detached)
            .ok_or(GraphError::UnknownNode(id))
    }

    /// Live nodes in declaration order.
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.detached)
            .map(|(idx, n)| (NodeId(idx as u32), n))
    }

    pub fn live_node_ids(&self) -> Vec<NodeId> {
        self.live_nodes().map(|(id, _)| id).collect()
    }

    pub fn num_live_nodes(&self) -> usize {
        self.live_nodes().count()
    }

    /// Live values in declaration order.
    pub fn live_values(&self) -> impl Iterator<Item = (ValueId, &Value)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.detached)
            .map(|(idx, v)| (ValueId(idx as u32), v))
    }

    pub fn input_values(&self) -> &[ValueId] {
        &self.input_values
    }

    pub fn output_values(&self) -> &[ValueId] {
        &self.output_values
    }

    /// Values read from an enclosing scope that have not been made explicit inputs yet.
    pub fn free_values(&self) -> &[ValueId] {
        &self.free_values
    }

    /// Appends a captured name as an explicit input, reusing an existing captured value.
    pub(crate) fn add_explicit_capture(&mut self, name: &str) -> Result<ValueId, GraphError> {
        if let Some(id) = self.value_by_name(name) {
            let value = &mut self.values[id.0 as usize];
            if value.kind == ValueKind::Captured {
                value.kind = ValueKind::Input;
                self.free_values.retain(|&v| v != id);
                self.input_values.push(id);
            }
            return Ok(id);
        }
        self.add_input_value(name.to_string(), ValueType::unknown())
    }

    pub fn is_param(&self, value: ValueId, naming: ParamNaming) -> bool {
        let Some(value) = self
            .values
            .get(value.0 as usize)
            .filter(|v| !v.detached && v.kind == ValueKind::Input)
        else {
            return false;
        };
        value.initializer.is_some()
            || (naming == ParamNaming::LegacySlashPrefix && value.name.starts_with('/'))
    }

    pub fn input_names(&self) -> Vec<String> {
        self.input_names_with(ParamNaming::default())
    }

    pub fn param_names(&self) -> Vec<String> {
        self.param_names_with(ParamNaming::default())
    }

    /// Names of graph inputs that are supplied by the caller at run time.
    pub fn input_names_with(&self, naming: ParamNaming) -> Vec<String> {
        self.input_values
            .iter()
            .filter(|&&id| !self.is_param(id, naming))
            .map(|&id| self.values[id.0 as usize].name.clone())
            .collect()
    }

    /// Names of graph inputs classified as parameters.
    pub fn param_names_with(&self, naming: ParamNaming) -> Vec<String> {
        self.input_values
            .iter()
            .filter(|&&id| self.is_param(id, naming))
            .map(|&id| self.values[id.0 as usize].name.clone())
            .collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.output_values
            .iter()
            .map(|&id| self.values[id.0 as usize].name.clone())
            .collect()
    }

    /// Initializers of every graph input, keyed by value name.
    pub fn load_params(&self) -> BTreeMap<String, Tensor> {
        self.input_values
            .iter()
            .filter_map(|&id| {
                let value = &self.values[id.0 as usize];
                value
                    .initializer
                    .as_ref()
                    .map(|t| (value.name.clone(), t.clone()))
            })
            .collect()
    }

    pub fn value_name(&self, id: ValueId) -> &str {
        self.values
            .get(id.0 as usize)
            .map(|v| v.name.as_str())
            .unwrap_or("<invalid>")
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.values.get(id.0 as usize).map(|v| &v.ty)
    }

    pub fn is_graph_output(&self, id: ValueId) -> bool {
        self.output_values.contains(&id)
    }

    pub fn is_graph_input(&self, id: ValueId) -> bool {
        self.input_values.contains(&id)
    }

    /// Nested graphs owned by live nodes, paired with the owning node and attribute name.
    pub fn subgraphs(&self) -> Vec<(NodeId, String, &Graph)> {
        let mut out = Vec::new();
        for (id, node) in self.live_nodes() {
            for (key, attr) in &node.attributes {
                if let Attribute::Graph(graph) = attr {
                    out.push((id, key.clone(), graph.as_ref()));
                }
            }
        }
        out
    }
}
