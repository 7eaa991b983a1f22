//! Operator schemas known to the compiler.
//!
//! Built-in schemas live in an immutable table initialised once. Callers add
//! their own operators to an [`OpRegistry`] before the pipeline validates a
//! graph; the registry is owned by the compilation, never global.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use thiserror::Error;

/// Operator type names the passes create or match on.
pub mod names {
    pub const IDENTITY: &str = "Identity";
    pub const CONSTANT: &str = "Constant";
    pub const ADD: &str = "Add";
    pub const SUB: &str = "Sub";
    pub const MUL: &str = "Mul";
    pub const DIV: &str = "Div";
    pub const NEG: &str = "Neg";
    pub const NOT: &str = "Not";
    pub const SUM: &str = "Sum";
    pub const LESS: &str = "Less";
    pub const GREATER: &str = "Greater";
    pub const LESS_OR_EQUAL: &str = "LessOrEqual";
    pub const GREATER_OR_EQUAL: &str = "GreaterOrEqual";
    pub const RELU: &str = "Relu";
    pub const SIGMOID: &str = "Sigmoid";
    pub const TANH: &str = "Tanh";
    pub const EXP: &str = "Exp";
    pub const LOG: &str = "Log";
    pub const SQRT: &str = "Sqrt";
    pub const MATMUL: &str = "MatMul";
    pub const GEMM: &str = "Gemm";
    pub const TRANSPOSE: &str = "Transpose";
    pub const RESHAPE: &str = "Reshape";
    pub const SHAPE: &str = "Shape";
    pub const REDUCE_SUM: &str = "ReduceSum";
    pub const REDUCE_MEAN: &str = "ReduceMean";
    pub const SOFTMAX: &str = "Softmax";
    pub const WHERE: &str = "Where";
    pub const CAST: &str = "Cast";
    pub const IF: &str = "If";
    pub const LOOP: &str = "Loop";
    pub const ABS: &str = "Abs";
    pub const RECIPROCAL: &str = "Reciprocal";
    pub const FLOOR: &str = "Floor";
    pub const CEIL: &str = "Ceil";
    pub const POW: &str = "Pow";
    pub const MAX: &str = "Max";
    pub const MIN: &str = "Min";
    pub const EQUAL: &str = "Equal";
    pub const AND: &str = "And";
    pub const OR: &str = "Or";
    pub const FLATTEN: &str = "Flatten";
    pub const SQUEEZE: &str = "Squeeze";
    pub const UNSQUEEZE: &str = "Unsqueeze";
    pub const CONCAT: &str = "Concat";
    pub const EXPAND: &str = "Expand";
    pub const GATHER: &str = "Gather";
    pub const REDUCE_MAX: &str = "ReduceMax";
    pub const LOG_SOFTMAX: &str = "LogSoftmax";
    pub const CONV: &str = "Conv";
    pub const FUSION_GROUP: &str = "ChxFusionGroup";
    pub const REDUCE_SUM_TO: &str = "ChxReduceSumTo";
    pub const ZEROS_LIKE: &str = "ChxZerosLike";
    pub const RELU_GRAD: &str = "ChxReluGrad";
    pub const SIGMOID_GRAD: &str = "ChxSigmoidGrad";
    pub const TANH_GRAD: &str = "ChxTanhGrad";
}

/// Broad operator family, used by fusion, recomputation and cost heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Elementwise,
    Comparison,
    DataMovement,
    Reduction,
    Linalg,
    ControlFlow,
    Source,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    pub name: String,
    pub kind: OpKind,
    pub min_inputs: usize,
    pub max_inputs: Option<usize>,
    pub num_outputs: usize,
}

impl OpSchema {
    pub fn new(name: impl Into<String>, kind: OpKind, inputs: (usize, Option<usize>)) -> Self {
        Self {
            name: name.into(),
            kind,
            min_inputs: inputs.0,
            max_inputs: inputs.1,
            num_outputs: 1,
        }
    }

    pub fn with_outputs(mut self, num_outputs: usize) -> Self {
        self.num_outputs = num_outputs;
        self
    }

    pub fn accepts_inputs(&self, count: usize) -> bool {
        count >= self.min_inputs && self.max_inputs.map_or(true, |max| count <= max)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpRegistryError {
    #[error("operator '{0}' is already registered")]
    Duplicate(String),
}

fn builtin_table() -> &'static HashMap<&'static str, OpSchema> {
    static TABLE: OnceLock<HashMap<&'static str, OpSchema>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use names::*;
        use OpKind::*;

        let exactly = |n: usize| (n, Some(n));
        let variadic = |n: usize| (n, None);
        let entries: Vec<(&'static str, OpKind, (usize, Option<usize>))> = vec![
            (IDENTITY, Elementwise, exactly(1)),
            (NEG, Elementwise, exactly(1)),
            (RELU, Elementwise, exactly(1)),
            (SIGMOID, Elementwise, exactly(1)),
            (TANH, Elementwise, exactly(1)),
            (EXP, Elementwise, exactly(1)),
            (LOG, Elementwise, exactly(1)),
            (SQRT, Elementwise, exactly(1)),
            (ABS, Elementwise, exactly(1)),
            (RECIPROCAL, Elementwise, exactly(1)),
            (FLOOR, Elementwise, exactly(1)),
            (CEIL, Elementwise, exactly(1)),
            (CAST, Elementwise, exactly(1)),
            (ADD, Elementwise, exactly(2)),
            (SUB, Elementwise, exactly(2)),
            (MUL, Elementwise, exactly(2)),
            (DIV, Elementwise, exactly(2)),
            (POW, Elementwise, exactly(2)),
            (SUM, Elementwise, variadic(1)),
            (MAX, Elementwise, variadic(1)),
            (MIN, Elementwise, variadic(1)),
            (WHERE, Elementwise, exactly(3)),
            (RELU_GRAD, Elementwise, exactly(2)),
            (SIGMOID_GRAD, Elementwise, exactly(2)),
            (TANH_GRAD, Elementwise, exactly(2)),
            (NOT, Comparison, exactly(1)),
            (LESS, Comparison, exactly(2)),
            (GREATER, Comparison, exactly(2)),
            (LESS_OR_EQUAL, Comparison, exactly(2)),
            (GREATER_OR_EQUAL, Comparison, exactly(2)),
            (EQUAL, Comparison, exactly(2)),
            (AND, Comparison, exactly(2)),
            (OR, Comparison, exactly(2)),
            (RESHAPE, DataMovement, exactly(2)),
            (TRANSPOSE, DataMovement, exactly(1)),
            (SHAPE, DataMovement, exactly(1)),
            (FLATTEN, DataMovement, exactly(1)),
            (SQUEEZE, DataMovement, (1, Some(2))),
            (UNSQUEEZE, DataMovement, (1, Some(2))),
            (CONCAT, DataMovement, variadic(1)),
            (EXPAND, DataMovement, exactly(2)),
            (GATHER, DataMovement, exactly(2)),
            (REDUCE_SUM, Reduction, (1, Some(2))),
            (REDUCE_MEAN, Reduction, (1, Some(2))),
            (REDUCE_MAX, Reduction, (1, Some(2))),
            (SOFTMAX, Reduction, exactly(1)),
            (LOG_SOFTMAX, Reduction, exactly(1)),
            (REDUCE_SUM_TO, Reduction, (1, Some(2))),
            (MATMUL, Linalg, exactly(2)),
            (GEMM, Linalg, (2, Some(3))),
            (CONV, Linalg, (2, Some(3))),
            (IF, ControlFlow, variadic(1)),
            (LOOP, ControlFlow, variadic(2)),
            (FUSION_GROUP, ControlFlow, variadic(0)),
            (CONSTANT, Source, exactly(0)),
            (ZEROS_LIKE, Source, exactly(1)),
        ];
        entries
            .into_iter()
            .map(|(name, kind, inputs)| {
                let schema = OpSchema::new(name, kind, inputs);
                let schema = match name {
                    IF | LOOP | FUSION_GROUP => OpSchema {
                        num_outputs: 0,
                        ..schema
                    },
                    _ => schema,
                };
                (name, schema)
            })
            .collect()
    })
}

/// Looks up a built-in schema without a registry.
pub fn builtin_schema(op_type: &str) -> Option<&'static OpSchema> {
    builtin_table().get(op_type)
}

/// Schema lookup for one compilation: built-ins plus caller-registered operators.
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    custom: BTreeMap<String, OpSchema>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_custom(&mut self, schema: OpSchema) -> Result<(), OpRegistryError> {
        if builtin_table().contains_key(schema.name.as_str()) || self.custom.contains_key(&schema.name)
        {
            return Err(OpRegistryError::Duplicate(schema.name));
        }
        tracing::debug!(op = %schema.name, "registered custom operator schema");
        self.custom.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn register_custom_ops(
        &mut self,
        schemas: impl IntoIterator<Item = OpSchema>,
    ) -> Result<(), OpRegistryError> {
        for schema in schemas {
            self.register_custom(schema)?;
        }
        Ok(())
    }

    pub fn get(&self, op_type: &str) -> Option<&OpSchema> {
        builtin_schema(op_type).or_else(|| self.custom.get(op_type))
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.get(op_type).is_some()
    }

    pub fn kind(&self, op_type: &str) -> Option<OpKind> {
        self.get(op_type).map(|schema| schema.kind)
    }

    pub fn custom_ops(&self) -> impl Iterator<Item = &OpSchema> {
        self.custom.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_ops_cannot_shadow_builtins() {
        let mut registry = OpRegistry::new();
        let err = registry
            .register_custom(OpSchema::new("Add", OpKind::Custom, (2, Some(2))))
            .unwrap_err();
        assert_eq!(err, OpRegistryError::Duplicate("Add".into()));
        registry
            .register_custom(OpSchema::new("MyOp", OpKind::Custom, (1, None)))
            .unwrap();
        assert_eq!(registry.kind("MyOp"), Some(OpKind::Custom));
        assert!(registry.register_custom(OpSchema::new("MyOp", OpKind::Custom, (1, None))).is_err());
    }
}
