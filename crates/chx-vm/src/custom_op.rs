use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chx_compiler::Tensor;

use crate::VmError;

/// What a custom operator hands back to the engine.
#[derive(Debug, Clone)]
pub enum CustomOpOutput {
    Single(Tensor),
    Tuple(Vec<Tensor>),
}

impl CustomOpOutput {
    pub fn len(&self) -> usize {
        match self {
            CustomOpOutput::Single(_) => 1,
            CustomOpOutput::Tuple(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host callback invoked by `CustomOp` instructions.
pub trait CustomOp: Send + Sync {
    fn call(&self, inputs: &[Tensor]) -> anyhow::Result<CustomOpOutput>;
}

impl<F> CustomOp for F
where
    F: Fn(&[Tensor]) -> anyhow::Result<CustomOpOutput> + Send + Sync,
{
    fn call(&self, inputs: &[Tensor]) -> anyhow::Result<CustomOpOutput> {
        self(inputs)
    }
}

#[derive(Clone)]
struct Entry {
    arity: usize,
    op: Arc<dyn CustomOp>,
}

/// Name-keyed table of custom operators with their declared output arity.
#[derive(Clone, Default)]
pub struct CustomOpRegistry {
    entries: BTreeMap<String, Entry>,
}

impl fmt::Debug for CustomOpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, entry)| (name, entry.arity)))
            .finish()
    }
}

impl CustomOpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        op: impl CustomOp + 'static,
    ) -> Result<(), VmError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(VmError::DuplicateCustomOp(name));
        }
        tracing::debug!(op = %name, arity, "registered custom op");
        self.entries.insert(
            name,
            Entry {
                arity,
                op: Arc::new(op),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn arity(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|entry| entry.arity)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Calls `name` and checks the result against its declared arity.
    pub fn invoke(&self, name: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>, VmError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| VmError::UnknownCustomOp(name.to_string()))?;
        let output = entry.op.call(inputs).map_err(|err| VmError::CustomOpFailed {
            op: name.to_string(),
            message: format!("{err:#}"),
        })?;
        match output {
            CustomOpOutput::Single(tensor) if entry.arity == 1 => Ok(vec![tensor]),
            CustomOpOutput::Tuple(values) if values.len() == entry.arity => Ok(values),
            other => Err(VmError::MalformedReturn {
                op: name.to_string(),
                expected: entry.arity,
                found: other.len(),
            }),
        }
    }
}
