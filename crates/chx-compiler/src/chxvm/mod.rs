//! ChxVM bytecode container.
//!
//! A [`Program`] is a flat, register-based instruction list produced by
//! [`emit`]. Control-flow bodies are carried as nested programs inside
//! instruction attributes. Programs serialize to JSON and bincode the same way
//! regardless of which engine eventually runs them.

mod emit;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::tensor::{Dtype, TensorRecord};

pub use emit::{emit, EmitError, EmitOptions};

/// Virtual register slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Register(pub u32);

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Identity,
    Constant,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
    Neg,
    Abs,
    Reciprocal,
    Floor,
    Ceil,
    Not,
    And,
    Or,
    Equal,
    Greater,
    Relu,
    Sigmoid,
    Tanh,
    Exp,
    Log,
    Sqrt,
    ReluGrad,
    SigmoidGrad,
    TanhGrad,
    Where,
    Cast,
    ZerosLike,
    Shape,
    Reshape,
    Transpose,
    Flatten,
    Squeeze,
    Unsqueeze,
    Concat,
    Expand,
    Gather,
    ReduceSum,
    ReduceSumTo,
    ReduceMax,
    ReduceMean,
    Softmax,
    LogSoftmax,
    MatMul,
    Gemm,
    Conv,
    If,
    Loop,
    FusionGroup,
    CustomOp,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Static operand attached to an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstAttr {
    Int(i64),
    Float(f32),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    String(String),
    Dtype(Dtype),
    Tensor(TensorRecord),
    Program(Box<Program>),
}

impl fmt::Display for InstAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstAttr::Int(v) => write!(f, "{v}"),
            InstAttr::Float(v) => write!(f, "{v}"),
            InstAttr::Ints(v) => write!(f, "{v:?}"),
            InstAttr::Floats(v) => write!(f, "{v:?}"),
            InstAttr::String(v) => write!(f, "{v:?}"),
            InstAttr::Dtype(v) => write!(f, "{v}"),
            InstAttr::Tensor(record) => {
                let dtype = Dtype::from_onnx(record.data_type)
                    .map(|d| d.name())
                    .unwrap_or("?");
                write!(f, "tensor<{dtype}{:?}>", record.dims)
            }
            InstAttr::Program(program) => write!(f, "@{}", program.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub inputs: SmallVec<[Register; 4]>,
    pub outputs: SmallVec<[Register; 2]>,
    pub attrs: BTreeMap<String, InstAttr>,
    /// Name of the graph node this instruction was lowered from.
    pub debug_info: String,
}

impl Instruction {
    pub fn attr(&self, key: &str) -> Option<&InstAttr> {
        self.attrs.get(key)
    }

    /// Nested programs referenced by this instruction, keyed by attribute.
    pub fn subprograms(&self) -> impl Iterator<Item = (&str, &Program)> + '_ {
        self.attrs.iter().filter_map(|(key, attr)| match attr {
            InstAttr::Program(program) => Some((key.as_str(), program.as_ref())),
            _ => None,
        })
    }
}

/// Device a program was lowered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        })
    }
}

/// Complete bytecode program for one graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub device: Device,
    pub instructions: Vec<Instruction>,
    pub inputs: Vec<(String, Register)>,
    pub outputs: Vec<(String, Register)>,
    pub value_names: Option<BTreeMap<Register, String>>,
    pub num_registers: u32,
}

#[derive(Debug, Error)]
pub enum ProgramSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error(transparent)]
    Serialization(#[from] ProgramSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: Device::default(),
            instructions: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            value_names: None,
            num_registers: 0,
        }
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.inputs.iter().map(|(name, _)| name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.outputs.iter().map(|(name, _)| name.as_str())
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        self.instructions.iter().map(|inst| inst.op).collect()
    }

    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        serde_json::to_string_pretty(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        serde_json::from_str(src).map_err(ProgramSerdeError::from)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, ProgramSerdeError> {
        bincode::serialize(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, ProgramSerdeError> {
        bincode::deserialize(bytes).map_err(ProgramSerdeError::from)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ProgramIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let contents = fs::read_to_string(path).map_err(ProgramIoError::from)?;
        Program::from_json_str(&contents).map_err(ProgramIoError::from)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let bytes = self.to_bincode_bytes()?;
        fs::write(path, bytes).map_err(ProgramIoError::from)
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let bytes = fs::read(path).map_err(ProgramIoError::from)?;
        Program::from_bincode_slice(&bytes).map_err(ProgramIoError::from)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }

    fn register_label(&self, register: Register) -> String {
        match self.value_names.as_ref().and_then(|names| names.get(&register)) {
            Some(name) => format!("{register}({name})"),
            None => register.to_string(),
        }
    }

    fn fmt_indented(&self, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pad = "  ".repeat(indent);
        writeln!(
            f,
            "{pad}program @{} (registers = {}) {{",
            self.name, self.num_registers
        )?;
        for (name, register) in &self.inputs {
            writeln!(f, "{pad}  input {name} -> {register}")?;
        }
        for (index, inst) in self.instructions.iter().enumerate() {
            let outputs = inst
                .outputs
                .iter()
                .map(|&r| self.register_label(r))
                .collect::<Vec<_>>()
                .join(", ");
            let inputs = inst
                .inputs
                .iter()
                .map(|&r| self.register_label(r))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "{pad}  #{index} {outputs} = {}({inputs})", inst.op)?;
            let scalars = inst
                .attrs
                .iter()
                .filter(|(_, attr)| !matches!(attr, InstAttr::Program(_)))
                .map(|(key, attr)| format!("{key}={attr}"))
                .collect::<Vec<_>>();
            if !scalars.is_empty() {
                write!(f, " {{{}}}", scalars.join(", "))?;
            }
            if !inst.debug_info.is_empty() {
                write!(f, "  // {}", inst.debug_info)?;
            }
            writeln!(f)?;
            for (_, program) in inst.subprograms() {
                program.fmt_indented(indent + 2, f)?;
            }
        }
        for (name, register) in &self.outputs {
            writeln!(f, "{pad}  output {name} <- {register}")?;
        }
        writeln!(f, "{pad}}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(0, f)
    }
}
