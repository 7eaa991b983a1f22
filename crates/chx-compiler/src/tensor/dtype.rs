//! Enumerates the element types a graph constant or value may carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::TensorError;

/// Element type of a tensor or graph value.
///
/// There is no implicit ordering by width; every conversion matches on the
/// variant explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Float16,
    Float32,
    Float64,
}

impl Dtype {
    pub const ALL: [Dtype; 9] = [
        Dtype::Bool,
        Dtype::Int8,
        Dtype::Int16,
        Dtype::Int32,
        Dtype::Int64,
        Dtype::UInt8,
        Dtype::Float16,
        Dtype::Float32,
        Dtype::Float64,
    ];

    /// Returns the number of bytes required per element.
    pub fn size_of(self) -> usize {
        match self {
            Dtype::Bool | Dtype::Int8 | Dtype::UInt8 => 1,
            Dtype::Int16 | Dtype::Float16 => 2,
            Dtype::Int32 | Dtype::Float32 => 4,
            Dtype::Int64 | Dtype::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Dtype::Float16 | Dtype::Float32 | Dtype::Float64)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Dtype::Int8 | Dtype::Int16 | Dtype::Int32 | Dtype::Int64 | Dtype::UInt8
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::UInt8 => "uint8",
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        }
    }

    /// Maps an ONNX `TensorProto.DataType` tag onto a supported dtype.
    pub fn from_onnx(tag: i32) -> Result<Self, TensorError> {
        match tag {
            1 => Ok(Dtype::Float32),
            2 => Ok(Dtype::UInt8),
            3 => Ok(Dtype::Int8),
            5 => Ok(Dtype::Int16),
            6 => Ok(Dtype::Int32),
            7 => Ok(Dtype::Int64),
            9 => Ok(Dtype::Bool),
            10 => Ok(Dtype::Float16),
            11 => Ok(Dtype::Float64),
            other => Err(TensorError::UnsupportedDtype(other)),
        }
    }

    /// Returns the ONNX `TensorProto.DataType` tag for this dtype.
    pub fn to_onnx(self) -> i32 {
        match self {
            Dtype::Float32 => 1,
            Dtype::UInt8 => 2,
            Dtype::Int8 => 3,
            Dtype::Int16 => 5,
            Dtype::Int32 => 6,
            Dtype::Int64 => 7,
            Dtype::Bool => 9,
            Dtype::Float16 => 10,
            Dtype::Float64 => 11,
        }
    }

    /// Parses the lowercase name produced by [`Dtype::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Dtype::ALL.into_iter().find(|dtype| dtype.name() == name)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onnx_tags_map_back_to_the_same_dtype() {
        for dtype in Dtype::ALL {
            assert_eq!(Dtype::from_onnx(dtype.to_onnx()).unwrap(), dtype);
        }
    }

    #[test]
    fn string_and_uint16_tags_are_unsupported() {
        assert!(matches!(
            Dtype::from_onnx(8),
            Err(TensorError::UnsupportedDtype(8))
        ));
        assert!(matches!(
            Dtype::from_onnx(4),
            Err(TensorError::UnsupportedDtype(4))
        ));
    }
}
