//! Constant tensors embedded in graphs and the element-type algebra they use.
//!
//! A [`Tensor`] is immutable after construction. Its backing buffer is always
//! contiguous little-endian storage whose length equals
//! `product(dims) * dtype.size_of()`; every constructor enforces this.

pub mod dtype;
mod element;
mod record;

use std::fmt;
use std::sync::Arc;

use half::f16;
use thiserror::Error;

pub use dtype::Dtype;
pub use element::Element;
pub use record::TensorRecord;

/// Errors raised while constructing, decoding or reading tensors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("unsupported element type tag {0}")]
    UnsupportedDtype(i32),
    #[error("tensor '{name}' mixes raw_data with typed field '{field}'")]
    MixedEncoding { name: String, field: &'static str },
    #[error("tensor '{name}' of dtype {dtype} must not populate typed field '{field}'")]
    UnexpectedField {
        name: String,
        field: &'static str,
        dtype: Dtype,
    },
    #[error("tensor '{name}' has negative dimension {dim}")]
    NegativeDim { name: String, dim: i64 },
    #[error("tensor '{name}' element count overflows")]
    Overflow { name: String },
    #[error("tensor '{name}' expects {expected} bytes but got {actual}")]
    ByteLength {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("tensor '{name}' expects {expected} elements but got {actual}")]
    ElementCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("index {index} out of range for tensor '{name}' with {len} elements")]
    IndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },
}

/// Named, typed, immutable constant.
#[derive(Clone, PartialEq, Eq)]
pub struct Tensor {
    name: String,
    dtype: Dtype,
    dims: Vec<usize>,
    data: Arc<[u8]>,
    doc_string: String,
}

impl Tensor {
    /// Wraps a contiguous little-endian buffer, validating its length against `dims`.
    pub fn from_bytes(
        name: impl Into<String>,
        dtype: Dtype,
        dims: Vec<usize>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<Self, TensorError> {
        let name = name.into();
        let data = bytes.into();
        let expected = checked_byte_len(&name, dtype, &dims)?;
        if data.len() != expected {
            return Err(TensorError::ByteLength {
                name,
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor {
            name,
            dtype,
            dims,
            data,
            doc_string: String::new(),
        })
    }

    /// Converts host scalars into `dtype`, one element per value.
    pub fn from_values<T: Element>(
        name: impl Into<String>,
        dtype: Dtype,
        dims: Vec<usize>,
        values: &[T],
    ) -> Result<Self, TensorError> {
        let name = name.into();
        let expected = checked_num_elements(&name, &dims)?;
        if values.len() != expected {
            return Err(TensorError::ElementCount {
                name,
                expected,
                actual: values.len(),
            });
        }
        let mut bytes = Vec::with_capacity(expected * dtype.size_of());
        for value in values {
            element::encode(dtype, *value, &mut bytes);
        }
        Tensor::from_bytes(name, dtype, dims, bytes)
    }

    /// Builds a rank-0 tensor.
    pub fn scalar<T: Element>(
        name: impl Into<String>,
        dtype: Dtype,
        value: T,
    ) -> Result<Self, TensorError> {
        Tensor::from_values(name, dtype, Vec::new(), &[value])
    }

    /// Copies `other` under a new name. The buffer is shared, not duplicated.
    pub fn renamed(name: impl Into<String>, other: &Tensor) -> Self {
        Tensor {
            name: name.into(),
            dtype: other.dtype,
            dims: other.dims.clone(),
            data: Arc::clone(&other.data),
            doc_string: other.doc_string.clone(),
        }
    }

    pub fn with_doc_string(mut self, doc: impl Into<String>) -> Self {
        self.doc_string = doc.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn doc_string(&self) -> &str {
        &self.doc_string
    }

    pub fn element_size(&self) -> usize {
        self.dtype.size_of()
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Reads element `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Result<f64, TensorError> {
        let bytes = self.element_bytes(index)?;
        Ok(match self.dtype {
            Dtype::Bool => f64::from(bytes[0] != 0),
            Dtype::Int8 => f64::from(bytes[0] as i8),
            Dtype::UInt8 => f64::from(bytes[0]),
            Dtype::Int16 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            Dtype::Int32 => f64::from(i32::from_le_bytes(le4(bytes))),
            Dtype::Int64 => i64::from_le_bytes(le8(bytes)) as f64,
            Dtype::Float16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
            Dtype::Float32 => f64::from(f32::from_le_bytes(le4(bytes))),
            Dtype::Float64 => f64::from_le_bytes(le8(bytes)),
        })
    }

    /// Reads element `index` converted to `i64` (floats truncate toward zero).
    pub fn get_i64(&self, index: usize) -> Result<i64, TensorError> {
        let bytes = self.element_bytes(index)?;
        Ok(match self.dtype {
            Dtype::Bool => i64::from(bytes[0] != 0),
            Dtype::Int8 => i64::from(bytes[0] as i8),
            Dtype::UInt8 => i64::from(bytes[0]),
            Dtype::Int16 => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            Dtype::Int32 => i64::from(i32::from_le_bytes(le4(bytes))),
            Dtype::Int64 => i64::from_le_bytes(le8(bytes)),
            Dtype::Float16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f64() as i64,
            Dtype::Float32 => f32::from_le_bytes(le4(bytes)) as i64,
            Dtype::Float64 => f64::from_le_bytes(le8(bytes)) as i64,
        })
    }

    /// Reads every element as `i64`; used for shape- and axis-valued constants.
    pub fn to_i64_vec(&self) -> Result<Vec<i64>, TensorError> {
        (0..self.num_elements()).map(|i| self.get_i64(i)).collect()
    }

    fn element_bytes(&self, index: usize) -> Result<&[u8], TensorError> {
        let len = self.num_elements();
        if index >= len {
            return Err(TensorError::IndexOutOfRange {
                name: self.name.clone(),
                index,
                len,
            });
        }
        let size = self.element_size();
        Ok(&self.data[index * size..(index + 1) * size])
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("dims", &self.dims)
            .field("nbytes", &self.data.len())
            .finish()
    }
}

fn checked_num_elements(name: &str, dims: &[usize]) -> Result<usize, TensorError> {
    dims.iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| TensorError::Overflow {
            name: name.to_string(),
        })
}

fn checked_byte_len(name: &str, dtype: Dtype, dims: &[usize]) -> Result<usize, TensorError> {
    checked_num_elements(name, dims)?
        .checked_mul(dtype.size_of())
        .ok_or_else(|| TensorError::Overflow {
            name: name.to_string(),
        })
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_rejects_short_buffers() {
        let err = Tensor::from_bytes("w", Dtype::Float32, vec![2, 2], vec![0u8; 12])
            .expect_err("12 bytes cannot hold four f32 values");
        assert_eq!(
            err,
            TensorError::ByteLength {
                name: "w".into(),
                expected: 16,
                actual: 12
            }
        );
    }

    #[test]
    fn from_values_converts_into_target_dtype() {
        let t = Tensor::from_values("x", Dtype::Int8, vec![3], &[1.9f64, -2.0, 127.0]).unwrap();
        assert_eq!(t.to_i64_vec().unwrap(), vec![1, -2, 127]);
        let b = Tensor::from_values("b", Dtype::Bool, vec![2], &[0.5f32, 0.0]).unwrap();
        assert_eq!(b.as_bytes(), &[1, 0]);
    }

    #[test]
    fn renamed_shares_storage() {
        let t = Tensor::from_values("a", Dtype::Float32, vec![2], &[1.0f32, 2.0]).unwrap();
        let r = Tensor::renamed("b", &t);
        assert_eq!(r.name(), "b");
        assert_eq!(r.as_bytes().as_ptr(), t.as_bytes().as_ptr());
        assert_eq!(r.get_f64(1).unwrap(), 2.0);
    }
}
