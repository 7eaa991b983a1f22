//! Interchange-format tensor records and their decoding into [`Tensor`].
//!
//! A record carries its payload either as one contiguous `raw_data` blob or in
//! exactly one typed repeated field chosen by the element type. Records that
//! mix both encodings, or populate a typed field foreign to their dtype, are
//! rejected.

use half::f16;
use serde::{Deserialize, Serialize};

use super::{checked_byte_len, checked_num_elements, Dtype, Tensor, TensorError};

/// Serialized constant as it appears in an interchange graph document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorRecord {
    pub name: String,
    pub data_type: i32,
    pub dims: Vec<i64>,
    pub raw_data: Option<Vec<u8>>,
    pub float_data: Vec<f32>,
    pub int32_data: Vec<i32>,
    pub int64_data: Vec<i64>,
    pub double_data: Vec<f64>,
    pub uint64_data: Vec<u64>,
    pub string_data: Vec<Vec<u8>>,
    pub doc_string: String,
}

const FLOAT_DATA: &str = "float_data";
const INT32_DATA: &str = "int32_data";
const INT64_DATA: &str = "int64_data";
const DOUBLE_DATA: &str = "double_data";
const UINT64_DATA: &str = "uint64_data";
const STRING_DATA: &str = "string_data";

impl TensorRecord {
    fn populated_typed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if !self.float_data.is_empty() {
            fields.push(FLOAT_DATA);
        }
        if !self.int32_data.is_empty() {
            fields.push(INT32_DATA);
        }
        if !self.int64_data.is_empty() {
            fields.push(INT64_DATA);
        }
        if !self.double_data.is_empty() {
            fields.push(DOUBLE_DATA);
        }
        if !self.uint64_data.is_empty() {
            fields.push(UINT64_DATA);
        }
        if !self.string_data.is_empty() {
            fields.push(STRING_DATA);
        }
        fields
    }
}

fn typed_field_for(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::Bool
        | Dtype::Int8
        | Dtype::Int16
        | Dtype::Int32
        | Dtype::UInt8
        | Dtype::Float16 => INT32_DATA,
        Dtype::Int64 => INT64_DATA,
        Dtype::Float32 => FLOAT_DATA,
        Dtype::Float64 => DOUBLE_DATA,
    }
}

impl Tensor {
    /// Decodes an interchange record, accepting either the raw or the typed encoding.
    pub fn from_record(record: &TensorRecord) -> Result<Self, TensorError> {
        let dtype = Dtype::from_onnx(record.data_type)?;
        let name = record.name.clone();
        let dims = record
            .dims
            .iter()
            .map(|&dim| {
                usize::try_from(dim).map_err(|_| TensorError::NegativeDim {
                    name: name.clone(),
                    dim,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let populated = record.populated_typed_fields();
        let tensor = match &record.raw_data {
            Some(raw) => {
                if let Some(field) = populated.first() {
                    return Err(TensorError::MixedEncoding { name, field });
                }
                Tensor::from_bytes(name, dtype, dims, raw.as_slice())?
            }
            None => {
                let expected = typed_field_for(dtype);
                if let Some(field) = populated.iter().find(|field| **field != expected) {
                    return Err(TensorError::UnexpectedField { name, field, dtype });
                }
                decode_typed(record, name, dtype, dims)?
            }
        };
        Ok(tensor.with_doc_string(record.doc_string.clone()))
    }

    /// Encodes the tensor using the typed repeated field for its dtype.
    pub fn to_record(&self) -> TensorRecord {
        let mut record = self.record_header();
        let count = self.num_elements();
        let bytes = self.as_bytes();
        match self.dtype() {
            Dtype::Bool | Dtype::UInt8 => {
                record.int32_data = bytes.iter().map(|&b| i32::from(b)).collect();
            }
            Dtype::Int8 => {
                record.int32_data = bytes.iter().map(|&b| i32::from(b as i8)).collect();
            }
            Dtype::Int16 => {
                record.int32_data = bytes
                    .chunks_exact(2)
                    .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])))
                    .collect();
            }
            Dtype::Float16 => {
                record.int32_data = bytes
                    .chunks_exact(2)
                    .map(|c| i32::from(u16::from_le_bytes([c[0], c[1]])))
                    .collect();
            }
            Dtype::Int32 => {
                record.int32_data = bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
            }
            Dtype::Int64 => {
                record.int64_data = bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                    .collect();
            }
            Dtype::Float32 => {
                record.float_data = bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
            }
            Dtype::Float64 => {
                record.double_data = bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                    .collect();
            }
        }
        debug_assert!(count == 0 || record.populated_typed_fields().len() == 1);
        record
    }

    /// Encodes the tensor as a single contiguous `raw_data` blob.
    pub fn to_raw_record(&self) -> TensorRecord {
        let mut record = self.record_header();
        record.raw_data = Some(self.as_bytes().to_vec());
        record
    }

    fn record_header(&self) -> TensorRecord {
        TensorRecord {
            name: self.name().to_string(),
            data_type: self.dtype().to_onnx(),
            dims: self.dims().iter().map(|&d| d as i64).collect(),
            doc_string: self.doc_string().to_string(),
            ..TensorRecord::default()
        }
    }
}

fn decode_typed(
    record: &TensorRecord,
    name: String,
    dtype: Dtype,
    dims: Vec<usize>,
) -> Result<Tensor, TensorError> {
    let expected = checked_num_elements(&name, &dims)?;
    let byte_len = checked_byte_len(&name, dtype, &dims)?;
    let actual = match dtype {
        Dtype::Int64 => record.int64_data.len(),
        Dtype::Float32 => record.float_data.len(),
        Dtype::Float64 => record.double_data.len(),
        _ => record.int32_data.len(),
    };
    if actual != expected {
        return Err(TensorError::ElementCount {
            name,
            expected,
            actual,
        });
    }

    let mut bytes = Vec::with_capacity(byte_len);
    match dtype {
        Dtype::Bool => bytes.extend(record.int32_data.iter().map(|&v| u8::from(v != 0))),
        Dtype::Int8 => bytes.extend(record.int32_data.iter().map(|&v| v as i8 as u8)),
        Dtype::UInt8 => bytes.extend(record.int32_data.iter().map(|&v| v as u8)),
        Dtype::Int16 => {
            for &v in &record.int32_data {
                bytes.extend_from_slice(&(v as i16).to_le_bytes());
            }
        }
        Dtype::Float16 => {
            for &v in &record.int32_data {
                bytes.extend_from_slice(&f16::from_bits(v as u16).to_le_bytes());
            }
        }
        Dtype::Int32 => {
            for &v in &record.int32_data {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        Dtype::Int64 => {
            for &v in &record.int64_data {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        Dtype::Float32 => {
            for &v in &record.float_data {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        Dtype::Float64 => {
            for &v in &record.double_data {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    Tensor::from_bytes(name, dtype, dims, bytes)
}
