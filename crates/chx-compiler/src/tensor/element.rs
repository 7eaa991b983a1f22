//! Host scalar types that can be converted into any [`Dtype`].

use half::f16;

use super::Dtype;

/// Host scalar accepted by [`Tensor::from_values`](super::Tensor::from_values).
pub trait Element: Copy {
    fn as_f64(self) -> f64;
    fn as_i64(self) -> i64;
    fn is_nonzero(self) -> bool;
}

macro_rules! impl_int_element {
    ($($ty:ty),*) => {
        $(
            impl Element for $ty {
                fn as_f64(self) -> f64 {
                    self as f64
                }
                fn as_i64(self) -> i64 {
                    self as i64
                }
                fn is_nonzero(self) -> bool {
                    self != 0
                }
            }
        )*
    };
}

impl_int_element!(i8, i16, i32, i64, u8, usize);

impl Element for f32 {
    fn as_f64(self) -> f64 {
        f64::from(self)
    }
    fn as_i64(self) -> i64 {
        self as i64
    }
    fn is_nonzero(self) -> bool {
        self != 0.0
    }
}

impl Element for f64 {
    fn as_f64(self) -> f64 {
        self
    }
    fn as_i64(self) -> i64 {
        self as i64
    }
    fn is_nonzero(self) -> bool {
        self != 0.0
    }
}

impl Element for bool {
    fn as_f64(self) -> f64 {
        f64::from(u8::from(self))
    }
    fn as_i64(self) -> i64 {
        i64::from(self)
    }
    fn is_nonzero(self) -> bool {
        self
    }
}

/// Appends the little-endian encoding of `value` converted to `dtype`.
pub(super) fn encode<T: Element>(dtype: Dtype, value: T, out: &mut Vec<u8>) {
    match dtype {
        Dtype::Bool => out.push(u8::from(value.is_nonzero())),
        Dtype::Int8 => out.extend_from_slice(&(value.as_i64() as i8).to_le_bytes()),
        Dtype::Int16 => out.extend_from_slice(&(value.as_i64() as i16).to_le_bytes()),
        Dtype::Int32 => out.extend_from_slice(&(value.as_i64() as i32).to_le_bytes()),
        Dtype::Int64 => out.extend_from_slice(&value.as_i64().to_le_bytes()),
        Dtype::UInt8 => out.extend_from_slice(&(value.as_i64() as u8).to_le_bytes()),
        Dtype::Float16 => out.extend_from_slice(&f16::from_f64(value.as_f64()).to_le_bytes()),
        Dtype::Float32 => out.extend_from_slice(&(value.as_f64() as f32).to_le_bytes()),
        Dtype::Float64 => out.extend_from_slice(&value.as_f64().to_le_bytes()),
    }
}
