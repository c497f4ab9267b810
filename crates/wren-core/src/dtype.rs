use std::fmt;

use serde::{Deserialize, Serialize};

use crate::literal::Literal;

// DType — Element types understood by both execution strategies
//
// Every Value, port and register of emitted code carries one of these tags;
// widths and arithmetic are defined here and in `Literal` only.
//
//   Bool — comparison results and trigger flags (1 byte in emitted memory)
//   U8   — raw bytes / quantized pixels
//   I32  — counters, class indices
//   I64  — loop iteration variables and address arithmetic
//   F32  — the default element type of model parameters
//   F64  — high-precision reference models

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Bool | DType::U8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DType::U8 | DType::I32 | DType::I64)
    }

    /// Parse the lowercase name produced by `Display`.
    pub fn from_name(name: &str) -> Option<DType> {
        match name {
            "bool" => Some(DType::Bool),
            "u8" => Some(DType::U8),
            "i32" => Some(DType::I32),
            "i64" => Some(DType::I64),
            "f32" => Some(DType::F32),
            "f64" => Some(DType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — Bridge between Rust numeric types and DType
//
// Lets host code write `Value::from_slice(&[1.0f32, 2.0])` and have the tag
// picked from the element type. Bool has no NumCast and is not
// covered; boolean values are built from literals.

/// Trait implemented by Rust numeric types that can back a Value.
pub trait WithDType:
    Copy + Send + Sync + 'static + num_traits::NumCast + PartialOrd + fmt::Debug
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    fn into_literal(self) -> Literal;

    /// Convert a literal of any numeric type into this type.
    fn from_literal(lit: Literal) -> Self;
}

macro_rules! impl_with_dtype {
    ($ty:ty, $variant:ident) => {
        impl WithDType for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_literal(self) -> Literal {
                Literal::$variant(self)
            }

            fn from_literal(lit: Literal) -> Self {
                match lit.cast(DType::$variant) {
                    Literal::$variant(v) => v,
                    _ => unreachable!("cast returns the requested variant"),
                }
            }
        }
    };
}

impl_with_dtype!(u8, U8);
impl_with_dtype!(i32, I32);
impl_with_dtype!(i64, I64);
impl_with_dtype!(f32, F32);
impl_with_dtype!(f64, F64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::Bool.size_in_bytes(), 1);
        assert_eq!(DType::I32.size_in_bytes(), 4);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_dtype_name_roundtrip() {
        for dt in [
            DType::Bool,
            DType::U8,
            DType::I32,
            DType::I64,
            DType::F32,
            DType::F64,
        ] {
            assert_eq!(DType::from_name(&dt.to_string()), Some(dt));
        }
        assert_eq!(DType::from_name("f16"), None);
    }

    #[test]
    fn test_with_dtype_literal() {
        assert_eq!(f32::DTYPE, DType::F32);
        assert_eq!(2.5f64.into_literal(), Literal::F64(2.5));
        assert_eq!(i32::from_literal(Literal::F64(7.9)), 7);
    }
}
