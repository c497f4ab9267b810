use std::fmt;

use num_traits::{Float, PrimInt, WrappingAdd, WrappingMul, WrappingSub};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::ops::{BinaryOp, CmpOp, UnaryOp};

// Literal — One typed element
//
// Literals are the unit of arithmetic for both strategies. The host context
// reads elements out of storage as literals, combines them, and writes them
// back; the IR executor holds register contents as literals. Keeping the
// arithmetic in one place is what makes compute and compiled execution agree
// bit for bit on integer types and within rounding on float types.
//
// Integer arithmetic wraps on overflow. Integer division by zero is an
// execution error rather than a panic.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Bool(bool),
    U8(u8),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Literal {
    pub fn dtype(&self) -> DType {
        match self {
            Literal::Bool(_) => DType::Bool,
            Literal::U8(_) => DType::U8,
            Literal::I32(_) => DType::I32,
            Literal::I64(_) => DType::I64,
            Literal::F32(_) => DType::F32,
            Literal::F64(_) => DType::F64,
        }
    }

    pub fn zero(dtype: DType) -> Self {
        Literal::from_f64(dtype, 0.0)
    }

    pub fn one(dtype: DType) -> Self {
        Literal::from_f64(dtype, 1.0)
    }

    /// Build a literal of `dtype` from an f64 (truncating for integers,
    /// non-zero for Bool).
    pub fn from_f64(dtype: DType, v: f64) -> Self {
        match dtype {
            DType::Bool => Literal::Bool(v != 0.0),
            DType::U8 => Literal::U8(v as u8),
            DType::I32 => Literal::I32(v as i32),
            DType::I64 => Literal::I64(v as i64),
            DType::F32 => Literal::F32(v as f32),
            DType::F64 => Literal::F64(v),
        }
    }

    pub fn to_f64(&self) -> f64 {
        match *self {
            Literal::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Literal::U8(v) => v as f64,
            Literal::I32(v) => v as f64,
            Literal::I64(v) => v as f64,
            Literal::F32(v) => v as f64,
            Literal::F64(v) => v,
        }
    }

    pub fn to_i64(&self) -> i64 {
        match *self {
            Literal::Bool(b) => b as i64,
            Literal::U8(v) => v as i64,
            Literal::I32(v) => v as i64,
            Literal::I64(v) => v,
            Literal::F32(v) => v as i64,
            Literal::F64(v) => v as i64,
        }
    }

    pub fn is_true(&self) -> bool {
        match *self {
            Literal::Bool(b) => b,
            other => other.to_f64() != 0.0,
        }
    }

    /// Convert to another element type with `as` semantics.
    pub fn cast(&self, dtype: DType) -> Literal {
        if self.dtype() == dtype {
            return *self;
        }
        match (*self, dtype) {
            (Literal::I64(v), DType::I32) => Literal::I32(v as i32),
            (Literal::I64(v), DType::U8) => Literal::U8(v as u8),
            (Literal::I32(v), DType::I64) => Literal::I64(v as i64),
            (Literal::I32(v), DType::U8) => Literal::U8(v as u8),
            (Literal::U8(v), DType::I32) => Literal::I32(v as i32),
            (Literal::U8(v), DType::I64) => Literal::I64(v as i64),
            (lit, _) => Literal::from_f64(dtype, lit.to_f64()),
        }
    }

    pub fn binary(&self, op: BinaryOp, rhs: &Literal) -> Result<Literal> {
        match (*self, *rhs) {
            (Literal::Bool(a), Literal::Bool(b)) => match op {
                BinaryOp::Min => Ok(Literal::Bool(a && b)),
                BinaryOp::Max => Ok(Literal::Bool(a || b)),
                _ => Err(Error::invalid_argument(format!(
                    "operation '{}' is not defined on bool",
                    op
                ))),
            },
            (Literal::U8(a), Literal::U8(b)) => int_binary(op, a, b).map(Literal::U8),
            (Literal::I32(a), Literal::I32(b)) => int_binary(op, a, b).map(Literal::I32),
            (Literal::I64(a), Literal::I64(b)) => int_binary(op, a, b).map(Literal::I64),
            (Literal::F32(a), Literal::F32(b)) => Ok(Literal::F32(float_binary(op, a, b))),
            (Literal::F64(a), Literal::F64(b)) => Ok(Literal::F64(float_binary(op, a, b))),
            (a, b) => Err(Error::dtype_mismatch(a.dtype(), b.dtype())),
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Result<Literal> {
        match *self {
            Literal::Bool(b) => match op {
                UnaryOp::Not => Ok(Literal::Bool(!b)),
                _ => Err(Error::invalid_argument(format!(
                    "operation '{}' is not defined on bool",
                    op
                ))),
            },
            Literal::U8(v) => match op {
                UnaryOp::Neg => Ok(Literal::U8(v.wrapping_neg())),
                UnaryOp::Abs => Ok(Literal::U8(v)),
                _ => Err(int_unary_error(op, DType::U8)),
            },
            Literal::I32(v) => match op {
                UnaryOp::Neg => Ok(Literal::I32(v.wrapping_neg())),
                UnaryOp::Abs => Ok(Literal::I32(v.wrapping_abs())),
                _ => Err(int_unary_error(op, DType::I32)),
            },
            Literal::I64(v) => match op {
                UnaryOp::Neg => Ok(Literal::I64(v.wrapping_neg())),
                UnaryOp::Abs => Ok(Literal::I64(v.wrapping_abs())),
                _ => Err(int_unary_error(op, DType::I64)),
            },
            Literal::F32(v) => float_unary(op, v).map(Literal::F32),
            Literal::F64(v) => float_unary(op, v).map(Literal::F64),
        }
    }

    pub fn compare(&self, op: CmpOp, rhs: &Literal) -> Result<bool> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::dtype_mismatch(self.dtype(), rhs.dtype()));
        }
        let ord = match (*self, *rhs) {
            (Literal::Bool(a), Literal::Bool(b)) => a.partial_cmp(&b),
            (Literal::U8(a), Literal::U8(b)) => a.partial_cmp(&b),
            (Literal::I32(a), Literal::I32(b)) => a.partial_cmp(&b),
            (Literal::I64(a), Literal::I64(b)) => a.partial_cmp(&b),
            (Literal::F32(a), Literal::F32(b)) => a.partial_cmp(&b),
            (Literal::F64(a), Literal::F64(b)) => a.partial_cmp(&b),
            _ => None,
        };
        use std::cmp::Ordering::*;
        // NaN compares unequal to everything, including itself.
        Ok(match (op, ord) {
            (CmpOp::Ne, None) => true,
            (_, None) => false,
            (CmpOp::Eq, Some(o)) => o == Equal,
            (CmpOp::Ne, Some(o)) => o != Equal,
            (CmpOp::Lt, Some(o)) => o == Less,
            (CmpOp::Le, Some(o)) => o != Greater,
            (CmpOp::Gt, Some(o)) => o == Greater,
            (CmpOp::Ge, Some(o)) => o != Less,
        })
    }

    /// Little-endian encoding, `dtype().size_in_bytes()` long.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            Literal::Bool(b) => vec![b as u8],
            Literal::U8(v) => vec![v],
            Literal::I32(v) => v.to_le_bytes().to_vec(),
            Literal::I64(v) => v.to_le_bytes().to_vec(),
            Literal::F32(v) => v.to_le_bytes().to_vec(),
            Literal::F64(v) => v.to_le_bytes().to_vec(),
        }
    }

    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Literal> {
        let n = dtype.size_in_bytes();
        if bytes.len() < n {
            return Err(Error::Execution(format!(
                "need {} bytes to decode {}, have {}",
                n,
                dtype,
                bytes.len()
            )));
        }
        let b = &bytes[..n];
        let mut w4 = [0u8; 4];
        let mut w8 = [0u8; 8];
        Ok(match dtype {
            DType::Bool => Literal::Bool(b[0] != 0),
            DType::U8 => Literal::U8(b[0]),
            DType::I32 => {
                w4.copy_from_slice(b);
                Literal::I32(i32::from_le_bytes(w4))
            }
            DType::F32 => {
                w4.copy_from_slice(b);
                Literal::F32(f32::from_le_bytes(w4))
            }
            DType::I64 => {
                w8.copy_from_slice(b);
                Literal::I64(i64::from_le_bytes(w8))
            }
            DType::F64 => {
                w8.copy_from_slice(b);
                Literal::F64(f64::from_le_bytes(w8))
            }
        })
    }
}

fn int_binary<T>(op: BinaryOp, a: T, b: T) -> Result<T>
where
    T: PrimInt + WrappingAdd + WrappingSub + WrappingMul,
{
    Ok(match op {
        BinaryOp::Add => a.wrapping_add(&b),
        BinaryOp::Sub => a.wrapping_sub(&b),
        BinaryOp::Mul => a.wrapping_mul(&b),
        BinaryOp::Div => a
            .checked_div(&b)
            .ok_or_else(|| Error::Execution("integer division by zero".into()))?,
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
    })
}

fn float_binary<T: Float>(op: BinaryOp, a: T, b: T) -> T {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
    }
}

fn float_unary<T: Float>(op: UnaryOp, v: T) -> Result<T> {
    Ok(match op {
        UnaryOp::Neg => -v,
        UnaryOp::Abs => v.abs(),
        UnaryOp::Exp => v.exp(),
        UnaryOp::Log => v.ln(),
        UnaryOp::Sqrt => v.sqrt(),
        UnaryOp::Tanh => v.tanh(),
        UnaryOp::Not => {
            return Err(Error::invalid_argument(
                "operation 'not' is only defined on bool",
            ))
        }
    })
}

fn int_unary_error(op: UnaryOp, dtype: DType) -> Error {
    Error::invalid_argument(format!("operation '{}' is not defined on {}", op, dtype))
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{}", v),
            Literal::U8(v) => write!(f, "{}u8", v),
            Literal::I32(v) => write!(f, "{}i32", v),
            Literal::I64(v) => write!(f, "{}i64", v),
            Literal::F32(v) => write!(f, "{:?}f32", v),
            Literal::F64(v) => write!(f, "{:?}f64", v),
        }
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<u8> for Literal {
    fn from(v: u8) -> Self {
        Literal::U8(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::I32(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::I64(v)
    }
}

impl From<f32> for Literal {
    fn from(v: f32) -> Self {
        Literal::F32(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::F64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_wraps() {
        let a = Literal::U8(250);
        let b = Literal::U8(10);
        assert_eq!(a.binary(BinaryOp::Add, &b).unwrap(), Literal::U8(4));
    }

    #[test]
    fn test_integer_div_by_zero() {
        let r = Literal::I32(3).binary(BinaryOp::Div, &Literal::I32(0));
        assert!(matches!(r, Err(Error::Execution(_))));
    }

    #[test]
    fn test_mixed_types_rejected() {
        let r = Literal::F32(1.0).binary(BinaryOp::Add, &Literal::F64(1.0));
        assert!(matches!(r, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_bool_logic() {
        let t = Literal::Bool(true);
        let f = Literal::Bool(false);
        assert_eq!(t.binary(BinaryOp::Min, &f).unwrap(), f);
        assert_eq!(t.binary(BinaryOp::Max, &f).unwrap(), t);
        assert_eq!(f.unary(UnaryOp::Not).unwrap(), t);
    }

    #[test]
    fn test_compare_nan() {
        let nan = Literal::F32(f32::NAN);
        assert!(!nan.compare(CmpOp::Eq, &nan).unwrap());
        assert!(nan.compare(CmpOp::Ne, &nan).unwrap());
        assert!(Literal::I64(2)
            .compare(CmpOp::Le, &Literal::I64(2))
            .unwrap());
    }

    #[test]
    fn test_le_bytes() {
        let lit = Literal::F64(-3.25);
        let bytes = lit.to_le_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(Literal::from_le_bytes(DType::F64, &bytes).unwrap(), lit);
    }
}
