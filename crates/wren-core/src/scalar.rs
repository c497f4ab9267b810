use crate::context::EmitterContext;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::literal::Literal;
use crate::ops::{BinaryOp, CmpOp, UnaryOp};
use crate::value::Value;

/// Rank-0 view over a Value.
///
/// A scalar may be a build-time constant (host memory) or a location in
/// emitted code; the arithmetic below works for both and lets the context
/// decide whether to fold or emit.
#[derive(Debug, Clone)]
pub struct Scalar {
    value: Value,
    dtype: DType,
}

impl Scalar {
    /// Wrap a value; invalid-argument unless it is defined and rank 0.
    pub fn new(value: Value) -> Result<Self> {
        let rank = value.check_ready()?.rank();
        if rank != 0 {
            return Err(Error::invalid_argument(format!(
                "scalar requires a rank-0 value, got rank {}",
                rank
            )));
        }
        let dtype = value.dtype()?;
        Ok(Scalar { value, dtype })
    }

    pub fn constant(lit: impl Into<Literal>) -> Self {
        let lit = lit.into();
        Scalar {
            value: Value::from_literal(lit),
            dtype: lit.dtype(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Read a host scalar.
    pub fn get(&self) -> Result<Literal> {
        self.value.literal()
    }

    /// The element if the context knows it while building.
    pub fn known<C: EmitterContext>(&self, ctx: &C) -> Option<Literal> {
        ctx.literal(&self.value)
    }

    fn check_type(&self, other: &Scalar) -> Result<()> {
        if self.dtype != other.dtype {
            return Err(Error::dtype_mismatch(self.dtype, other.dtype));
        }
        Ok(())
    }

    /// `self = src`. Writes through to whatever memory the scalar views.
    pub fn assign<C: EmitterContext>(&self, ctx: &mut C, src: &Scalar) -> Result<()> {
        self.check_type(src)?;
        ctx.store(&self.value, &src.value)
    }

    pub fn binary<C: EmitterContext>(&self, ctx: &mut C, op: BinaryOp, rhs: &Scalar) -> Result<Scalar> {
        self.check_type(rhs)?;
        Scalar::new(ctx.binary(op, &self.value, &rhs.value)?)
    }

    pub fn add<C: EmitterContext>(&self, ctx: &mut C, rhs: &Scalar) -> Result<Scalar> {
        self.binary(ctx, BinaryOp::Add, rhs)
    }

    pub fn sub<C: EmitterContext>(&self, ctx: &mut C, rhs: &Scalar) -> Result<Scalar> {
        self.binary(ctx, BinaryOp::Sub, rhs)
    }

    pub fn mul<C: EmitterContext>(&self, ctx: &mut C, rhs: &Scalar) -> Result<Scalar> {
        self.binary(ctx, BinaryOp::Mul, rhs)
    }

    pub fn div<C: EmitterContext>(&self, ctx: &mut C, rhs: &Scalar) -> Result<Scalar> {
        self.binary(ctx, BinaryOp::Div, rhs)
    }

    pub fn min<C: EmitterContext>(&self, ctx: &mut C, rhs: &Scalar) -> Result<Scalar> {
        self.binary(ctx, BinaryOp::Min, rhs)
    }

    pub fn max<C: EmitterContext>(&self, ctx: &mut C, rhs: &Scalar) -> Result<Scalar> {
        self.binary(ctx, BinaryOp::Max, rhs)
    }

    pub fn unary<C: EmitterContext>(&self, ctx: &mut C, op: UnaryOp) -> Result<Scalar> {
        Scalar::new(ctx.unary(op, &self.value)?)
    }

    pub fn neg<C: EmitterContext>(&self, ctx: &mut C) -> Result<Scalar> {
        self.unary(ctx, UnaryOp::Neg)
    }

    pub fn exp<C: EmitterContext>(&self, ctx: &mut C) -> Result<Scalar> {
        self.unary(ctx, UnaryOp::Exp)
    }

    pub fn sqrt<C: EmitterContext>(&self, ctx: &mut C) -> Result<Scalar> {
        self.unary(ctx, UnaryOp::Sqrt)
    }

    pub fn tanh<C: EmitterContext>(&self, ctx: &mut C) -> Result<Scalar> {
        self.unary(ctx, UnaryOp::Tanh)
    }

    pub fn compare<C: EmitterContext>(&self, ctx: &mut C, op: CmpOp, rhs: &Scalar) -> Result<Scalar> {
        self.check_type(rhs)?;
        Scalar::new(ctx.compare(op, &self.value, &rhs.value)?)
    }

    pub fn cast<C: EmitterContext>(&self, ctx: &mut C, dtype: DType) -> Result<Scalar> {
        if dtype == self.dtype {
            return Ok(self.clone());
        }
        Scalar::new(ctx.cast(&self.value, dtype)?)
    }

    /// Constant of this scalar's element type.
    pub fn like(&self, v: f64) -> Scalar {
        Scalar::constant(Literal::from_f64(self.dtype, v))
    }
}

impl From<Literal> for Scalar {
    fn from(lit: Literal) -> Self {
        Scalar::constant(lit)
    }
}

macro_rules! impl_scalar_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Scalar::constant(Literal::from(v))
                }
            }
        )*
    };
}

impl_scalar_from!(bool, u8, i32, i64, f32, f64);

/// Indices are I64, the address arithmetic type of emitted code.
impl From<usize> for Scalar {
    fn from(v: usize) -> Self {
        Scalar::constant(Literal::I64(v as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ComputeContext;

    #[test]
    fn test_scalar_arith() {
        let mut ctx = ComputeContext::new();
        let a = Scalar::from(3.0f32);
        let b = Scalar::from(4.0f32);
        let c = a.mul(&mut ctx, &b).unwrap().add(&mut ctx, &a).unwrap();
        assert_eq!(c.get().unwrap(), Literal::F32(15.0));
    }

    #[test]
    fn test_scalar_type_mismatch() {
        let mut ctx = ComputeContext::new();
        let a = Scalar::from(1.0f32);
        let b = Scalar::from(1i32);
        assert!(matches!(a.add(&mut ctx, &b), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_scalar_requires_rank_zero() {
        let v = Value::from_slice(&[1.0f64, 2.0]);
        assert!(matches!(Scalar::new(v), Err(Error::InvalidArgument(_))));
    }
}
