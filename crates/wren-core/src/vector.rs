use crate::context::EmitterContext;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::functions;
use crate::literal::Literal;
use crate::ops::BinaryOp;
use crate::scalar::Scalar;
use crate::value::Value;

/// Rank-1 view over a Value.
///
/// Views share storage with the value they were built from: writing through
/// `at`, `sub_vector`, or a compound assignment mutates the parent.
#[derive(Debug, Clone)]
pub struct Vector {
    value: Value,
    dtype: DType,
    size: usize,
}

impl Vector {
    pub fn new(value: Value) -> Result<Self> {
        let layout = value.check_ready()?;
        if layout.rank() != 1 {
            return Err(Error::invalid_argument(format!(
                "vector requires a rank-1 value, got rank {}",
                layout.rank()
            )));
        }
        let size = layout.sizes()[0];
        let dtype = value.dtype()?;
        Ok(Vector { value, dtype, size })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Distance in elements between neighbours.
    pub fn increment(&self) -> usize {
        self.value
            .layout()
            .map(|l| l.increments()[0])
            .unwrap_or(1)
    }

    /// Element `index`; constant indices are bounds-checked.
    pub fn at<C: EmitterContext>(&self, ctx: &mut C, index: impl Into<Scalar>) -> Result<Scalar> {
        let index = index.into();
        if let Some(lit) = index.known(ctx) {
            let i = constant_index(lit)?;
            if i >= self.size {
                return Err(Error::IndexOutOfRange {
                    index: i,
                    len: self.size,
                });
            }
        }
        functions::element(ctx, &self.value, &[index])
    }

    /// `size` elements starting at `offset`. Zero is a valid size.
    pub fn sub_vector<C: EmitterContext>(
        &self,
        ctx: &mut C,
        offset: impl Into<Scalar>,
        size: usize,
    ) -> Result<Vector> {
        let offset = offset.into();
        match offset.known(ctx) {
            Some(lit) => {
                let o = constant_index(lit)?;
                if o + size > self.size {
                    return Err(Error::IndexOutOfRange {
                        index: o + size,
                        len: self.size,
                    });
                }
            }
            None => {
                if size > self.size {
                    return Err(Error::IndexOutOfRange {
                        index: size,
                        len: self.size,
                    });
                }
            }
        }
        let layout = self.value.layout()?.sub_layout(&[size])?;
        // An empty view may sit one past the last element; it never reads
        // its base, so it keeps the parent's.
        if size == 0 {
            return Vector::new(self.value.clone().with_layout(layout)?);
        }
        let base = ctx.offset(&self.value, &[offset])?;
        Vector::new(base.with_layout(layout)?)
    }

    pub fn copy<C: EmitterContext>(&self, ctx: &mut C) -> Result<Vector> {
        Vector::new(functions::copy(ctx, &self.value)?)
    }

    /// `self[i] = src[i]`.
    pub fn assign<C: EmitterContext>(&self, ctx: &mut C, src: &Vector) -> Result<()> {
        functions::assign(ctx, &self.value, &src.value)
    }

    pub fn fill<C: EmitterContext>(&self, ctx: &mut C, s: &Scalar) -> Result<()> {
        functions::fill(ctx, &self.value, s)
    }

    pub fn add_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Add)
    }

    pub fn sub_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Sub)
    }

    pub fn mul_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Mul)
    }

    pub fn div_assign<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<()> {
        functions::elementwise(ctx, &self.value, &rhs.value, BinaryOp::Div)
    }

    pub fn add_assign_scalar<C: EmitterContext>(&self, ctx: &mut C, s: &Scalar) -> Result<()> {
        functions::elementwise_scalar(ctx, &self.value, s, BinaryOp::Add)
    }

    pub fn sub_assign_scalar<C: EmitterContext>(&self, ctx: &mut C, s: &Scalar) -> Result<()> {
        functions::elementwise_scalar(ctx, &self.value, s, BinaryOp::Sub)
    }

    pub fn mul_assign_scalar<C: EmitterContext>(&self, ctx: &mut C, s: &Scalar) -> Result<()> {
        functions::elementwise_scalar(ctx, &self.value, s, BinaryOp::Mul)
    }

    pub fn div_assign_scalar<C: EmitterContext>(&self, ctx: &mut C, s: &Scalar) -> Result<()> {
        functions::elementwise_scalar(ctx, &self.value, s, BinaryOp::Div)
    }

    fn binary_new<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector, op: BinaryOp) -> Result<Vector> {
        functions::check_compatible(&self.value, &rhs.value)?;
        let out = self.copy(ctx)?;
        functions::elementwise(ctx, &out.value, &rhs.value, op)?;
        Ok(out)
    }

    pub fn add<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<Vector> {
        self.binary_new(ctx, rhs, BinaryOp::Add)
    }

    pub fn sub<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<Vector> {
        self.binary_new(ctx, rhs, BinaryOp::Sub)
    }

    pub fn mul<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<Vector> {
        self.binary_new(ctx, rhs, BinaryOp::Mul)
    }

    pub fn div<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<Vector> {
        self.binary_new(ctx, rhs, BinaryOp::Div)
    }

    /// Σ self[i] × rhs[i]. The accumulator is a fresh rank-0 allocation.
    pub fn dot<C: EmitterContext>(&self, ctx: &mut C, rhs: &Vector) -> Result<Scalar> {
        functions::check_compatible(&self.value, &rhs.value)?;
        let dtype = self.dtype();
        let acc = Scalar::new(ctx.allocate(dtype, crate::layout::MemoryLayout::scalar())?)?;
        acc.assign(ctx, &Scalar::constant(Literal::zero(dtype)))?;
        ctx.for_range(0, self.size, 1, |ctx, i| {
            let a = functions::element(ctx, &self.value, &[i.clone()])?;
            let b = functions::element(ctx, &rhs.value, &[i])?;
            let p = a.mul(ctx, &b)?;
            let s = acc.add(ctx, &p)?;
            acc.assign(ctx, &s)
        })?;
        Ok(acc)
    }
}

/// A constant index as a position; negative values are rejected as given.
pub(crate) fn constant_index(lit: Literal) -> Result<usize> {
    let i = lit.to_i64();
    usize::try_from(i).map_err(|_| Error::invalid_argument(format!("negative index {}", i)))
}
