use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::MemoryLayout;
use crate::literal::Literal;
use crate::ops::{BinaryOp, CmpOp, UnaryOp};
use crate::scalar::Scalar;
use crate::value::Value;

// EmitterContext — The strategy every node's math is written against
//
// A node expresses its computation exactly once, generically over a context
// `C: EmitterContext`. Two implementations exist:
//
//   ComputeContext (this module) — performs each operation immediately on
//     host memory. This is the reference interpreter.
//
//   IrContext (wren-emit) — records each operation as instructions of a
//     function being emitted. Values it hands out are bound to emitted
//     locations rather than host memory.
//
// Because both strategies receive the same sequence of calls, compiled code
// and the interpreter agree by construction, up to the arithmetic itself,
// which both route through `Literal`.
//
// Elementwise loops, views, dot products and window shifts are built on top
// of these primitives in `functions`, `vector`, `matrix` and `buffer`.
//
// CONTRACT:
//   - `offset` takes exactly one index per logical dimension and returns an
//     unconstrained value based at the addressed element.
//   - `store`, `binary`, `unary`, `compare`, `cast` operate on rank-0 values.
//   - `move_elements` counts in elements relative to each value's base and
//     has memmove semantics (overlap allowed).
//   - `for_range` requires `step > 0`.

pub trait EmitterContext: Sized {
    //  Memory

    /// Fresh zero-filled memory.
    fn allocate(&mut self, dtype: DType, layout: MemoryLayout) -> Result<Value>;

    /// Persistent memory for a node's state, seeded from `value`.
    ///
    /// Writes through the returned value survive across time steps. Reset
    /// restores zeros.
    fn state(&mut self, name: &str, value: &Value) -> Result<Value>;

    /// Address the element at logical `indices`.
    fn offset(&mut self, value: &Value, indices: &[Scalar]) -> Result<Value>;

    /// The element of a rank-0 value if it is known while building.
    fn literal(&self, value: &Value) -> Option<Literal>;

    /// `*dst = src` for rank-0 values of the same element type.
    fn store(&mut self, dst: &Value, src: &Value) -> Result<()>;

    /// Copy `count` elements from `src[src_offset..]` to `dst[dst_offset..]`.
    fn move_elements(
        &mut self,
        dst: &Value,
        dst_offset: usize,
        src: &Value,
        src_offset: usize,
        count: usize,
    ) -> Result<()>;

    //  Arithmetic

    fn binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value>;

    fn unary(&mut self, op: UnaryOp, operand: &Value) -> Result<Value>;

    /// Produces a Bool scalar.
    fn compare(&mut self, op: CmpOp, lhs: &Value, rhs: &Value) -> Result<Value>;

    fn cast(&mut self, operand: &Value, dtype: DType) -> Result<Value>;

    //  Control flow

    /// Run `body` for `i = start, start + step, ... < stop`.
    fn for_range<F>(&mut self, start: usize, stop: usize, step: usize, body: F) -> Result<()>
    where
        F: FnMut(&mut Self, Scalar) -> Result<()>;

    fn if_else<T, E>(&mut self, cond: &Value, then: T, otherwise: E) -> Result<()>
    where
        T: FnOnce(&mut Self) -> Result<()>,
        E: FnOnce(&mut Self) -> Result<()>;

    fn if_then<T>(&mut self, cond: &Value, then: T) -> Result<()>
    where
        T: FnOnce(&mut Self) -> Result<()>,
    {
        self.if_else(cond, then, |_| Ok(()))
    }
}

/// Reference interpreter: every operation runs immediately on host memory.
#[derive(Debug, Default)]
pub struct ComputeContext {
    ops: usize,
}

impl ComputeContext {
    pub fn new() -> Self {
        ComputeContext::default()
    }

    /// Number of scalar operations performed so far.
    pub fn op_count(&self) -> usize {
        self.ops
    }
}

fn host_literal(value: &Value) -> Result<Literal> {
    if !value.is_host() {
        return Err(Error::invalid_argument(
            "compute context can only read host values",
        ));
    }
    value.literal()
}

impl EmitterContext for ComputeContext {
    fn allocate(&mut self, dtype: DType, layout: MemoryLayout) -> Result<Value> {
        Ok(Value::allocate(dtype, layout))
    }

    fn state(&mut self, _name: &str, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn offset(&mut self, value: &Value, indices: &[Scalar]) -> Result<Value> {
        let layout = value.check_ready()?;
        if indices.len() != layout.rank() {
            return Err(Error::invalid_argument(format!(
                "offset needs {} indices, got {}",
                layout.rank(),
                indices.len()
            )));
        }
        let coords = indices
            .iter()
            .map(|s| {
                let i = host_literal(s.value())?.to_i64();
                usize::try_from(i)
                    .map_err(|_| Error::invalid_argument(format!("negative index {}", i)))
            })
            .collect::<Result<Vec<_>>>()?;
        let pos = layout.flat_offset(&coords)?;
        value.advanced(pos)
    }

    fn literal(&self, value: &Value) -> Option<Literal> {
        host_literal(value).ok()
    }

    fn store(&mut self, dst: &Value, src: &Value) -> Result<()> {
        let lit = host_literal(src)?;
        let dtype = dst.dtype()?;
        if dtype != lit.dtype() {
            return Err(Error::dtype_mismatch(dtype, lit.dtype()));
        }
        self.ops += 1;
        dst.set(&[], lit)
    }

    fn move_elements(
        &mut self,
        dst: &Value,
        dst_offset: usize,
        src: &Value,
        src_offset: usize,
        count: usize,
    ) -> Result<()> {
        let (dst_storage, dst_base) = dst
            .host()
            .ok_or_else(|| Error::invalid_argument("move destination is not host memory"))?;
        let (src_storage, src_base) = src
            .host()
            .ok_or_else(|| Error::invalid_argument("move source is not host memory"))?;
        if count == 0 {
            return Ok(());
        }
        self.ops += count;
        if dst_storage.ptr_eq(src_storage) {
            dst_storage
                .write()
                .copy_within(src_base + src_offset, dst_base + dst_offset, count)
        } else {
            let src_guard = src_storage.read();
            dst_storage
                .write()
                .copy_from(dst_base + dst_offset, &src_guard, src_base + src_offset, count)
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        self.ops += 1;
        let r = host_literal(lhs)?.binary(op, &host_literal(rhs)?)?;
        Ok(Value::from_literal(r))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Value) -> Result<Value> {
        self.ops += 1;
        Ok(Value::from_literal(host_literal(operand)?.unary(op)?))
    }

    fn compare(&mut self, op: CmpOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        self.ops += 1;
        let r = host_literal(lhs)?.compare(op, &host_literal(rhs)?)?;
        Ok(Value::from_literal(Literal::Bool(r)))
    }

    fn cast(&mut self, operand: &Value, dtype: DType) -> Result<Value> {
        Ok(Value::from_literal(host_literal(operand)?.cast(dtype)))
    }

    fn for_range<F>(&mut self, start: usize, stop: usize, step: usize, mut body: F) -> Result<()>
    where
        F: FnMut(&mut Self, Scalar) -> Result<()>,
    {
        assert!(step > 0, "for_range step must be positive");
        for i in (start..stop).step_by(step) {
            body(self, Scalar::from(i))?;
        }
        Ok(())
    }

    fn if_else<T, E>(&mut self, cond: &Value, then: T, otherwise: E) -> Result<()>
    where
        T: FnOnce(&mut Self) -> Result<()>,
        E: FnOnce(&mut Self) -> Result<()>,
    {
        if host_literal(cond)?.is_true() {
            then(self)
        } else {
            otherwise(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_range_boundaries() {
        let mut ctx = ComputeContext::new();
        let mut seen = Vec::new();
        ctx.for_range(0, 10, 3, |_, i| {
            seen.push(i.get()?.to_i64());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![0, 3, 6, 9]);

        let mut entered = false;
        ctx.for_range(5, 5, 1, |_, _| {
            entered = true;
            Ok(())
        })
        .unwrap();
        assert!(!entered);
    }

    #[test]
    fn test_offset_rank_mismatch() {
        let mut ctx = ComputeContext::new();
        let v = Value::allocate(DType::F32, MemoryLayout::new(&[2, 2]));
        let r = ctx.offset(&v, &[Scalar::from(0usize)]);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_move_elements_overlapping() {
        let mut ctx = ComputeContext::new();
        let v = Value::from_slice(&[1.0f32, 2.0, 3.0, 4.0]);
        ctx.move_elements(&v, 0, &v, 1, 3).unwrap();
        assert_eq!(v.to_vec::<f32>().unwrap(), vec![2.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_if_else_branch() {
        let mut ctx = ComputeContext::new();
        let out = Value::from_literal(Literal::I32(0));
        let cond = Value::from_literal(Literal::Bool(false));
        ctx.if_else(
            &cond,
            |c| c.store(&out, &Value::from_literal(Literal::I32(1))),
            |c| c.store(&out, &Value::from_literal(Literal::I32(2))),
        )
        .unwrap();
        assert_eq!(out.literal().unwrap(), Literal::I32(2));
    }
}
