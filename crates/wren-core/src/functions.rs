use crate::context::EmitterContext;
use crate::error::{Error, Result};
use crate::layout::MemoryLayout;
use crate::ops::{BinaryOp, UnaryOp};
use crate::scalar::Scalar;
use crate::value::Value;

// Shape-generic helpers built on the EmitterContext primitives
//
// `for_each` is the single coordinate walker: it nests one `for_range` per
// logical dimension, outermost first, and hands the body the coordinate
// scalars. Every elementwise operation on vectors and matrices goes through
// `elementwise` or `elementwise_scalar`, which do the shape and type checks
// and then call `for_each`.

type Visit<'a, C> = dyn FnMut(&mut C, &[Scalar]) -> Result<()> + 'a;

/// Visit every logical coordinate of `layout` in row-major order.
pub fn for_each<C, F>(ctx: &mut C, layout: &MemoryLayout, mut f: F) -> Result<()>
where
    C: EmitterContext,
    F: FnMut(&mut C, &[Scalar]) -> Result<()>,
{
    let sizes = layout.logical_sizes();
    let mut prefix = Vec::with_capacity(sizes.len());
    visit(ctx, &sizes, &mut prefix, &mut f)
}

fn visit<C: EmitterContext>(
    ctx: &mut C,
    sizes: &[usize],
    prefix: &mut Vec<Scalar>,
    f: &mut Visit<'_, C>,
) -> Result<()> {
    match sizes.split_first() {
        None => f(ctx, prefix),
        Some((&n, rest)) => ctx.for_range(0, n, 1, |ctx, i| {
            prefix.push(i);
            let r = visit(ctx, rest, &mut *prefix, &mut *f);
            prefix.pop();
            r
        }),
    }
}

/// Scalar view of the element at logical `coords`.
pub fn element<C: EmitterContext>(ctx: &mut C, value: &Value, coords: &[Scalar]) -> Result<Scalar> {
    let v = ctx.offset(value, coords)?;
    Scalar::new(v.with_layout(MemoryLayout::scalar())?)
}

/// Sizes and element types must agree.
pub fn check_compatible(dst: &Value, src: &Value) -> Result<()> {
    let dl = dst.check_ready()?;
    let sl = src.check_ready()?;
    let (ds, ss) = (dl.logical_sizes(), sl.logical_sizes());
    if ds != ss {
        return Err(Error::SizeMismatch {
            expected: ds,
            got: ss,
        });
    }
    let (dt, st) = (dst.dtype()?, src.dtype()?);
    if dt != st {
        return Err(Error::dtype_mismatch(dt, st));
    }
    Ok(())
}

/// `dst[i] = dst[i] op src[i]` for every coordinate.
pub fn elementwise<C: EmitterContext>(ctx: &mut C, dst: &Value, src: &Value, op: BinaryOp) -> Result<()> {
    check_compatible(dst, src)?;
    let layout = dst.layout()?.clone();
    for_each(ctx, &layout, |ctx, idx| {
        let d = element(ctx, dst, idx)?;
        let s = element(ctx, src, idx)?;
        let r = d.binary(ctx, op, &s)?;
        d.assign(ctx, &r)
    })
}

/// `dst[i] = dst[i] op s` for every coordinate.
pub fn elementwise_scalar<C: EmitterContext>(
    ctx: &mut C,
    dst: &Value,
    s: &Scalar,
    op: BinaryOp,
) -> Result<()> {
    let layout = dst.check_ready()?.clone();
    let dt = dst.dtype()?;
    if dt != s.dtype() {
        return Err(Error::dtype_mismatch(dt, s.dtype()));
    }
    for_each(ctx, &layout, |ctx, idx| {
        let d = element(ctx, dst, idx)?;
        let r = d.binary(ctx, op, s)?;
        d.assign(ctx, &r)
    })
}

/// `dst[i] = op(dst[i])`.
pub fn map_unary<C: EmitterContext>(ctx: &mut C, dst: &Value, op: UnaryOp) -> Result<()> {
    let layout = dst.check_ready()?.clone();
    for_each(ctx, &layout, |ctx, idx| {
        let d = element(ctx, dst, idx)?;
        let r = d.unary(ctx, op)?;
        d.assign(ctx, &r)
    })
}

/// `dst[i] = src[i]`.
pub fn assign<C: EmitterContext>(ctx: &mut C, dst: &Value, src: &Value) -> Result<()> {
    check_compatible(dst, src)?;
    let layout = dst.layout()?.clone();
    for_each(ctx, &layout, |ctx, idx| {
        let d = element(ctx, dst, idx)?;
        let s = element(ctx, src, idx)?;
        d.assign(ctx, &s)
    })
}

/// `dst[i] = s`.
pub fn fill<C: EmitterContext>(ctx: &mut C, dst: &Value, s: &Scalar) -> Result<()> {
    let layout = dst.check_ready()?.clone();
    for_each(ctx, &layout, |ctx, idx| element(ctx, dst, idx)?.assign(ctx, s))
}

/// Fresh compact allocation holding the active elements of `src`.
pub fn copy<C: EmitterContext>(ctx: &mut C, src: &Value) -> Result<Value> {
    let layout = src.check_ready()?.compact();
    let dst = ctx.allocate(src.dtype()?, layout)?;
    assign(ctx, &dst, src)?;
    Ok(dst)
}

/// Rank-1 view over a contiguous value.
pub fn flatten(value: &Value) -> Result<Value> {
    let layout = value.check_ready()?;
    if !layout.is_contiguous() {
        return Err(Error::invalid_argument(
            "only contiguous values can be flattened",
        ));
    }
    value
        .clone()
        .with_layout(MemoryLayout::new(&[layout.num_elements()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ComputeContext;
    use crate::dtype::DType;

    #[test]
    fn test_for_each_order() {
        let mut ctx = ComputeContext::new();
        let layout = MemoryLayout::new(&[2, 3]);
        let mut seen = Vec::new();
        for_each(&mut ctx, &layout, |_, idx| {
            let c: Vec<i64> = idx.iter().map(|s| s.get().map(|l| l.to_i64())).collect::<Result<_>>()?;
            seen.push(c);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec![0, 0]);
        assert_eq!(seen[4], vec![1, 1]);
    }

    #[test]
    fn test_for_each_rank_zero_visits_once() {
        let mut ctx = ComputeContext::new();
        let mut n = 0;
        for_each(&mut ctx, &MemoryLayout::scalar(), |_, idx| {
            assert!(idx.is_empty());
            n += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_elementwise_size_mismatch() {
        let mut ctx = ComputeContext::new();
        let a = Value::allocate(DType::F32, MemoryLayout::new(&[2, 3]));
        let b = Value::allocate(DType::F32, MemoryLayout::new(&[3, 2]));
        let r = elementwise(&mut ctx, &a, &b, BinaryOp::Add);
        assert!(matches!(r, Err(Error::SizeMismatch { .. })));
    }

    #[test]
    fn test_copy_compacts_padded() {
        let mut ctx = ComputeContext::new();
        let layout = MemoryLayout::with_padding(&[2], &[4], &[1]).unwrap();
        let v = Value::wrap(vec![0.0f64, 1.0, 2.0, 0.0], layout).unwrap();
        let c = copy(&mut ctx, &v).unwrap();
        assert!(c.layout().unwrap().is_contiguous());
        assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 2.0]);
        assert!(!c.same_storage(&v));
    }

    #[test]
    fn test_flatten_requires_contiguous() {
        let v = Value::allocate(DType::F32, MemoryLayout::new(&[2, 2]));
        assert_eq!(flatten(&v).unwrap().layout().unwrap().sizes(), &[4]);
        let padded = Value::allocate(
            DType::F32,
            MemoryLayout::with_padding(&[1, 1], &[2, 2], &[0, 0]).unwrap(),
        );
        assert!(flatten(&padded).is_err());
    }
}
