use wren_core::error::Result;
use wren_core::{functions, EmitterContext, MemoryLayout, Scalar, Value, Vector};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

/// Normalized exponentials over all elements of the input. The maximum is
/// subtracted first so large inputs do not overflow.
#[derive(Debug, Clone)]
pub struct Softmax {
    base: NodeBase,
}

impl Softmax {
    pub const KIND: &'static str = "softmax";

    pub fn new(model: &Model, input: PortRef) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let out = super::output("output", source.dtype(), &source.layout().logical_sizes());
        Ok(Softmax {
            base: NodeBase::new(vec![source], vec![out]),
        })
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let x = Vector::new(functions::flatten(super::bound(inputs, 0, Self::KIND)?)?)?;
        let y = Vector::new(functions::flatten(super::bound(outputs, 0, Self::KIND)?)?)?;
        softmax(ctx, &x, &y)
    }
}

/// `y = softmax(x)`; `x` and `y` may alias.
pub(crate) fn softmax<C: EmitterContext>(ctx: &mut C, x: &Vector, y: &Vector) -> Result<()> {
    let dtype = x.dtype();
    let max = Scalar::new(ctx.allocate(dtype, MemoryLayout::scalar())?)?;
    let sum = Scalar::new(ctx.allocate(dtype, MemoryLayout::scalar())?)?;
    max.assign(ctx, &max.like(f64::NEG_INFINITY))?;
    sum.assign(ctx, &sum.like(0.0))?;
    ctx.for_range(0, x.size(), 1, |ctx, i| {
        let v = x.at(ctx, i)?;
        let m = max.max(ctx, &v)?;
        max.assign(ctx, &m)
    })?;
    ctx.for_range(0, x.size(), 1, |ctx, i| {
        let v = x.at(ctx, i.clone())?;
        let e = v.sub(ctx, &max)?.exp(ctx)?;
        y.at(ctx, i)?.assign(ctx, &e)?;
        let s = sum.add(ctx, &e)?;
        sum.assign(ctx, &s)
    })?;
    ctx.for_range(0, y.size(), 1, |ctx, i| {
        let e = y.at(ctx, i)?;
        let q = e.div(ctx, &sum)?;
        e.assign(ctx, &q)
    })
}

impl Node for Softmax {
    crate::node_common!(Softmax::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        Ok(NodeArgs::new())
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = Softmax::new(model, args.input(0)?)?;
    model.insert(node)
}
