use serde::{Deserialize, Serialize};

use wren_core::error::{Error, Result};
use wren_core::functions::{element, for_each};
use wren_core::{EmitterContext, MemoryLayout, Scalar, Value};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingKind {
    Max,
    Mean,
}

/// Window reduction over rows and columns of a [rows, cols, channels]
/// input, each channel separately. Windows never extend past the input.
#[derive(Debug, Clone)]
pub struct Pooling {
    base: NodeBase,
    kind: PoolingKind,
    window: usize,
    stride: usize,
}

impl Pooling {
    pub const KIND: &'static str = "pooling";

    pub fn new(model: &Model, input: PortRef, kind: PoolingKind, window: usize, stride: usize) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let sizes = source.layout().logical_sizes();
        let (rows, cols, channels) = match sizes[..] {
            [r, c, ch] => (r, c, ch),
            _ => {
                return Err(Error::RankMismatch {
                    expected: 3,
                    got: sizes.len(),
                })
            }
        };
        if window == 0 || stride == 0 || window > rows || window > cols {
            return Err(Error::invalid_argument(format!(
                "pooling window {} with stride {} does not fit a {}x{} input",
                window, stride, rows, cols
            )));
        }
        let out_rows = (rows - window) / stride + 1;
        let out_cols = (cols - window) / stride + 1;
        let out = super::output("output", source.dtype(), &[out_rows, out_cols, channels]);
        Ok(Pooling {
            base: NodeBase::new(vec![source], vec![out]),
            kind,
            window,
            stride,
        })
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let input = super::bound(inputs, 0, Self::KIND)?;
        let output = super::bound(outputs, 0, Self::KIND)?;
        let dtype = input.dtype()?;
        let window = MemoryLayout::new(&[self.window, self.window]);
        let stride = Scalar::from(self.stride);
        let out_layout = output.layout()?.clone();
        for_each(ctx, &out_layout, |ctx, o| {
            let acc = Scalar::new(ctx.allocate(dtype, MemoryLayout::scalar())?)?;
            let initial = match self.kind {
                PoolingKind::Max => f64::NEG_INFINITY,
                PoolingKind::Mean => 0.0,
            };
            acc.assign(ctx, &acc.like(initial))?;
            let row0 = o[0].mul(ctx, &stride)?;
            let col0 = o[1].mul(ctx, &stride)?;
            for_each(ctx, &window, |ctx, w| {
                let r = row0.add(ctx, &w[0])?;
                let c = col0.add(ctx, &w[1])?;
                let x = element(ctx, input, &[r, c, o[2].clone()])?;
                let next = match self.kind {
                    PoolingKind::Max => acc.max(ctx, &x)?,
                    PoolingKind::Mean => acc.add(ctx, &x)?,
                };
                acc.assign(ctx, &next)
            })?;
            let result = match self.kind {
                PoolingKind::Max => acc.clone(),
                PoolingKind::Mean => acc.div(ctx, &acc.like((self.window * self.window) as f64))?,
            };
            element(ctx, output, o)?.assign(ctx, &result)
        })
    }
}

impl Node for Pooling {
    crate::node_common!(Pooling::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("pooling", self.kind)?
            .with("window", self.window)?
            .with("stride", self.stride)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let window: usize = args.get("window")?;
    let node = Pooling::new(
        model,
        args.input(0)?,
        args.get("pooling")?,
        window,
        args.get_or("stride", window)?,
    )?;
    model.insert(node)
}
