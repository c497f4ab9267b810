use wren_core::error::{Error, Result};
use wren_core::functions::{self, element, for_each};
use wren_core::{EmitterContext, Literal, MemoryLayout, Scalar, Value};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

// Convolution — 2-D filter bank over [rows, cols, channels]
//
// Weights are [filters, k, k, channels]. The output is
// [out_rows, out_cols, filters] with out = (in + 2·padding − k) / stride + 1.
//
// The input is first copied into a scratch buffer whose layout carries the
// zero border as padding: the interior view has the input's sizes, the full
// view covers the extents. The filter is then a plain sliding window over
// the full view, so no bounds tests appear in the inner loop.
//
//     out[i, j, f] = Σ_{di, dj, c} full[i·s + di, j·s + dj, c] · w[f, di, dj, c]

#[derive(Debug, Clone)]
pub struct Convolution {
    base: NodeBase,
    filters: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    weights: Vec<f64>,
    weight_param: Value,
    input_sizes: [usize; 3],
}

impl Convolution {
    pub const KIND: &'static str = "convolution";

    pub fn new(
        model: &Model,
        input: PortRef,
        filters: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        weights: Vec<f64>,
    ) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let sizes = source.layout().logical_sizes();
        let [rows, cols, channels] = match sizes[..] {
            [r, c, ch] => [r, c, ch],
            _ => {
                return Err(Error::RankMismatch {
                    expected: 3,
                    got: sizes.len(),
                })
            }
        };
        if kernel == 0 || stride == 0 {
            return Err(Error::invalid_argument("kernel size and stride must be positive"));
        }
        if rows + 2 * padding < kernel || cols + 2 * padding < kernel {
            return Err(Error::invalid_argument(format!(
                "kernel {} does not fit a padded {}x{} input",
                kernel,
                rows + 2 * padding,
                cols + 2 * padding
            )));
        }
        super::check_len("weights", &weights, filters * kernel * kernel * channels)?;
        let weight_param =
            super::parameter(source.dtype(), &weights, &[filters, kernel, kernel, channels])?;
        let out_rows = (rows + 2 * padding - kernel) / stride + 1;
        let out_cols = (cols + 2 * padding - kernel) / stride + 1;
        let out = super::output("output", source.dtype(), &[out_rows, out_cols, filters]);
        Ok(Convolution {
            base: NodeBase::new(vec![source], vec![out]),
            filters,
            kernel,
            stride,
            padding,
            weights,
            weight_param,
            input_sizes: [rows, cols, channels],
        })
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let input = super::bound(inputs, 0, Self::KIND)?;
        let output = super::bound(outputs, 0, Self::KIND)?;
        let [rows, cols, channels] = self.input_sizes;
        let p = self.padding;
        let dtype = input.dtype()?;

        let extents = [rows + 2 * p, cols + 2 * p, channels];
        let interior = MemoryLayout::with_padding(&[rows, cols, channels], &extents, &[p, p, 0])?;
        let padded = ctx.allocate(dtype, interior)?;
        functions::assign(ctx, &padded, input)?;
        let full = padded.with_layout(MemoryLayout::new(&extents))?;

        let window = MemoryLayout::new(&[self.kernel, self.kernel, channels]);
        let stride = Scalar::from(self.stride);
        let out_layout = output.layout()?.clone();
        for_each(ctx, &out_layout, |ctx, o| {
            let (i, j, f) = (&o[0], &o[1], &o[2]);
            let slot = ctx.allocate(dtype, MemoryLayout::scalar())?;
            let acc = Scalar::new(slot)?;
            acc.assign(ctx, &Scalar::constant(Literal::zero(dtype)))?;
            let row0 = i.mul(ctx, &stride)?;
            let col0 = j.mul(ctx, &stride)?;
            for_each(ctx, &window, |ctx, k| {
                let r = row0.add(ctx, &k[0])?;
                let c = col0.add(ctx, &k[1])?;
                let x = element(ctx, &full, &[r, c, k[2].clone()])?;
                let w = element(ctx, &self.weight_param, &[f.clone(), k[0].clone(), k[1].clone(), k[2].clone()])?;
                let xw = x.mul(ctx, &w)?;
                let s = acc.add(ctx, &xw)?;
                acc.assign(ctx, &s)
            })?;
            element(ctx, output, o)?.assign(ctx, &acc)
        })
    }
}

impl Node for Convolution {
    crate::node_common!(Convolution::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("filters", self.filters)?
            .with("kernel_size", self.kernel)?
            .with("stride", self.stride)?
            .with("padding", self.padding)?
            .with("weights", &self.weights)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = Convolution::new(
        model,
        args.input(0)?,
        args.get("filters")?,
        args.get("kernel_size")?,
        args.get_or("stride", 1)?,
        args.get_or("padding", 0)?,
        args.get("weights")?,
    )?;
    model.insert(node)
}
