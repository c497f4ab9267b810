use wren_core::error::{Error, Result};
use wren_core::functions::{self, element, for_each};
use wren_core::{EmitterContext, MemoryLayout, Scalar, Value, Vector};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

use super::activation::sigmoid;
use super::softmax::softmax;

// RegionDetection — Decode per-anchor box predictions
//
// The input is [rows, cols, anchors · (5 + classes)]. Each anchor occupies a
// run of channels laid out as
//
//     [ x  y  w  h  confidence  class_0 .. class_{n-1} ]
//
// and is decoded in place on a copy of the input:
//
//     x, y, confidence ← sigmoid
//     w, h             ← exp
//     classes          ← softmax over the run

#[derive(Debug, Clone)]
pub struct RegionDetection {
    base: NodeBase,
    anchors: usize,
    classes: usize,
}

impl RegionDetection {
    pub const KIND: &'static str = "region_detection";

    pub fn new(model: &Model, input: PortRef, anchors: usize, classes: usize) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let sizes = source.layout().logical_sizes();
        if sizes.len() != 3 {
            return Err(Error::RankMismatch {
                expected: 3,
                got: sizes.len(),
            });
        }
        if anchors == 0 || sizes[2] != anchors * (5 + classes) {
            return Err(Error::invalid_argument(format!(
                "{} channels cannot hold {} anchors of {} classes",
                sizes[2], anchors, classes
            )));
        }
        let out = super::output("output", source.dtype(), &sizes);
        Ok(RegionDetection {
            base: NodeBase::new(vec![source], vec![out]),
            anchors,
            classes,
        })
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let output = super::bound(outputs, 0, Self::KIND)?;
        functions::assign(ctx, output, super::bound(inputs, 0, Self::KIND)?)?;
        let layout = output.layout()?.clone();
        if layout.logical_increment(2)? != 1 {
            return Err(Error::invalid_argument(
                "region detection needs contiguous channels",
            ));
        }
        let sizes = layout.logical_sizes();
        let cells = MemoryLayout::new(&sizes[..2]);
        let stride = 5 + self.classes;
        for_each(ctx, &cells, |ctx, cell| {
            for a in 0..self.anchors {
                let base = a * stride;
                let at = |ctx: &mut C, k: usize| {
                    element(ctx, output, &[cell[0].clone(), cell[1].clone(), Scalar::from(base + k)])
                };
                for k in [0, 1, 4] {
                    let e = at(ctx, k)?;
                    let s = sigmoid(ctx, &e)?;
                    e.assign(ctx, &s)?;
                }
                for k in [2, 3] {
                    let e = at(ctx, k)?;
                    let s = e.exp(ctx)?;
                    e.assign(ctx, &s)?;
                }
                if self.classes > 0 {
                    let first = ctx.offset(
                        output,
                        &[cell[0].clone(), cell[1].clone(), Scalar::from(base + 5)],
                    )?;
                    let run = Vector::new(first.with_layout(MemoryLayout::new(&[self.classes]))?)?;
                    softmax(ctx, &run, &run)?;
                }
            }
            Ok(())
        })
    }
}

impl Node for RegionDetection {
    crate::node_common!(RegionDetection::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("anchors", self.anchors)?
            .with("classes", self.classes)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = RegionDetection::new(model, args.input(0)?, args.get("anchors")?, args.get("classes")?)?;
    model.insert(node)
}
