use wren_core::error::{Error, Result};
use wren_core::functions::{element, for_each};
use wren_core::{BinaryOp, EmitterContext, Scalar, Value};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{InputPort, NodeId, PortRef};

// Per-channel affine nodes
//
// Bias adds and Scaling multiplies one parameter per channel, where the
// channel is the last logical dimension of the input:
//
//     output[.., c] = input[.., c] op param[c]

#[derive(Debug, Clone)]
struct ChannelOp {
    base: NodeBase,
    values: Vec<f64>,
    param: Value,
}

impl ChannelOp {
    fn new(model: &Model, input: PortRef, values: Vec<f64>, kind: &str) -> Result<Self> {
        let source: InputPort = super::input_from(model, "input", input)?;
        super::require_float(kind, source.dtype())?;
        let n = super::channels(source.layout());
        super::check_len(kind, &values, n)?;
        let param = super::parameter(source.dtype(), &values, &[n])?;
        let out = super::output("output", source.dtype(), &source.layout().logical_sizes());
        Ok(ChannelOp {
            base: NodeBase::new(vec![source], vec![out]),
            values,
            param,
        })
    }

    fn emit<C: EmitterContext>(
        &self,
        ctx: &mut C,
        inputs: &[Value],
        outputs: &[Value],
        op: BinaryOp,
    ) -> Result<()> {
        let input = inputs
            .first()
            .ok_or_else(|| Error::invalid_argument("channel node is missing its input"))?;
        let output = outputs
            .first()
            .ok_or_else(|| Error::invalid_argument("channel node is missing its output"))?;
        let layout = output.layout()?.clone();
        for_each(ctx, &layout, |ctx, idx| {
            let c = idx.last().cloned().unwrap_or_else(|| Scalar::from(0usize));
            let p = element(ctx, &self.param, &[c])?;
            let x = element(ctx, input, idx)?;
            let y = x.binary(ctx, op, &p)?;
            element(ctx, output, idx)?.assign(ctx, &y)
        })
    }
}

/// `output[.., c] = input[.., c] + bias[c]`.
#[derive(Debug, Clone)]
pub struct Bias {
    inner: ChannelOp,
}

impl Bias {
    pub const KIND: &'static str = "bias";

    pub fn new(model: &Model, input: PortRef, bias: Vec<f64>) -> Result<Self> {
        Ok(Bias {
            inner: ChannelOp::new(model, input, bias, Self::KIND)?,
        })
    }

    pub fn bias(&self) -> &[f64] {
        &self.inner.values
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        self.inner.emit(ctx, inputs, outputs, BinaryOp::Add)
    }
}

/// `output[.., c] = input[.., c] × scale[c]`.
#[derive(Debug, Clone)]
pub struct Scaling {
    inner: ChannelOp,
}

impl Scaling {
    pub const KIND: &'static str = "scaling";

    pub fn new(model: &Model, input: PortRef, scale: Vec<f64>) -> Result<Self> {
        Ok(Scaling {
            inner: ChannelOp::new(model, input, scale, Self::KIND)?,
        })
    }

    pub fn scale(&self) -> &[f64] {
        &self.inner.values
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        self.inner.emit(ctx, inputs, outputs, BinaryOp::Mul)
    }
}

macro_rules! channel_node {
    ($ty:ident, $field:literal) => {
        impl Node for $ty {
            crate::dual_emit!();

            fn kind(&self) -> &'static str {
                $ty::KIND
            }

            fn base(&self) -> &NodeBase {
                &self.inner.base
            }

            fn base_mut(&mut self) -> &mut NodeBase {
                &mut self.inner.base
            }

            fn box_clone(&self) -> Box<dyn Node> {
                Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn write_fields(&self) -> Result<NodeArgs> {
                NodeArgs::new().with($field, &self.inner.values)
            }
        }
    };
}

channel_node!(Bias, "bias");
channel_node!(Scaling, "scale");

pub(crate) fn create_bias(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = Bias::new(model, args.input(0)?, args.get("bias")?)?;
    model.insert(node)
}

pub(crate) fn create_scaling(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = Scaling::new(model, args.input(0)?, args.get("scale")?)?;
    model.insert(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Feeds;
    use crate::nodes::Input;
    use crate::registry::NodeRegistry;
    use std::sync::Arc;
    use wren_core::{ComputeContext, DType, MemoryLayout};

    #[test]
    fn test_bias_per_channel() {
        let mut model = Model::new(Arc::new(NodeRegistry::with_standard_nodes()));
        let input = model.insert(Input::new(DType::F64, &[2, 3])).unwrap();
        let bias = model
            .insert(Bias::new(&model, PortRef::new(input, 0), vec![1.0, 2.0, 3.0]).unwrap())
            .unwrap();
        let feed = Value::from_f64(DType::F64, &[0.0; 6], MemoryLayout::new(&[2, 3])).unwrap();
        let values = model
            .compute(&mut ComputeContext::new(), &Feeds::from([(input, feed)]))
            .unwrap();
        assert_eq!(
            values[&PortRef::new(bias, 0)].to_f64_vec().unwrap(),
            vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_wrong_channel_count() {
        let mut model = Model::new(Arc::new(NodeRegistry::with_standard_nodes()));
        let input = model.insert(Input::new(DType::F32, &[4])).unwrap();
        let r = Scaling::new(&model, PortRef::new(input, 0), vec![1.0, 2.0]);
        assert!(matches!(r, Err(Error::SizeMismatch { .. })));
    }
}
