use wren_core::error::Result;
use wren_core::functions::{element, for_each};
use wren_core::{functions, EmitterContext, Matrix, Value, Vector};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};
use crate::transformer::ModelTransformer;

use super::{Activation, ActivationFunction, Bias, FullyConnected};

/// `output = activation(W × flatten(input) + bias)`.
///
/// Refines into FullyConnected → Bias → Activation.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    base: NodeBase,
    units: usize,
    weights: Vec<f64>,
    bias: Vec<f64>,
    activation: ActivationFunction,
    matrix: Matrix,
    bias_param: Vector,
}

impl DenseLayer {
    pub const KIND: &'static str = "dense_layer";

    pub fn new(
        model: &Model,
        input: PortRef,
        units: usize,
        weights: Vec<f64>,
        bias: Vec<f64>,
        activation: ActivationFunction,
    ) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let n = source.size();
        super::check_len("weights", &weights, units * n)?;
        super::check_len("bias", &bias, units)?;
        let dtype = source.dtype();
        let matrix = Matrix::from_rows(dtype, units, n, &weights)?;
        let bias_param = Vector::new(super::parameter(dtype, &bias, &[units])?)?;
        Ok(DenseLayer {
            base: NodeBase::new(vec![source], vec![super::output("output", dtype, &[units])]),
            units,
            weights,
            bias,
            activation,
            matrix,
            bias_param,
        })
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let x = Vector::new(functions::flatten(super::bound(inputs, 0, Self::KIND)?)?)?;
        let output = super::bound(outputs, 0, Self::KIND)?;
        let y = Vector::new(output.clone())?;
        self.matrix.gemv(ctx, &x, &y)?;
        y.add_assign(ctx, &self.bias_param)?;
        let layout = output.layout()?.clone();
        for_each(ctx, &layout, |ctx, idx| {
            let e = element(ctx, output, idx)?;
            let a = self.activation.apply(ctx, &e)?;
            e.assign(ctx, &a)
        })
    }
}

impl Node for DenseLayer {
    crate::node_common!(DenseLayer::KIND);
    crate::dual_emit!();

    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool> {
        let source = transformer.corresponding_port(self.base.inputs()[0].source())?;
        let fc = FullyConnected::new(transformer.target(), source, self.units, self.weights.clone())?;
        let fc = transformer.add_node(fc)?;
        let bias = Bias::new(transformer.target(), PortRef::new(fc, 0), self.bias.clone())?;
        let bias = transformer.add_node(bias)?;
        let act = Activation::new(transformer.target(), PortRef::new(bias, 0), self.activation)?;
        let act = transformer.add_node(act)?;
        transformer.map_output(self.base.output_ref(0), PortRef::new(act, 0));
        Ok(true)
    }

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("units", self.units)?
            .with("weights", &self.weights)?
            .with("bias", &self.bias)?
            .with("activation", self.activation)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = DenseLayer::new(
        model,
        args.input(0)?,
        args.get("units")?,
        args.get("weights")?,
        args.get("bias")?,
        args.get("activation")?,
    )?;
    model.insert(node)
}
