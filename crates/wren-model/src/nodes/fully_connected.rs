use wren_core::error::Result;
use wren_core::{functions, EmitterContext, Matrix, Value, Vector};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

/// `output = W × flatten(input)` with `W` of shape [outputs, inputs].
#[derive(Debug, Clone)]
pub struct FullyConnected {
    base: NodeBase,
    units: usize,
    weights: Vec<f64>,
    matrix: Matrix,
}

impl FullyConnected {
    pub const KIND: &'static str = "fully_connected";

    pub fn new(model: &Model, input: PortRef, units: usize, weights: Vec<f64>) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let n = source.size();
        super::check_len("weights", &weights, units * n)?;
        let matrix = Matrix::from_rows(source.dtype(), units, n, &weights)?;
        let out = super::output("output", source.dtype(), &[units]);
        Ok(FullyConnected {
            base: NodeBase::new(vec![source], vec![out]),
            units,
            weights,
            matrix,
        })
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let x = Vector::new(functions::flatten(super::bound(inputs, 0, Self::KIND)?)?)?;
        let y = Vector::new(super::bound(outputs, 0, Self::KIND)?.clone())?;
        self.matrix.gemv(ctx, &x, &y)
    }
}

impl Node for FullyConnected {
    crate::node_common!(FullyConnected::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("units", self.units)?
            .with("weights", &self.weights)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = FullyConnected::new(model, args.input(0)?, args.get("units")?, args.get("weights")?)?;
    model.insert(node)
}
