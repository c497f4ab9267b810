use wren_core::error::{Error, Result};
use wren_core::{functions, BinaryOp, EmitterContext, Value};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

/// `output = a op b`, elementwise over inputs of equal size and type.
#[derive(Debug, Clone)]
pub struct BinaryOperation {
    base: NodeBase,
    op: BinaryOp,
}

impl BinaryOperation {
    pub const KIND: &'static str = "binary_operation";

    pub fn new(model: &Model, a: PortRef, b: PortRef, op: BinaryOp) -> Result<Self> {
        let a = super::input_from(model, "input1", a)?;
        let b = super::input_from(model, "input2", b)?;
        if a.dtype() != b.dtype() {
            return Err(Error::dtype_mismatch(a.dtype(), b.dtype()));
        }
        let sizes = a.layout().logical_sizes();
        if sizes != b.layout().logical_sizes() {
            return Err(Error::SizeMismatch {
                expected: sizes,
                got: b.layout().logical_sizes(),
            });
        }
        let out = super::output("output", a.dtype(), &sizes);
        Ok(BinaryOperation {
            base: NodeBase::new(vec![a, b], vec![out]),
            op,
        })
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let out = super::bound(outputs, 0, Self::KIND)?;
        functions::assign(ctx, out, super::bound(inputs, 0, Self::KIND)?)?;
        functions::elementwise(ctx, out, super::bound(inputs, 1, Self::KIND)?, self.op)
    }
}

impl Node for BinaryOperation {
    crate::node_common!(BinaryOperation::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new().with("operation", self.op)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = BinaryOperation::new(model, args.input(0)?, args.input(1)?, args.get("operation")?)?;
    model.insert(node)
}
