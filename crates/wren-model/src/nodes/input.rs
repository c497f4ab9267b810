use wren_core::error::{Error, Result};
use wren_core::{functions, DType, EmitterContext, Value};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::NodeId;

/// Source node: copies the data the caller feeds it.
#[derive(Debug, Clone)]
pub struct Input {
    base: NodeBase,
    dtype: DType,
    shape: Vec<usize>,
}

impl Input {
    pub const KIND: &'static str = "input";

    pub fn new(dtype: DType, shape: &[usize]) -> Self {
        Input {
            base: NodeBase::new(vec![], vec![super::output("output", dtype, shape)]),
            dtype,
            shape: shape.to_vec(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let feed = inputs.first().ok_or_else(|| {
            Error::invalid_argument(format!("input node {} was not fed", self.base.id()))
        })?;
        functions::assign(ctx, super::bound(outputs, 0, Self::KIND)?, feed)
    }
}

impl Node for Input {
    crate::node_common!(Input::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("dtype", self.dtype)?
            .with("shape", &self.shape)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = Input::new(args.get("dtype")?, &args.get::<Vec<usize>>("shape")?);
    model.insert(node)
}
