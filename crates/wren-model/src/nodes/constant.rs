use wren_core::error::{Error, Result};
use wren_core::{functions, DType, EmitterContext, MemoryLayout, Storage, Value};

use crate::archive::BufferRecord;
use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::NodeId;

/// Source node holding fixed values.
#[derive(Debug, Clone)]
pub struct Constant {
    base: NodeBase,
    shape: Vec<usize>,
    dtype: DType,
    data: Value,
}

impl Constant {
    pub const KIND: &'static str = "constant";

    /// Values given as f64 are converted to `dtype`.
    pub fn new(dtype: DType, values: Vec<f64>, shape: &[usize]) -> Result<Self> {
        super::check_len("constant values", &values, shape.iter().product())?;
        Constant::from_storage(Storage::from_f64(dtype, &values), shape)
    }

    /// Takes the elements as they are, in their own type.
    pub fn from_storage(values: Storage, shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(Error::SizeMismatch {
                expected: shape.to_vec(),
                got: vec![values.len()],
            });
        }
        let dtype = values.dtype();
        let data = Value::from_storage(values, MemoryLayout::new(shape))?;
        Ok(Constant {
            base: NodeBase::new(vec![], vec![super::output("output", dtype, shape)]),
            shape: shape.to_vec(),
            dtype,
            data,
        })
    }

    pub fn values(&self) -> Result<Storage> {
        self.data.to_storage()
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, _inputs: &[Value], outputs: &[Value]) -> Result<()> {
        functions::assign(ctx, super::bound(outputs, 0, Self::KIND)?, &self.data)
    }
}

impl Node for Constant {
    crate::node_common!(Constant::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("shape", &self.shape)?
            .with("values", BufferRecord::from_storage(&self.values()?))
    }
}

/// `values` is a typed buffer record, or a plain list of numbers converted
/// to `dtype`.
pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let shape: Vec<usize> = args.get("shape")?;
    let node = match args.get::<BufferRecord>("values") {
        Ok(record) => Constant::from_storage(record.to_storage()?, &shape)?,
        Err(_) => Constant::new(args.get("dtype")?, args.get("values")?, &shape)?,
    };
    model.insert(node)
}
