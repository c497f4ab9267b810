use log::debug;

use wren_core::buffer::shift_and_update;
use wren_core::error::{Error, Result};
use wren_core::{functions, DType, EmitterContext, MemoryLayout, Storage, Value, Vector};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

/// Outputs the input it received `window_size` steps ago (zeros until
/// then). The last `window_size` inputs are kept as state.
#[derive(Debug)]
pub struct Delay {
    base: NodeBase,
    window_size: usize,
    dtype: DType,
    state: Value,
}

impl Delay {
    pub const KIND: &'static str = "delay";

    pub fn new(model: &Model, input: PortRef, window_size: usize) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        if window_size == 0 {
            return Err(Error::invalid_argument("delay window must be at least 1"));
        }
        let dtype = source.dtype();
        let n = source.size();
        let out = super::output("output", dtype, &source.layout().logical_sizes());
        Ok(Delay {
            base: NodeBase::new(vec![source], vec![out]),
            window_size,
            dtype,
            state: Value::allocate(dtype, MemoryLayout::new(&[window_size * n])),
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let buffer = Vector::new(ctx.state("delay", &self.state)?)?;
        let input = Vector::new(functions::flatten(super::bound(inputs, 0, Self::KIND)?)?)?;
        let output = Vector::new(functions::flatten(super::bound(outputs, 0, Self::KIND)?)?)?;
        shift_and_update(ctx, &buffer, &input, Some(&output))
    }
}

impl Clone for Delay {
    fn clone(&self) -> Self {
        Delay {
            base: self.base.clone(),
            window_size: self.window_size,
            dtype: self.dtype,
            state: self.state.duplicate(),
        }
    }
}

impl Node for Delay {
    crate::node_common!(Delay::KIND);
    crate::dual_emit!();

    fn has_state(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        debug!("reset delay {}", self.base.id());
        self.state.fill_zero()
    }

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new().with("window_size", self.window_size)
    }

    fn write_state(&self) -> Result<Vec<Storage>> {
        Ok(vec![self.state.to_storage()?])
    }

    fn read_state(&mut self, buffers: &[Storage]) -> Result<()> {
        super::restore_state(Self::KIND, &[&self.state], buffers)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = Delay::new(model, args.input(0)?, args.get("window_size")?)?;
    model.insert(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Feeds;
    use crate::nodes::Input;
    use crate::registry::NodeRegistry;
    use std::sync::Arc;
    use wren_core::ComputeContext;

    #[test]
    fn test_delays_by_window() {
        let mut model = Model::new(Arc::new(NodeRegistry::with_standard_nodes()));
        let input = model.insert(Input::new(DType::F32, &[1])).unwrap();
        let delay = model
            .insert(Delay::new(&model, PortRef::new(input, 0), 2).unwrap())
            .unwrap();
        let mut ctx = ComputeContext::new();
        let mut seen = Vec::new();
        for step in 1..=4 {
            let feed = Value::from_slice(&[step as f32]);
            let values = model.compute(&mut ctx, &Feeds::from([(input, feed)])).unwrap();
            seen.push(values[&PortRef::new(delay, 0)].to_vec::<f32>().unwrap()[0]);
        }
        assert_eq!(seen, vec![0.0, 0.0, 1.0, 2.0]);

        model.reset().unwrap();
        let feed = Value::from_slice(&[9.0f32]);
        let values = model.compute(&mut ctx, &Feeds::from([(input, feed)])).unwrap();
        assert_eq!(values[&PortRef::new(delay, 0)].to_vec::<f32>().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_clone_duplicates_state() {
        let mut model = Model::new(Arc::new(NodeRegistry::with_standard_nodes()));
        let input = model.insert(Input::new(DType::F64, &[1])).unwrap();
        let delay = Delay::new(&model, PortRef::new(input, 0), 1).unwrap();
        let copy = delay.clone();
        delay.state.set_flat(0, wren_core::Literal::F64(5.0)).unwrap();
        assert_eq!(copy.write_state().unwrap(), vec![Storage::F64(vec![0.0])]);
    }
}
