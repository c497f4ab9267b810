use std::any::Any;
use std::fmt;

use wren_core::error::Result;
use wren_core::{ComputeContext, Storage, Value};
use wren_emit::IrContext;

use crate::args::NodeArgs;
use crate::port::{InputPort, NodeId, OutputPort, PortRef};
use crate::transformer::ModelTransformer;

// Node — One operation of the dataflow graph
//
// A node owns its ports and whatever parameters it was built with. It runs
// under two strategies that receive the same calls:
//
//   compute(ComputeContext, ...) — reference execution on host memory
//   compile(IrContext, ...)      — the same sequence recorded as IR
//
// Concrete nodes write their math once as a private generic
// `emit<C: EmitterContext>` and forward both entry points to it with
// `dual_emit!()`. The model hands a node one value per input port (bound to
// the upstream output) and one value per output port (fresh memory from the
// context) in port order.
//
// Nodes with state keep it in host Values and obtain the working copy
// through `EmitterContext::state`, so the interpreter updates the node's own
// memory while compiled code updates a global seeded from it.
//
// Graph rewriting goes through the ModelTransformer: `copy` clones the node
// into the transformer's target model, and `refine` may instead expand it
// into simpler nodes. Returning `false` from `refine` means the node was
// copied unchanged.

/// Ports and identity shared by every node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBase {
    pub(crate) id: NodeId,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
}

impl NodeBase {
    pub fn new(inputs: Vec<InputPort>, outputs: Vec<OutputPort>) -> Self {
        NodeBase {
            id: NodeId::UNASSIGNED,
            inputs,
            outputs,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn inputs_mut(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    /// Reference to this node's output `index`.
    pub fn output_ref(&self, index: usize) -> PortRef {
        PortRef::new(self.id, index)
    }
}

pub trait Node: Send + Sync + fmt::Debug {
    /// Registry name of the node type.
    fn kind(&self) -> &'static str;

    fn base(&self) -> &NodeBase;

    fn base_mut(&mut self) -> &mut NodeBase;

    fn compute(&self, ctx: &mut ComputeContext, inputs: &[Value], outputs: &[Value]) -> Result<()>;

    fn compile(&self, ctx: &mut IrContext<'_>, inputs: &[Value], outputs: &[Value]) -> Result<()>;

    fn has_state(&self) -> bool {
        false
    }

    /// Restore the initial (zero) state.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Deep copy; state is duplicated, parameters may be shared.
    fn box_clone(&self) -> Box<dyn Node>;

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<()> {
        transformer.copy_node(self.box_clone()).map(|_| ())
    }

    /// Expand into simpler nodes. Returns whether anything was expanded.
    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool> {
        self.copy(transformer)?;
        Ok(false)
    }

    /// Construction fields written to archives. Inputs are recorded
    /// separately as edges.
    fn write_fields(&self) -> Result<NodeArgs>;

    /// State buffers in their own element types; empty for stateless nodes.
    fn write_state(&self) -> Result<Vec<Storage>> {
        Ok(Vec::new())
    }

    fn read_state(&mut self, _buffers: &[Storage]) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Node> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Forwards `compute` and `compile` to the node's generic `emit`.
#[macro_export]
macro_rules! dual_emit {
    () => {
        fn compute(
            &self,
            ctx: &mut ::wren_core::ComputeContext,
            inputs: &[::wren_core::Value],
            outputs: &[::wren_core::Value],
        ) -> ::wren_core::Result<()> {
            self.emit(ctx, inputs, outputs)
        }

        fn compile(
            &self,
            ctx: &mut ::wren_emit::IrContext<'_>,
            inputs: &[::wren_core::Value],
            outputs: &[::wren_core::Value],
        ) -> ::wren_core::Result<()> {
            self.emit(ctx, inputs, outputs)
        }
    };
}

/// The boilerplate accessors every node implements the same way.
#[macro_export]
macro_rules! node_common {
    ($kind:expr) => {
        fn kind(&self) -> &'static str {
            $kind
        }

        fn base(&self) -> &$crate::node::NodeBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut $crate::node::NodeBase {
            &mut self.base
        }

        fn box_clone(&self) -> Box<dyn $crate::node::Node> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }
    };
}
