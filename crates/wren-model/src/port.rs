use std::fmt;

use serde::{Deserialize, Serialize};

use wren_core::{DType, MemoryLayout};

/// Position of a node in its model. Nodes are stored in insertion order,
/// which is also a topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Id carried by a node that has not been added to a model yet.
    pub const UNASSIGNED: NodeId = NodeId(usize::MAX);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Reference to output port `output` of node `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub output: usize,
}

impl PortRef {
    pub fn new(node: NodeId, output: usize) -> Self {
        PortRef { node, output }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.output)
    }
}

/// A named, typed output with a fixed layout.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPort {
    name: String,
    dtype: DType,
    layout: MemoryLayout,
}

impl OutputPort {
    pub fn new(name: impl Into<String>, dtype: DType, layout: MemoryLayout) -> Self {
        OutputPort {
            name: name.into(),
            dtype,
            layout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn size(&self) -> usize {
        self.layout.num_elements()
    }
}

/// A named input bound to exactly one upstream output port. The type and
/// layout are copied from the source when the port is created.
#[derive(Debug, Clone, PartialEq)]
pub struct InputPort {
    name: String,
    source: PortRef,
    dtype: DType,
    layout: MemoryLayout,
}

impl InputPort {
    pub fn new(name: impl Into<String>, source: PortRef, from: &OutputPort) -> Self {
        InputPort {
            name: name.into(),
            source,
            dtype: from.dtype(),
            layout: from.layout().clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> PortRef {
        self.source
    }

    pub fn set_source(&mut self, source: PortRef) {
        self.source = source;
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn size(&self) -> usize {
        self.layout.num_elements()
    }
}
