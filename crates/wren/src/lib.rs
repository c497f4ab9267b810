//! # Wren
//!
//! Trained predictive models as a dataflow graph of nodes, run either on a
//! host interpreter or compiled into an optimized instruction module.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use wren::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `wren-core` | DType, Literal, MemoryLayout, Value, EmitterContext, Scalar/Vector/Matrix, buffer helpers |
//! | `wren-emit` | Instruction IR, function/module/loop emitters, optimizer, executor, `IrContext` |
//! | `wren-model` | Node graph, registry, transformer, Map, MapCompiler, archives, node catalog |
//!
//! A node writes its math once, generically over [`EmitterContext`]. The
//! host [`ComputeContext`] evaluates it immediately; [`emit::IrContext`]
//! records the same calls as IR that the [`MapCompiler`] optimizes and
//! loads into an [`emit::Engine`].

/// Re-export core types.
pub use wren_core::{
    BinaryOp, CmpOp, ComputeContext, DType, EmitterContext, Error, Literal, Matrix, MemoryLayout, Result,
    Scalar, Storage, UnaryOp, Value, Vector,
};

/// Re-export bulk helpers and generic element functions.
pub use wren_core::{buffer, functions};

/// Re-export the model layer.
pub use wren_model::{
    CompiledMap, CompilerOptions, Feeds, Map, MapCompiler, Model, ModelTransformer, Node, NodeArgs,
    NodeId, NodeRegistry, PortRef, PortSpec, PortValues, WorkerPool,
};

/// Re-export the node catalog.
pub mod nodes {
    pub use wren_model::nodes::*;
}

/// Re-export archives and graph dumps.
pub mod archive {
    pub use wren_model::archive::*;
    pub use wren_model::dump::{to_dot, to_text};
}

/// Re-export the instruction IR, optimizer and executor.
pub mod emit {
    pub use wren_emit::*;
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nodes::{
        Activation, ActivationFunction, BatchNormalization, BinaryOperation, Bias, Constant, Convolution,
        Delay, DenseLayer, EpsilonSummand, FullyConnected, Input, Lstm, LstmWeights, Pooling, PoolingKind,
        RegionDetection, Scaling, Softmax,
    };
    pub use crate::{
        BinaryOp, CompiledMap, CompilerOptions, ComputeContext, DType, EmitterContext, Map, MemoryLayout,
        Model, NodeArgs, NodeId, NodeRegistry, PortRef, Result, Scalar, Value, Vector, WorkerPool,
    };
}
