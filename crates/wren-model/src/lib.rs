//! # wren-model
//!
//! The dataflow graph that Wren models are made of, and everything that
//! operates on it:
//!
//! 1. **Node / Port**: every node computes on host values and compiles the
//!    same math to IR through one generic `emit`
//! 2. **Model**: nodes in topological order, built through a [`NodeRegistry`]
//! 3. **ModelTransformer**: copy and refine into a new model with a port map
//! 4. **Map**: a model with named inputs and outputs; the unit callers run
//! 5. **MapCompiler**: lowers a map to a `predict` / `predict_reset` module
//!    and runs it on the IR executor
//! 6. **Archive**: JSON documents of node fields, edges and state
//!
//! The standard node catalog lives in [`nodes`].

pub mod archive;
pub mod args;
pub mod compiler;
pub mod dump;
pub mod map;
pub mod model;
pub mod node;
pub mod nodes;
pub mod parallel;
pub mod port;
pub mod registry;
pub mod transformer;

pub use archive::{MapArchive, ModelArchive};
pub use args::NodeArgs;
pub use compiler::{CompiledMap, CompilerOptions, MapCompiler};
pub use map::{Map, PortSpec};
pub use model::{Feeds, Model, PortValues};
pub use node::{Node, NodeBase};
pub use parallel::WorkerPool;
pub use port::{InputPort, NodeId, OutputPort, PortRef};
pub use registry::{NodeCreator, NodeRegistry};
pub use transformer::{ModelTransformer, PortMap};
