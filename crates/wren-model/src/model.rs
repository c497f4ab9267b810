use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, trace};

use wren_core::error::{Error, Result};
use wren_core::{ComputeContext, EmitterContext, Value};
use wren_emit::IrContext;

use crate::archive::{BufferRecord, EdgeRecord, ModelArchive, NodeRecord};
use crate::args::NodeArgs;
use crate::node::Node;
use crate::port::{NodeId, OutputPort, PortRef};
use crate::registry::NodeRegistry;
use crate::transformer::{ModelTransformer, PortMap};

/// Values bound to output ports during one evaluation.
pub type PortValues = HashMap<PortRef, Value>;

/// Host values handed to source nodes (nodes without input ports).
pub type Feeds = HashMap<NodeId, Value>;

// Model — A dataflow graph of nodes
//
// Nodes are kept in insertion order, and a node may only reference output
// ports of nodes added before it, so insertion order is a topological order
// and `NodeId` is simply the position.
//
// Evaluation walks the nodes in that order once. For every node it binds one
// value per input port (the upstream output's value), asks the context for
// fresh memory for each output port, and runs the node. A node without input
// ports receives its feed, if one was provided, as its only input.

pub struct Model {
    registry: Arc<NodeRegistry>,
    nodes: Vec<Box<dyn Node>>,
}

impl Model {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Model {
            registry,
            nodes: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &dyn Node> {
        self.nodes.iter().map(|n| n.as_ref())
    }

    pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
        self.nodes.get(id.0).map(|n| n.as_ref())
    }

    /// The node at `id` as its concrete type.
    pub fn node_as<T: Node + 'static>(&self, id: NodeId) -> Result<&T> {
        let node = self
            .node(id)
            .ok_or_else(|| Error::invalid_argument(format!("no node {}", id)))?;
        node.as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| Error::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                got: node.kind().to_string(),
            })
    }

    /// The output port `port` refers to; invalid-argument when absent.
    pub fn output_port(&self, port: PortRef) -> Result<&OutputPort> {
        let node = self.node(port.node).ok_or_else(|| {
            Error::invalid_argument(format!("port {} refers to a missing node", port))
        })?;
        node.base().outputs().get(port.output).ok_or_else(|| {
            Error::invalid_argument(format!(
                "node {} ({}) has no output {}",
                port.node,
                node.kind(),
                port.output
            ))
        })
    }

    /// Create a node by kind name through the registry.
    pub fn add(&mut self, kind: &str, args: &NodeArgs) -> Result<NodeId> {
        let creator = self.registry.get(kind)?;
        creator(self, args)
    }

    pub fn insert<N: Node + 'static>(&mut self, node: N) -> Result<NodeId> {
        self.add_node(Box::new(node))
    }

    /// Validate the node's inputs against the graph and append it.
    pub fn add_node(&mut self, mut node: Box<dyn Node>) -> Result<NodeId> {
        for input in node.base().inputs() {
            let source = self.output_port(input.source())?;
            if source.dtype() != input.dtype() {
                return Err(Error::dtype_mismatch(source.dtype(), input.dtype()));
            }
            let (have, want) = (source.layout().logical_sizes(), input.layout().logical_sizes());
            if have != want {
                return Err(Error::SizeMismatch {
                    expected: want,
                    got: have,
                });
            }
        }
        let id = NodeId(self.nodes.len());
        node.base_mut().id = id;
        debug!(
            "model: added {} node {} with {} inputs",
            node.kind(),
            id,
            node.base().inputs().len()
        );
        self.nodes.push(node);
        Ok(id)
    }

    pub fn has_state(&self) -> bool {
        self.nodes.iter().any(|n| n.has_state())
    }

    pub fn reset(&mut self) -> Result<()> {
        for n in self.nodes.iter_mut().filter(|n| n.has_state()) {
            n.reset()?;
        }
        Ok(())
    }

    fn bind_inputs(&self, node: &dyn Node, values: &PortValues, feeds: &Feeds) -> Result<Vec<Value>> {
        let inputs = node.base().inputs();
        if inputs.is_empty() {
            return Ok(feeds.get(&node.base().id()).cloned().into_iter().collect());
        }
        inputs
            .iter()
            .map(|p| {
                values.get(&p.source()).cloned().ok_or_else(|| {
                    Error::invalid_argument(format!("port {} has no value", p.source()))
                })
            })
            .collect()
    }

    fn allocate_outputs<C: EmitterContext>(ctx: &mut C, node: &dyn Node) -> Result<Vec<Value>> {
        node.base()
            .outputs()
            .iter()
            .map(|o| ctx.allocate(o.dtype(), o.layout().clone()))
            .collect()
    }

    fn record(node: &dyn Node, outputs: Vec<Value>, values: &mut PortValues) {
        for (i, v) in outputs.into_iter().enumerate() {
            values.insert(node.base().output_ref(i), v);
        }
    }

    /// Run every node once on the host.
    pub fn compute(&self, ctx: &mut ComputeContext, feeds: &Feeds) -> Result<PortValues> {
        let mut values = PortValues::new();
        for node in self.nodes() {
            let inputs = self.bind_inputs(node, &values, feeds)?;
            let outputs = Self::allocate_outputs(ctx, node)?;
            trace!("compute {} {}", node.kind(), node.base().id());
            node.compute(ctx, &inputs, &outputs)?;
            Self::record(node, outputs, &mut values);
        }
        Ok(values)
    }

    /// Emit every node once into the function behind `ctx`.
    pub fn compile(&self, ctx: &mut IrContext<'_>, feeds: &Feeds) -> Result<PortValues> {
        let mut values = PortValues::new();
        for node in self.nodes() {
            let inputs = self.bind_inputs(node, &values, feeds)?;
            let outputs = Self::allocate_outputs(ctx, node)?;
            debug!("compile {} {}", node.kind(), node.base().id());
            node.compile(ctx, &inputs, &outputs)?;
            Self::record(node, outputs, &mut values);
        }
        Ok(values)
    }

    /// Equivalent model with higher-level nodes expanded, together with the
    /// mapping from this model's ports to the refined model's ports.
    pub fn refine(&self, max_iterations: usize) -> Result<(Model, PortMap)> {
        ModelTransformer::refine_model(self, max_iterations)
    }

    //  Archive

    pub fn to_archive(&self) -> Result<ModelArchive> {
        let mut archive = ModelArchive::new();
        for node in self.nodes() {
            let id = node.base().id();
            for (i, input) in node.base().inputs().iter().enumerate() {
                archive.edges.push(EdgeRecord {
                    target: id,
                    input: i,
                    source: input.source(),
                });
            }
            archive.nodes.push(NodeRecord {
                id,
                kind: node.kind().to_string(),
                fields: node.write_fields()?,
                state: node.write_state()?.iter().map(BufferRecord::from_storage).collect(),
            });
        }
        Ok(archive)
    }

    /// Rebuild a model through `registry`. Returns the model and the
    /// mapping from archived node ids to new ones.
    pub fn from_archive(
        registry: Arc<NodeRegistry>,
        archive: &ModelArchive,
    ) -> Result<(Model, HashMap<NodeId, NodeId>)> {
        archive.check_version()?;
        let mut model = Model::new(registry);
        let mut ids: HashMap<NodeId, NodeId> = HashMap::new();
        for record in &archive.nodes {
            let mut edges: Vec<&EdgeRecord> =
                archive.edges.iter().filter(|e| e.target == record.id).collect();
            edges.sort_by_key(|e| e.input);
            let inputs = edges
                .iter()
                .map(|e| {
                    let node = ids.get(&e.source.node).copied().ok_or_else(|| {
                        Error::Archive(format!(
                            "node {} reads from {} which is not defined before it",
                            record.id, e.source
                        ))
                    })?;
                    Ok(PortRef::new(node, e.source.output))
                })
                .collect::<Result<Vec<_>>>()?;
            let mut args = record.fields.clone();
            args.set(NodeArgs::INPUTS, &inputs)?;
            let id = model.add(&record.kind, &args)?;
            if !record.state.is_empty() {
                let buffers = record
                    .state
                    .iter()
                    .map(BufferRecord::to_storage)
                    .collect::<Result<Vec<_>>>()?;
                model.nodes[id.0].read_state(&buffers)?;
            }
            ids.insert(record.id, id);
        }
        debug!("model: read {} nodes from archive", model.len());
        Ok((model, ids))
    }

    pub fn to_json(&self) -> Result<String> {
        self.to_archive()?.to_json()
    }

    pub fn from_json(registry: Arc<NodeRegistry>, json: &str) -> Result<Model> {
        let archive = ModelArchive::from_json(json)?;
        Ok(Model::from_archive(registry, &archive)?.0)
    }
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Model {
            registry: Arc::clone(&self.registry),
            nodes: self.nodes.clone(),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Activation, ActivationFunction, Input};
    use wren_core::{DType, MemoryLayout};

    fn registry() -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::with_standard_nodes())
    }

    #[test]
    fn test_absent_port_rejected() {
        let mut model = Model::new(registry());
        let input = model.insert(Input::new(DType::F32, &[3])).unwrap();
        let r = Activation::new(&model, PortRef::new(input, 1), ActivationFunction::Relu);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
        let r = Activation::new(&model, PortRef::new(NodeId(9), 0), ActivationFunction::Relu);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_add_by_kind() {
        let mut model = Model::new(registry());
        let input = model.insert(Input::new(DType::F32, &[3])).unwrap();
        let args = NodeArgs::new()
            .with("function", ActivationFunction::Relu)
            .unwrap()
            .with_inputs(&[PortRef::new(input, 0)])
            .unwrap();
        let id = model.add("activation", &args).unwrap();
        assert_eq!(model.node(id).unwrap().kind(), "activation");
        assert!(matches!(
            model.add("no-such-node", &args),
            Err(Error::UnknownNodeKind(_))
        ));
    }

    #[test]
    fn test_node_as() {
        let mut model = Model::new(registry());
        let input = model.insert(Input::new(DType::F32, &[3])).unwrap();
        assert!(model.node_as::<Input>(input).is_ok());
        assert!(matches!(
            model.node_as::<Activation>(input),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_compute_feeds_input() {
        let mut model = Model::new(registry());
        let input = model.insert(Input::new(DType::F32, &[3])).unwrap();
        let relu = model
            .insert(Activation::new(&model, PortRef::new(input, 0), ActivationFunction::Relu).unwrap())
            .unwrap();
        let feed = Value::from_f64(DType::F32, &[-1.0, 0.5, 2.0], MemoryLayout::new(&[3])).unwrap();
        let feeds = Feeds::from([(input, feed)]);
        let values = model.compute(&mut ComputeContext::new(), &feeds).unwrap();
        let out = values[&PortRef::new(relu, 0)].to_f64_vec().unwrap();
        assert_eq!(out, vec![0.0, 0.5, 2.0]);
    }
}
