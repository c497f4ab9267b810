use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use wren_core::error::{Error, Result};

use crate::model::Model;
use crate::node::Node;
use crate::port::{NodeId, PortRef};
use crate::registry::NodeRegistry;

/// Old output port → port in the transformed model.
pub type PortMap = HashMap<PortRef, PortRef>;

// ModelTransformer — Rebuilds a model node by node
//
// The transformer owns the target model being built and a map from each
// output port of the source model to the port that now carries the same
// data. Nodes are visited in the source's topological order, so by the time
// a node is copied every port it reads from is already mapped.
//
// A straight copy maps outputs one to one. A refining node adds several
// simpler nodes instead and maps its own outputs onto theirs with
// `map_output`.

pub struct ModelTransformer {
    target: Model,
    port_map: PortMap,
}

impl ModelTransformer {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        ModelTransformer {
            target: Model::new(registry),
            port_map: PortMap::new(),
        }
    }

    /// The model being built.
    pub fn target(&self) -> &Model {
        &self.target
    }

    /// Where the data of source port `old` lives in the target model.
    pub fn corresponding_port(&self, old: PortRef) -> Result<PortRef> {
        self.port_map.get(&old).copied().ok_or_else(|| {
            Error::invalid_argument(format!("port {} has no counterpart in the new model", old))
        })
    }

    /// Add a freshly built node to the target model.
    pub fn add_node<N: Node + 'static>(&mut self, node: N) -> Result<NodeId> {
        self.target.insert(node)
    }

    pub fn map_output(&mut self, old: PortRef, new: PortRef) {
        self.port_map.insert(old, new);
    }

    /// Append a clone of a source node, with its inputs re-pointed at the
    /// corresponding target ports and its outputs mapped one to one.
    pub fn copy_node(&mut self, mut node: Box<dyn Node>) -> Result<NodeId> {
        let old_id = node.base().id();
        for input in node.base_mut().inputs_mut() {
            let source = self.corresponding_port(input.source())?;
            input.set_source(source);
        }
        let outputs = node.base().outputs().len();
        let new_id = self.target.add_node(node)?;
        for i in 0..outputs {
            self.map_output(PortRef::new(old_id, i), PortRef::new(new_id, i));
        }
        Ok(new_id)
    }

    fn finish(self) -> (Model, PortMap) {
        (self.target, self.port_map)
    }

    /// Node-for-node copy of `model`.
    pub fn copy_model(model: &Model) -> Result<(Model, PortMap)> {
        let mut t = ModelTransformer::new(Arc::clone(model.registry()));
        for node in model.nodes() {
            node.copy(&mut t)?;
        }
        Ok(t.finish())
    }

    /// One refinement pass; reports whether any node expanded.
    fn refine_once(model: &Model) -> Result<(Model, PortMap, bool)> {
        let mut t = ModelTransformer::new(Arc::clone(model.registry()));
        let mut changed = false;
        for node in model.nodes() {
            changed |= node.refine(&mut t)?;
        }
        let (m, map) = t.finish();
        Ok((m, map, changed))
    }

    /// Refine until no node expands, or `max_iterations` passes ran. The
    /// returned map takes ports of `model` to ports of the result.
    pub fn refine_model(model: &Model, max_iterations: usize) -> Result<(Model, PortMap)> {
        let (mut current, mut map) = ModelTransformer::copy_model(model)?;
        for pass in 0..max_iterations {
            let (next, step, changed) = ModelTransformer::refine_once(&current)?;
            debug!(
                "refine pass {}: {} nodes → {} nodes",
                pass,
                current.len(),
                next.len()
            );
            for port in map.values_mut() {
                let old = *port;
                *port = step
                    .get(&old)
                    .copied()
                    .ok_or_else(|| Error::msg(format!("refinement dropped port {}", old)))?;
            }
            current = next;
            if !changed {
                break;
            }
        }
        Ok((current, map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Activation, ActivationFunction, DenseLayer, Input};
    use wren_core::DType;

    fn registry() -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::with_standard_nodes())
    }

    #[test]
    fn test_copy_maps_ports() {
        let mut model = Model::new(registry());
        let input = model.insert(Input::new(DType::F32, &[2])).unwrap();
        let relu = model
            .insert(Activation::new(&model, PortRef::new(input, 0), ActivationFunction::Relu).unwrap())
            .unwrap();
        let (copy, map) = ModelTransformer::copy_model(&model).unwrap();
        assert_eq!(copy.len(), 2);
        assert_eq!(map[&PortRef::new(relu, 0)], PortRef::new(NodeId(1), 0));
    }

    #[test]
    fn test_refine_is_idempotent() {
        let mut model = Model::new(registry());
        let input = model.insert(Input::new(DType::F32, &[2])).unwrap();
        let dense = DenseLayer::new(
            &model,
            PortRef::new(input, 0),
            3,
            vec![0.1; 6],
            vec![0.0; 3],
            ActivationFunction::Tanh,
        )
        .unwrap();
        model.insert(dense).unwrap();
        let (once, _) = model.refine(4).unwrap();
        let kinds: Vec<_> = once.nodes().map(|n| n.kind()).collect();
        assert_eq!(kinds, ["input", "fully_connected", "bias", "activation"]);
        let (twice, _) = once.refine(4).unwrap();
        let again: Vec<_> = twice.nodes().map(|n| n.kind()).collect();
        assert_eq!(kinds, again);
    }
}
