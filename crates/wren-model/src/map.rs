use std::sync::Arc;

use log::debug;

use wren_core::error::{Error, Result};
use wren_core::{ComputeContext, DType, MemoryLayout, Value};

use crate::archive::{MapArchive, NamedPort};
use crate::compiler::{CompiledMap, CompilerOptions, MapCompiler};
use crate::model::{Feeds, Model};
use crate::nodes::Input;
use crate::parallel::WorkerPool;
use crate::port::{NodeId, PortRef};
use crate::registry::NodeRegistry;

/// Shape and type of one map endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl PortSpec {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

// Map — A model with named inputs and outputs
//
// Inputs are Input nodes of the model, outputs are output ports. A map is
// the unit callers evaluate: flat f64 vectors in, flat f64 vectors out, in
// the declared order. Stateful nodes advance on every `compute`.

#[derive(Debug, Clone)]
pub struct Map {
    model: Model,
    inputs: Vec<(String, NodeId)>,
    outputs: Vec<(String, PortRef)>,
}

impl Map {
    pub fn new(model: Model, inputs: Vec<(String, NodeId)>, outputs: Vec<(String, PortRef)>) -> Result<Self> {
        for (name, id) in &inputs {
            model.node_as::<Input>(*id).map_err(|_| {
                Error::invalid_argument(format!("map input '{}' ({}) is not an input node", name, id))
            })?;
        }
        for (_, port) in &outputs {
            model.output_port(*port)?;
        }
        Ok(Map {
            model,
            inputs,
            outputs,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn inputs(&self) -> &[(String, NodeId)] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[(String, PortRef)] {
        &self.outputs
    }

    pub fn input_specs(&self) -> Result<Vec<PortSpec>> {
        self.inputs
            .iter()
            .map(|(name, id)| {
                let input = self.model.node_as::<Input>(*id)?;
                Ok(PortSpec {
                    name: name.clone(),
                    dtype: input.dtype(),
                    shape: input.shape().to_vec(),
                })
            })
            .collect()
    }

    pub fn output_specs(&self) -> Result<Vec<PortSpec>> {
        self.outputs
            .iter()
            .map(|(name, port)| {
                let out = self.model.output_port(*port)?;
                Ok(PortSpec {
                    name: name.clone(),
                    dtype: out.dtype(),
                    shape: out.layout().logical_sizes(),
                })
            })
            .collect()
    }

    pub fn has_state(&self) -> bool {
        self.model.has_state()
    }

    fn feeds(&self, data: &[&[f64]]) -> Result<Feeds> {
        if data.len() != self.inputs.len() {
            return Err(Error::invalid_argument(format!(
                "map takes {} inputs, got {}",
                self.inputs.len(),
                data.len()
            )));
        }
        let mut feeds = Feeds::new();
        for (spec, (&values, (_, id))) in self.input_specs()?.iter().zip(data.iter().zip(&self.inputs)) {
            if values.len() != spec.size() {
                return Err(Error::SizeMismatch {
                    expected: spec.shape.clone(),
                    got: vec![values.len()],
                });
            }
            feeds.insert(*id, Value::from_f64(spec.dtype, values, MemoryLayout::new(&spec.shape))?);
        }
        Ok(feeds)
    }

    fn evaluate(&self, data: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        let feeds = self.feeds(data)?;
        let mut ctx = ComputeContext::new();
        let values = self.model.compute(&mut ctx, &feeds)?;
        self.outputs
            .iter()
            .map(|(name, port)| {
                values
                    .get(port)
                    .ok_or_else(|| Error::invalid_argument(format!("output '{}' was not computed", name)))?
                    .to_f64_vec()
            })
            .collect()
    }

    /// One time step on the host interpreter.
    pub fn compute(&mut self, data: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        self.evaluate(data)
    }

    /// Evaluate independent samples on `pool`, preserving order. Only
    /// stateless maps can be evaluated this way.
    pub fn compute_batch(&self, pool: &WorkerPool, batch: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<Vec<f64>>>> {
        if self.has_state() {
            return Err(Error::invalid_argument(
                "batch evaluation requires a stateless map",
            ));
        }
        pool.try_map(batch, |sample| {
            let refs: Vec<&[f64]> = sample.iter().map(Vec::as_slice).collect();
            self.evaluate(&refs)
        })
    }

    pub fn reset(&mut self) -> Result<()> {
        self.model.reset()
    }

    /// Equivalent map over the refined model.
    pub fn refine(&self, max_iterations: usize) -> Result<Map> {
        let (model, ports) = self.model.refine(max_iterations)?;
        let lookup = |port: PortRef| {
            ports
                .get(&port)
                .copied()
                .ok_or_else(|| Error::msg(format!("refinement lost port {}", port)))
        };
        let inputs = self
            .inputs
            .iter()
            .map(|(name, id)| Ok((name.clone(), lookup(PortRef::new(*id, 0))?.node)))
            .collect::<Result<Vec<_>>>()?;
        let outputs = self
            .outputs
            .iter()
            .map(|(name, port)| Ok((name.clone(), lookup(*port)?)))
            .collect::<Result<Vec<_>>>()?;
        debug!("refined map: {} → {} nodes", self.model.len(), model.len());
        Map::new(model, inputs, outputs)
    }

    pub fn compile(&self, options: CompilerOptions) -> Result<CompiledMap> {
        MapCompiler::new(options).compile(self)
    }

    //  Archive

    pub fn to_archive(&self) -> Result<MapArchive> {
        Ok(MapArchive {
            model: self.model.to_archive()?,
            inputs: self
                .inputs
                .iter()
                .map(|(name, id)| NamedPort {
                    name: name.clone(),
                    port: PortRef::new(*id, 0),
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|(name, port)| NamedPort {
                    name: name.clone(),
                    port: *port,
                })
                .collect(),
        })
    }

    pub fn from_archive(registry: Arc<NodeRegistry>, archive: &MapArchive) -> Result<Map> {
        let (model, ids) = Model::from_archive(registry, &archive.model)?;
        let remap = |p: &NamedPort| -> Result<(String, PortRef)> {
            let node = ids.get(&p.port.node).copied().ok_or_else(|| {
                Error::Archive(format!("map endpoint '{}' names unknown node {}", p.name, p.port.node))
            })?;
            Ok((p.name.clone(), PortRef::new(node, p.port.output)))
        };
        let inputs = archive
            .inputs
            .iter()
            .map(|p| remap(p).map(|(name, port)| (name, port.node)))
            .collect::<Result<Vec<_>>>()?;
        let outputs = archive.outputs.iter().map(remap).collect::<Result<Vec<_>>>()?;
        Map::new(model, inputs, outputs)
    }

    pub fn to_json(&self) -> Result<String> {
        self.to_archive()?.to_json()
    }

    pub fn from_json(registry: Arc<NodeRegistry>, json: &str) -> Result<Map> {
        Map::from_archive(registry, &MapArchive::from_json(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Activation, ActivationFunction, Delay};

    fn registry() -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::with_standard_nodes())
    }

    fn relu_map() -> Map {
        let mut model = Model::new(registry());
        let x = model.insert(Input::new(DType::F32, &[3])).unwrap();
        let y = model
            .insert(Activation::new(&model, PortRef::new(x, 0), ActivationFunction::Relu).unwrap())
            .unwrap();
        Map::new(model, vec![("x".into(), x)], vec![("y".into(), PortRef::new(y, 0))]).unwrap()
    }

    #[test]
    fn test_compute_checks_lengths() {
        let mut map = relu_map();
        assert_eq!(map.compute(&[&[-1.0, 2.0, -3.0]]).unwrap(), vec![vec![0.0, 2.0, 0.0]]);
        assert!(matches!(map.compute(&[&[1.0]]), Err(Error::SizeMismatch { .. })));
        assert!(matches!(map.compute(&[]), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_batch_preserves_order() {
        let map = relu_map();
        let pool = WorkerPool::new(2).unwrap();
        let batch: Vec<Vec<Vec<f64>>> = (0..16).map(|i| vec![vec![i as f64, -1.0, 0.5]]).collect();
        let out = map.compute_batch(&pool, &batch).unwrap();
        for (i, o) in out.iter().enumerate() {
            assert_eq!(o[0], vec![i as f64, 0.0, 0.5]);
        }
    }

    #[test]
    fn test_batch_rejects_state() {
        let mut model = Model::new(registry());
        let x = model.insert(Input::new(DType::F32, &[1])).unwrap();
        let d = model.insert(Delay::new(&model, PortRef::new(x, 0), 1).unwrap()).unwrap();
        let map = Map::new(model, vec![("x".into(), x)], vec![("y".into(), PortRef::new(d, 0))]).unwrap();
        let pool = WorkerPool::new(1).unwrap();
        assert!(map.compute_batch(&pool, &[vec![vec![1.0]]]).is_err());
    }

    #[test]
    fn test_input_must_be_input_node() {
        let map = relu_map();
        let model = map.model().clone();
        let r = Map::new(model, vec![("x".into(), NodeId(1))], vec![]);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }
}
