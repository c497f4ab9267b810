use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use wren_core::error::{Error, Result};

use crate::port::PortRef;

/// Named construction arguments of a node.
///
/// This is both what registry creators receive and what a node writes to an
/// archive. Fields are kept as a JSON object, so readers simply skip what
/// they do not know. The upstream ports live under `inputs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeArgs(Map<String, JsonValue>);

impl NodeArgs {
    pub const INPUTS: &'static str = "inputs";

    pub fn new() -> Self {
        NodeArgs::default()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let v = serde_json::to_value(value)
            .map_err(|e| Error::Archive(format!("field '{}': {}", key, e)))?;
        self.0.insert(key.to_string(), v);
        Ok(())
    }

    /// Builder form of [`NodeArgs::set`].
    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Result<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let v = self
            .0
            .get(key)
            .ok_or_else(|| Error::Archive(format!("missing field '{}'", key)))?;
        T::deserialize(v).map_err(|e| Error::Archive(format!("field '{}': {}", key, e)))
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        if self.contains(key) {
            self.get(key)
        } else {
            Ok(default)
        }
    }

    pub fn inputs(&self) -> Result<Vec<PortRef>> {
        self.get_or(Self::INPUTS, Vec::new())
    }

    /// Upstream port `index`; invalid-argument when it was not given.
    pub fn input(&self, index: usize) -> Result<PortRef> {
        self.inputs()?.get(index).copied().ok_or_else(|| {
            Error::invalid_argument(format!("node arguments are missing input {}", index))
        })
    }

    pub fn with_inputs(self, inputs: &[PortRef]) -> Result<Self> {
        self.with(Self::INPUTS, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::NodeId;

    #[test]
    fn test_typed_access() {
        let args = NodeArgs::new()
            .with("epsilon", 1e-5)
            .unwrap()
            .with("shape", vec![2usize, 3])
            .unwrap()
            .with_inputs(&[PortRef::new(NodeId(0), 0)])
            .unwrap();
        assert_eq!(args.get::<f64>("epsilon").unwrap(), 1e-5);
        assert_eq!(args.get::<Vec<usize>>("shape").unwrap(), vec![2, 3]);
        assert_eq!(args.input(0).unwrap(), PortRef::new(NodeId(0), 0));
        assert!(matches!(args.input(1), Err(Error::InvalidArgument(_))));
        assert!(matches!(args.get::<f64>("missing"), Err(Error::Archive(_))));
        assert_eq!(args.get_or("missing", 7usize).unwrap(), 7);
    }
}
