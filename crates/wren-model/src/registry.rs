use std::collections::BTreeMap;

use wren_core::error::{Error, Result};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::port::NodeId;

/// Builds a node of one kind from its arguments and adds it to the model.
pub type NodeCreator = fn(&mut Model, &NodeArgs) -> Result<NodeId>;

/// Kind name → creator.
///
/// A registry is built once and handed to every model that needs to create
/// nodes by name (`Model::add`, archive reading). Nothing is registered
/// implicitly.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    creators: BTreeMap<String, NodeCreator>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Registry holding every node in [`crate::nodes`].
    pub fn with_standard_nodes() -> Self {
        let mut r = NodeRegistry::new();
        crate::nodes::register_standard_nodes(&mut r);
        r
    }

    pub fn register(&mut self, kind: &str, creator: NodeCreator) {
        self.creators.insert(kind.to_string(), creator);
    }

    pub fn get(&self, kind: &str) -> Result<NodeCreator> {
        self.creators
            .get(kind)
            .copied()
            .ok_or_else(|| Error::UnknownNodeKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.creators.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }
}
