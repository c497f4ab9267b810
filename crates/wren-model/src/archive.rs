use serde::{Deserialize, Serialize};

use wren_core::error::{Error, Result};
use wren_core::{DType, Storage};

use crate::args::NodeArgs;
use crate::port::{NodeId, PortRef};

// Archive — JSON document for models and maps
//
// {
//   "format": "wren-model",
//   "version": 1,
//   "nodes": [ { "id": 0, "kind": "input", "fields": { ... }, "state": [ ... ] }, ... ],
//   "edges": [ { "target": 1, "input": 0, "source": { "node": 0, "output": 0 } }, ... ]
// }
//
// Nodes appear in topological order. Fields are whatever the node wrote;
// readers pick out the ones they know and ignore the rest. Ids in an archive
// only identify nodes within it and are remapped on read.
//
// State buffers (and constant payloads) are stored as their element type
// plus the little-endian image of the elements in hex, so every value of
// every type reads back bit for bit, including infinities and NaN.

pub const FORMAT: &str = "wren-model";
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: String,
    #[serde(default)]
    pub fields: NodeArgs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<BufferRecord>,
}

/// A typed element buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferRecord {
    pub dtype: DType,
    pub data: String,
}

impl BufferRecord {
    pub fn from_storage(storage: &Storage) -> Self {
        BufferRecord {
            dtype: storage.dtype(),
            data: encode_hex(&storage.to_le_bytes()),
        }
    }

    pub fn to_storage(&self) -> Result<Storage> {
        let bytes = decode_hex(&self.data)?;
        let width = self.dtype.size_in_bytes();
        if bytes.len() % width != 0 {
            return Err(Error::Archive(format!(
                "{} bytes do not hold a whole number of {} elements",
                bytes.len(),
                self.dtype
            )));
        }
        Storage::from_le_bytes(self.dtype, &bytes)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(Error::Archive(format!(
            "hex data has odd length {}",
            text.len()
        )));
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    Error::Archive(format!(
                        "invalid hex byte '{}'",
                        String::from_utf8_lossy(pair)
                    ))
                })
        })
        .collect()
}

/// Input `input` of node `target` reads from `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub target: NodeId,
    pub input: usize,
    pub source: PortRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArchive {
    pub format: String,
    pub version: u32,
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

impl ModelArchive {
    pub fn new() -> Self {
        ModelArchive {
            format: FORMAT.to_string(),
            version: VERSION,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn check_version(&self) -> Result<()> {
        if self.format != FORMAT {
            return Err(Error::Archive(format!(
                "expected format '{}', found '{}'",
                FORMAT, self.format
            )));
        }
        if self.version > VERSION {
            return Err(Error::Archive(format!(
                "archive version {} is newer than supported version {}",
                self.version, VERSION
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Archive(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Archive(e.to_string()))
    }
}

impl Default for ModelArchive {
    fn default() -> Self {
        ModelArchive::new()
    }
}

/// A named endpoint of a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPort {
    pub name: String,
    pub port: PortRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapArchive {
    pub model: ModelArchive,
    pub inputs: Vec<NamedPort>,
    pub outputs: Vec<NamedPort>,
}

impl MapArchive {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Archive(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Archive(e.to_string()))
    }
}
