//! Node registry — every participant in the fabric and where to dial it.
//!
//! Loaded once at startup, immutable for the process lifetime. Ids are
//! unique; each address must name a single listening endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One fabric participant: a router or a compute endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: String,

    /// Operator-facing role tag ("RS", "RC01", ...). Opaque to routing;
    /// roles are derived from the routing table, not from this field.
    pub tag: String,

    /// host:port the node listens on.
    pub address: String,
}

/// Malformed registry input, rejected at load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate node id {0:?}")]
    DuplicateId(String),

    #[error("node entry with empty id")]
    MissingId,

    #[error("node {id:?} has unusable address {address:?}")]
    BadAddress { id: String, address: String },
}

/// A node id that is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown node: {0}")]
pub struct UnknownNodeError(pub String);

/// Immutable id → entry map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistry {
    entries: BTreeMap<String, NodeEntry>,
}

impl NodeRegistry {
    /// Build a registry, failing fast on any malformed entry.
    pub fn new(nodes: Vec<NodeEntry>) -> Result<Self, RegistryError> {
        let mut entries = BTreeMap::new();
        for entry in nodes {
            if entry.id.is_empty() {
                return Err(RegistryError::MissingId);
            }
            if !address_usable(&entry.address) {
                return Err(RegistryError::BadAddress {
                    id: entry.id,
                    address: entry.address,
                });
            }
            if entries.insert(entry.id.clone(), entry.clone()).is_some() {
                return Err(RegistryError::DuplicateId(entry.id));
            }
        }
        Ok(Self { entries })
    }

    /// The dial/listen address for a node.
    pub fn resolve(&self, node_id: &str) -> Result<&str, UnknownNodeError> {
        self.entries
            .get(node_id)
            .map(|e| e.address.as_str())
            .ok_or_else(|| UnknownNodeError(node_id.to_string()))
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.entries.contains_key(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeEntry> {
        self.entries.get(node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// host:port with a non-empty host and a numeric port.
fn address_usable(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
