//! Pack — one unit of routed data plus its metadata.
//!
//! A pack is immutable once built: every hop reads it, no hop rewrites it.
//! `encryption`, `process`, `data`, and `key` are opaque to the fabric —
//! routing moves them, endpoints interpret them.

use serde::{Deserialize, Serialize};

use crate::registry::NodeRegistry;
use crate::route::RouterTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pack {
    /// Logical job this transfer belongs to.
    pub task_id: String,

    /// Logical transfer id. Sibling packs of one batched transfer share it.
    pub data_id: String,

    /// Id of this pack, unique within the task's lifetime.
    pub uid: String,

    pub source_id: String,
    pub target_id: String,

    /// Payload representation tag ("ss", "he", ...). Passed through; the
    /// routing core never branches on it.
    pub encryption: String,

    /// Conversion pipeline tag ("ss2he", "he2ss", ...). Passed through.
    pub process: String,

    /// Dimensions to reinterpret `data` with after delivery.
    pub shape: Vec<usize>,
    pub dtype: String,

    /// Flattened fixed-point buffer.
    pub data: Vec<i64>,

    /// Optional key material accompanying the payload.
    pub key: Option<Vec<u8>>,

    /// Total sibling packs in this transfer. The receiver holds the group
    /// until all of them have arrived.
    pub n_batches: u32,

    /// The sender's routing-table snapshot, used for first-hop selection
    /// and destination-side bookkeeping. Relays forward from their own
    /// configured table, not from this copy.
    pub router_table: RouterTable,
}

/// Rejected at construction — a pack that fails validation is never sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("source node {0:?} is not in the node registry")]
    UnknownSource(String),

    #[error("target node {0:?} is not in the node registry")]
    UnknownTarget(String),

    #[error("n_batches must be at least 1, got {0}")]
    BatchCount(u32),
}

impl Pack {
    /// Check a pack against the node registry the sender resolved at
    /// construction time.
    pub fn validate(&self, nodes: &NodeRegistry) -> Result<(), ValidationError> {
        if !nodes.contains(&self.source_id) {
            return Err(ValidationError::UnknownSource(self.source_id.clone()));
        }
        if !nodes.contains(&self.target_id) {
            return Err(ValidationError::UnknownTarget(self.target_id.clone()));
        }
        if self.n_batches < 1 {
            return Err(ValidationError::BatchCount(self.n_batches));
        }
        Ok(())
    }

    /// Validate a freshly built pack, consuming and returning it so
    /// construction and validation read as one expression.
    pub fn validated(self, nodes: &NodeRegistry) -> Result<Self, ValidationError> {
        self.validate(nodes)?;
        Ok(self)
    }
}
