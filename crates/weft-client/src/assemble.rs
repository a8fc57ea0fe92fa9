//! Batch reassembly — groups sibling packs until a transfer is complete.
//!
//! Ids are unique within a task's lifetime, so groups key on
//! `(task_id, data_id)`. A group completes once `n_batches` distinct
//! siblings have arrived; completed groups are handed out in the order
//! they completed.

use std::collections::{HashMap, HashSet, VecDeque};

use weft_core::Pack;

#[derive(Default)]
pub(crate) struct Assembler {
    open: HashMap<(String, String), Group>,
    complete: VecDeque<Vec<Pack>>,
}

#[derive(Default)]
struct Group {
    packs: Vec<Pack>,
    seen_uids: HashSet<String>,
}

impl Assembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record one arrival. Duplicate uids within a group are dropped, so a
    /// transfer is never returned with more than `n_batches` packs.
    pub(crate) fn insert(&mut self, pack: Pack) {
        let key = (pack.task_id.clone(), pack.data_id.clone());
        let group = self.open.entry(key.clone()).or_default();

        if !group.seen_uids.insert(pack.uid.clone()) {
            tracing::debug!(
                task = %pack.task_id,
                data = %pack.data_id,
                uid = %pack.uid,
                "duplicate pack, dropping"
            );
            return;
        }

        // The first sibling fixes the expected count for the group.
        let expected = group
            .packs
            .first()
            .map(|p| p.n_batches)
            .unwrap_or(pack.n_batches);
        if pack.n_batches != expected {
            tracing::warn!(
                task = %pack.task_id,
                data = %pack.data_id,
                uid = %pack.uid,
                expected,
                got = pack.n_batches,
                "sibling disagrees on batch count, keeping the first"
            );
        }

        group.packs.push(pack);
        if group.packs.len() as u32 >= expected {
            if let Some(done) = self.open.remove(&key) {
                self.complete.push_back(done.packs);
            }
        }
    }

    /// Next fully assembled transfer, in completion order. The packs are
    /// in arrival order.
    pub(crate) fn pop_complete(&mut self) -> Option<Vec<Pack>> {
        self.complete.pop_front()
    }
}
