//! Bounded per-destination buffer for packs whose endpoint has not
//! connected yet.
//!
//! Exceeding the bound is backpressure: the newest pack is refused and
//! earlier ones are preserved, so the buffer never grows without limit.

use std::collections::VecDeque;

use dashmap::DashMap;
use weft_core::Pack;

/// The pending buffer is full for this destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferFull;

pub(crate) struct PendingBuffer {
    queues: DashMap<String, VecDeque<Pack>>,
    capacity: usize,
}

impl PendingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity,
        }
    }

    /// Queue a pack for its target, FIFO per destination.
    pub(crate) fn push(&self, pack: Pack) -> Result<(), BufferFull> {
        let mut queue = self.queues.entry(pack.target_id.clone()).or_default();
        if queue.len() >= self.capacity {
            return Err(BufferFull);
        }
        queue.push_back(pack);
        Ok(())
    }

    /// Destinations that currently have queued packs.
    pub(crate) fn destinations(&self) -> Vec<String> {
        self.queues
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// The oldest queued pack for a destination, left in place.
    pub(crate) fn front(&self, destination: &str) -> Option<Pack> {
        self.queues
            .get(destination)
            .and_then(|queue| queue.front().cloned())
    }

    /// Drop the oldest queued pack for a destination.
    pub(crate) fn pop(&self, destination: &str) {
        if let Some(mut queue) = self.queues.get_mut(destination) {
            queue.pop_front();
        }
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self, destination: &str) -> usize {
        self.queues.get(destination).map_or(0, |queue| queue.len())
    }
}
