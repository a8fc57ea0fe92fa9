//! Relay and delivery workers.
//!
//! One forward worker relays packs to adjacent routers, one delivery
//! worker drains the pending buffer toward local endpoints. Each is a
//! single task, so packs leave a router in the order they were admitted
//! and FIFO per source/destination pair holds along a path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use weft_core::wire::{self, Receipt, WireError};
use weft_core::Pack;

use crate::server::RouterState;

pub(crate) async fn forward_loop(
    state: Arc<RouterState>,
    mut forward_rx: mpsc::Receiver<(String, Pack)>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(node = %state.node_id, "forward worker shutting down");
                return;
            }

            msg = forward_rx.recv() => {
                let (next, pack) = match msg {
                    Some(m) => m,
                    None => return,
                };
                relay(&state, &next, pack).await;
            }
        }
    }
}

/// One relay attempt. Never retried here; the outcome is observable at
/// this hop either way.
async fn relay(state: &RouterState, next: &str, pack: Pack) {
    let addr = match state.app.nodes.resolve(next) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(
                node = %state.node_id,
                uid = %pack.uid,
                error = %e,
                "relay target has no address, pack dropped"
            );
            return;
        }
    };
    match wire::post(addr, &pack).await {
        Ok(Receipt::Accepted) => {
            tracing::debug!(node = %state.node_id, next, uid = %pack.uid, "pack relayed");
        }
        Ok(Receipt::Rejected { reason, detail }) => {
            tracing::error!(
                node = %state.node_id,
                next,
                uid = %pack.uid,
                ?reason,
                detail,
                "next hop refused pack"
            );
        }
        Err(e) => {
            tracing::error!(
                node = %state.node_id,
                next,
                uid = %pack.uid,
                error = %e,
                "next hop unreachable, pack not delivered"
            );
        }
    }
}

pub(crate) async fn delivery_loop(
    state: Arc<RouterState>,
    flush_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut flush = tokio::time::interval(flush_interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(node = %state.node_id, "delivery worker shutting down");
                return;
            }

            _ = state.wake_delivery.notified() => deliver_pending(&state).await,

            _ = flush.tick() => deliver_pending(&state).await,
        }
    }
}

/// Drain every destination's queue in FIFO order. A destination that is
/// not connected yet keeps its packs for the next flush.
async fn deliver_pending(state: &RouterState) {
    for destination in state.pending.destinations() {
        let addr = match state.app.nodes.resolve(&destination) {
            Ok(a) => a.to_string(),
            Err(e) => {
                // Admission checked the registry, so this is config drift.
                // Drain with an error rather than holding packs forever.
                tracing::error!(
                    node = %state.node_id,
                    target = %destination,
                    error = %e,
                    "destination lost its registry entry, dropping queue"
                );
                while state.pending.front(&destination).is_some() {
                    state.pending.pop(&destination);
                }
                continue;
            }
        };

        while let Some(pack) = state.pending.front(&destination) {
            match wire::post(&addr, &pack).await {
                Ok(Receipt::Accepted) => {
                    state.pending.pop(&destination);
                    tracing::debug!(
                        node = %state.node_id,
                        target = %destination,
                        uid = %pack.uid,
                        "pack delivered"
                    );
                }
                Ok(Receipt::Rejected { reason, detail }) => {
                    state.pending.pop(&destination);
                    tracing::error!(
                        node = %state.node_id,
                        target = %destination,
                        uid = %pack.uid,
                        ?reason,
                        detail,
                        "endpoint refused pack"
                    );
                }
                Err(WireError::Connect { .. }) => {
                    tracing::trace!(
                        node = %state.node_id,
                        target = %destination,
                        "endpoint not connected, holding"
                    );
                    break;
                }
                Err(e) => {
                    state.pending.pop(&destination);
                    tracing::error!(
                        node = %state.node_id,
                        target = %destination,
                        uid = %pack.uid,
                        error = %e,
                        "delivery failed, pack dropped"
                    );
                }
            }
        }
    }
}
