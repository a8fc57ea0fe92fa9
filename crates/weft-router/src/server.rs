//! Router node (RS) — listens on its configured address, admits inbound
//! packs, and hands them to the relay or delivery workers.
//!
//! Lifecycle: STARTING (validate, bind) → LISTENING → per connection
//! ACCEPTING → FORWARDING/DELIVERING → LISTENING; STOPPED on shutdown.
//! The router never retries a relayed pack itself; a failed forward is
//! reported at the point of failure, never silently dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;

use weft_core::route::Hop;
use weft_core::wire::{self, FrameKind, Receipt, RejectReason, WireError};
use weft_core::{AppConfig, Pack, RouterTable, UnknownNodeError};

use crate::buffer::PendingBuffer;
use crate::forward;

/// Startup binding for one router node.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub app: AppConfig,
    pub table: RouterTable,
}

/// Operational knobs. The defaults fit small fabrics.
#[derive(Debug, Clone)]
pub struct RouterTuning {
    /// Max buffered packs per not-yet-connected destination.
    pub pending_capacity: usize,

    /// Depth of the relay queue toward adjacent routers.
    pub forward_depth: usize,

    /// How often buffered packs are retried against their endpoints.
    pub flush_interval: Duration,
}

impl Default for RouterTuning {
    fn default() -> Self {
        Self {
            pending_capacity: 128,
            forward_depth: 1024,
            flush_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("node {0:?} is not a router in the routing table")]
    NotARouter(String),

    #[error("router {0:?} in the routing table has no registry entry")]
    UnregisteredRouter(String),

    #[error(transparent)]
    Registry(#[from] UnknownNodeError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

pub(crate) struct RouterState {
    pub(crate) node_id: String,
    pub(crate) app: AppConfig,
    pub(crate) table: RouterTable,
    pub(crate) pending: PendingBuffer,
    pub(crate) forward_tx: mpsc::Sender<(String, Pack)>,
    pub(crate) wake_delivery: Notify,
}

/// A running RS node.
///
/// `shutdown` (or dropping the value) stops the listener and both workers
/// and releases the socket.
pub struct Router {
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Router {
    pub async fn spawn(config: RouterConfig) -> Result<Self, RouterError> {
        Self::spawn_with(config, RouterTuning::default()).await
    }

    pub async fn spawn_with(
        config: RouterConfig,
        tuning: RouterTuning,
    ) -> Result<Self, RouterError> {
        let RouterConfig { app, table } = config;

        // Fail fast on topology/registry drift, before any socket exists.
        if !table.contains_router(&app.node_id) {
            return Err(RouterError::NotARouter(app.node_id));
        }
        for router in table.routers() {
            if !app.nodes.contains(router) {
                return Err(RouterError::UnregisteredRouter(router.to_string()));
            }
        }

        let addr = app.nodes.resolve(&app.node_id)?.to_string();
        let listener = TcpListener::bind(&addr).await.map_err(|source| {
            RouterError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RouterError::Bind { addr, source })?;

        let (forward_tx, forward_rx) = mpsc::channel(tuning.forward_depth);
        let (shutdown, _) = broadcast::channel(1);
        let state = Arc::new(RouterState {
            node_id: app.node_id.clone(),
            table,
            pending: PendingBuffer::new(tuning.pending_capacity),
            forward_tx,
            wake_delivery: Notify::new(),
            app,
        });

        tracing::info!(node = %state.node_id, addr = %local_addr, "router listening");

        let tasks = vec![
            tokio::spawn(accept_loop(listener, state.clone(), shutdown.subscribe())),
            tokio::spawn(forward::forward_loop(
                state.clone(),
                forward_rx,
                shutdown.subscribe(),
            )),
            tokio::spawn(forward::delivery_loop(
                state,
                tuning.flush_interval,
                shutdown.subscribe(),
            )),
        ];

        Ok(Self {
            local_addr,
            shutdown,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the listener and workers. Terminal.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<RouterState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(node = %state.node_id, "router listener shutting down");
                return;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_conn(stream, state).await {
                                tracing::warn!(error = %e, %peer, "connection handler failed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

/// One inbound connection: pack frames until EOF, each answered with a
/// receipt on the same connection.
async fn handle_conn(mut stream: TcpStream, state: Arc<RouterState>) -> Result<(), WireError> {
    while let Some((kind, body)) = wire::read_frame(&mut stream).await? {
        if kind != FrameKind::Pack {
            tracing::warn!(node = %state.node_id, ?kind, "unexpected frame, closing");
            return Ok(());
        }
        let pack = match wire::decode_pack(&body) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(node = %state.node_id, error = %e, "undecodable pack, refusing");
                let receipt = Receipt::Rejected {
                    reason: RejectReason::Malformed,
                    detail: e.to_string(),
                };
                wire::write_receipt(&mut stream, &receipt).await?;
                return Ok(());
            }
        };
        let receipt = admit(&state, pack).await;
        wire::write_receipt(&mut stream, &receipt).await?;
    }
    Ok(())
}

/// Decide what happens to one pack: local delivery queue, relay queue, or
/// rejection. The receipt goes back to whichever hop sent the pack.
pub(crate) async fn admit(state: &RouterState, pack: Pack) -> Receipt {
    if !state.app.nodes.contains(&pack.target_id) {
        return Receipt::Rejected {
            reason: RejectReason::UnknownNode,
            detail: format!("target {:?} is not registered", pack.target_id),
        };
    }

    match state.table.next_hop(&state.node_id, &pack.target_id) {
        Ok(Hop::Deliver(endpoint)) => {
            tracing::debug!(
                node = %state.node_id,
                target = %endpoint,
                uid = %pack.uid,
                "queueing local delivery"
            );
            if state.pending.push(pack).is_err() {
                return Receipt::Rejected {
                    reason: RejectReason::Backpressure,
                    detail: format!("pending buffer for {endpoint:?} is full"),
                };
            }
            state.wake_delivery.notify_one();
            Receipt::Accepted
        }

        Ok(Hop::Forward(next)) => {
            tracing::debug!(
                node = %state.node_id,
                next = %next,
                uid = %pack.uid,
                "queueing relay"
            );
            if state.forward_tx.send((next, pack)).await.is_err() {
                return Receipt::Rejected {
                    reason: RejectReason::Backpressure,
                    detail: "relay queue closed".to_string(),
                };
            }
            Receipt::Accepted
        }

        Err(e) => Receipt::Rejected {
            reason: RejectReason::Unreachable,
            detail: e.to_string(),
        },
    }
}
