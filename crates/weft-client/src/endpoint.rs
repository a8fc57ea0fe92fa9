//! Compute endpoint (RC) — one compute node's presence in the fabric.
//!
//! `spawn` binds the node's configured address and starts the background
//! listener; the listener and the caller share nothing but a bounded
//! hand-off queue. `recv` is the only suspension point in the public
//! contract, and shutdown unblocks it with a defined cancellation signal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use weft_core::wire::{self, FrameKind, Receipt, RejectReason, WireError};
use weft_core::{AppConfig, Pack, UnknownNodeError, ValidationError};

use crate::assemble::Assembler;

/// Depth of the listener → consumer hand-off queue.
const INBOX_DEPTH: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Registry(#[from] UnknownNodeError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("pack failed validation: {0}")]
    Invalid(#[from] ValidationError),

    #[error("pack source {source:?} does not match this endpoint {node:?}")]
    WrongSource { source: String, node: String },

    #[error("no router serves {0:?}")]
    NoServingRouter(String),

    #[error("first hop {0:?} has no registry entry")]
    UnregisteredRouter(String),

    #[error("first hop {router:?} refused the pack: {reason:?}: {detail}")]
    Rejected {
        router: String,
        reason: RejectReason,
        detail: String,
    },

    #[error("failed to reach first hop {router:?}: {source}")]
    Transport { router: String, source: WireError },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The endpoint's scope closed while a receive was pending.
    #[error("receive canceled by endpoint shutdown")]
    Canceled,
}

/// Clonable shutdown trigger for a running endpoint, usable from any task.
#[derive(Clone)]
pub struct ShutdownHandle(broadcast::Sender<()>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(());
    }
}

/// A running RC endpoint.
///
/// Dropping the value (or calling `shutdown`) stops the listener and
/// releases the socket on every exit path.
pub struct Endpoint {
    node_id: String,
    app: Arc<AppConfig>,
    local_addr: SocketAddr,
    inbox: mpsc::Receiver<Pack>,
    assembler: Assembler,
    shutdown: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    listener_task: Option<JoinHandle<()>>,
}

impl Endpoint {
    pub async fn spawn(app: AppConfig) -> Result<Self, EndpointError> {
        let addr = app.nodes.resolve(&app.node_id)?.to_string();
        let listener = TcpListener::bind(&addr).await.map_err(|source| {
            EndpointError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| EndpointError::Bind { addr, source })?;

        let (inbox_tx, inbox) = mpsc::channel(INBOX_DEPTH);
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let app = Arc::new(app);

        tracing::info!(node = %app.node_id, addr = %local_addr, "endpoint listening");

        let listener_task = tokio::spawn(accept_loop(
            listener,
            app.clone(),
            inbox_tx,
            shutdown.subscribe(),
        ));

        Ok(Self {
            node_id: app.node_id.clone(),
            app,
            local_addr,
            inbox,
            assembler: Assembler::new(),
            shutdown,
            shutdown_rx,
            listener_task: Some(listener_task),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Hand one pack to the fabric.
    ///
    /// Returns once the first-hop router has accepted it; from there
    /// delivery is best-effort relay. Each call is an independent,
    /// fully-formed exchange, safe to issue concurrently.
    pub async fn send(&self, pack: &Pack) -> Result<(), SendError> {
        pack.validate(&self.app.nodes)?;
        if pack.source_id != self.node_id {
            return Err(SendError::WrongSource {
                source: pack.source_id.clone(),
                node: self.node_id.clone(),
            });
        }

        // First hop comes from the table snapshot the pack carries.
        let router = pack
            .router_table
            .first_hop(&pack.source_id)
            .map_err(|_| SendError::NoServingRouter(pack.source_id.clone()))?
            .to_string();
        let addr = self
            .app
            .nodes
            .resolve(&router)
            .map_err(|_| SendError::UnregisteredRouter(router.clone()))?;

        match wire::post(addr, pack).await {
            Ok(Receipt::Accepted) => {
                tracing::debug!(
                    node = %self.node_id,
                    router = %router,
                    uid = %pack.uid,
                    "pack accepted by first hop"
                );
                Ok(())
            }
            Ok(Receipt::Rejected { reason, detail }) => Err(SendError::Rejected {
                router,
                reason,
                detail,
            }),
            Err(source) => Err(SendError::Transport { router, source }),
        }
    }

    /// Wait for one complete logical transfer addressed to this endpoint.
    ///
    /// Returns all `n_batches` sibling packs of a `(task_id, data_id)`
    /// group in arrival order; a single-batch transfer completes on first
    /// arrival. Shutdown unblocks a pending call with `Canceled`.
    pub async fn recv(&mut self) -> Result<Vec<Pack>, RecvError> {
        loop {
            if let Some(group) = self.assembler.pop_complete() {
                return Ok(group);
            }
            let Self {
                inbox,
                shutdown_rx,
                assembler,
                ..
            } = self;
            tokio::select! {
                maybe = inbox.recv() => match maybe {
                    Some(pack) => assembler.insert(pack),
                    None => return Err(RecvError::Canceled),
                },

                _ = shutdown_rx.recv() => return Err(RecvError::Canceled),
            }
        }
    }

    /// Stop the listener and release the socket. Terminal.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(task) = self.listener_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    app: Arc<AppConfig>,
    inbox: mpsc::Sender<Pack>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(node = %app.node_id, "endpoint listener shutting down");
                return;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let app = app.clone();
                        let inbox = inbox.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_conn(stream, app, inbox).await {
                                tracing::warn!(error = %e, %peer, "inbound connection failed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

/// One inbound connection from a serving router: pack frames until EOF,
/// each answered on the same connection.
async fn handle_conn(
    mut stream: TcpStream,
    app: Arc<AppConfig>,
    inbox: mpsc::Sender<Pack>,
) -> Result<(), WireError> {
    while let Some((kind, body)) = wire::read_frame(&mut stream).await? {
        if kind != FrameKind::Pack {
            tracing::warn!(node = %app.node_id, ?kind, "unexpected frame, closing");
            return Ok(());
        }
        let pack = match wire::decode_pack(&body) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(node = %app.node_id, error = %e, "undecodable pack, refusing");
                let receipt = Receipt::Rejected {
                    reason: RejectReason::Malformed,
                    detail: e.to_string(),
                };
                wire::write_receipt(&mut stream, &receipt).await?;
                return Ok(());
            }
        };

        let uid = pack.uid.clone();
        let receipt = if pack.target_id != app.node_id {
            tracing::warn!(
                node = %app.node_id,
                target = %pack.target_id,
                uid = %uid,
                "pack for another node, refusing"
            );
            Receipt::Rejected {
                reason: RejectReason::WrongNode,
                detail: format!("this endpoint is {:?}", app.node_id),
            }
        } else if inbox.send(pack).await.is_err() {
            Receipt::Rejected {
                reason: RejectReason::Backpressure,
                detail: "endpoint shutting down".to_string(),
            }
        } else {
            tracing::debug!(node = %app.node_id, uid = %uid, "pack received");
            Receipt::Accepted
        };
        wire::write_receipt(&mut stream, &receipt).await?;
    }
    Ok(())
}
