//! TCP server side of the transport.
//!
//! Listens on the configured address, accepts connections and serves every
//! call opened on them with a `Service`.
//!
//! # Concurrency
//!
//! Each connection gets a reader loop and a single writer task. Each call on
//! a connection runs its handler on its own task and is wired to the
//! connection by a pair of bridge tasks, so a slow call never blocks the
//! frames of another call except through the shared socket.

use super::bridge::{pump_in, pump_out, Routes};
use super::protocol::{read_frame, write_frame, Frame};
use crate::call::{self, CallId, CallShape, Side};
use crate::cancel::Deadline;
use crate::config::{ServerConfig, TransportConfig};
use crate::error::Result;
use crate::service::{reject_call, resolve, spawn_call, Service};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running server. Dropping shuts down the server.
pub struct RpcServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and close the active ones.
    ///
    /// Calls still running on a closed connection fail with a transport
    /// error on the client side.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Server that serves calls over TCP.
pub struct RpcServer;

impl RpcServer {
    /// Bind and start serving in background tasks.
    pub async fn start<S: Service + ?Sized>(
        service: Arc<S>,
        config: &ServerConfig,
    ) -> Result<RpcServerHandle> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("RPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            service,
            config.max_connections,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(RpcServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<S: Service + ?Sized>(
        listener: TcpListener,
        service: Arc<S>,
        max_connections: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("RPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= max_connections {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr, max_connections
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let service = service.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, service, &mut conn_shutdown).await {
                                    debug!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<S: Service + ?Sized>(
        stream: TcpStream,
        service: Arc<S>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Frame>(TransportConfig::OUTBOUND_QUEUE);

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let bytes = match frame.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Dropping unencodable {} frame: {}", frame.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &bytes).await {
                    debug!("Connection writer stopped: {}", e);
                    break;
                }
            }
        });

        let routes = Routes::default();
        let result = loop {
            let bytes = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break Ok(()), // Clean disconnect
                    Err(e) => break Err(e),
                },
                _ = shutdown_rx.changed() => break Ok(()),
            };

            let frame = match Frame::decode(&bytes) {
                Ok(frame) => frame,
                Err(e) => break Err(e),
            };

            match frame {
                Frame::Open {
                    call_id,
                    method,
                    shape,
                    timeout_ms,
                } => Self::open_call(&service, &routes, &outbound, call_id, &method, shape, timeout_ms),
                frame => routes.deliver(frame),
            }
        };

        if routes.len() > 0 {
            debug!("Connection closed with {} calls in flight", routes.len());
        }
        routes.clear();
        writer_task.abort();
        result
    }

    fn open_call<S: Service + ?Sized>(
        service: &Arc<S>,
        routes: &Routes,
        outbound: &mpsc::Sender<Frame>,
        id: CallId,
        method: &str,
        shape: CallShape,
        timeout_ms: Option<u64>,
    ) {
        let deadline = Deadline::from_timeout(timeout_ms.map(Duration::from_millis));
        let (remote, local) = call::open_with_id(id, method, shape, deadline);
        let Some(inbound) = routes.register(&remote.context) else {
            warn!("Ignoring open of call {}: id already in use", id);
            return;
        };

        tokio::spawn(pump_out(id, Side::Server, remote.responses, outbound.clone()));
        tokio::spawn(pump_in(remote.requests, inbound));

        match resolve(&**service, method, shape) {
            Ok(_) => spawn_call(service.clone(), local),
            Err(e) => reject_call(local, e),
        }
    }
}
