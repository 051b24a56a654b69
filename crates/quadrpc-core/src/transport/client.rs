//! TCP client side of the transport.
//!
//! A `Connection` multiplexes any number of concurrent calls over one TCP
//! stream. Calls are told apart by a per-connection call id.
//!
//! # Thread Safety
//!
//! All writes go through one writer task fed by an `mpsc` queue, and all
//! reads are routed by one reader task, so a `Connection` can be shared
//! behind an `Arc` by many tasks.

use super::bridge::{pump_in, pump_out, Routes};
use super::protocol::{read_frame, write_frame, Frame};
use super::Transport;
use crate::call::{self, CallId, CallShape, ClientCall, Side};
use crate::cancel::Deadline;
use crate::config::TransportConfig;
use crate::error::{Result, RpcError, StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Client connection to an `RpcServer`.
#[derive(Debug)]
pub struct Connection {
    addr: SocketAddr,
    next_id: AtomicU64,
    outbound: mpsc::Sender<Frame>,
    routes: Routes,
    closed: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Connection {
    /// Connect to a server.
    ///
    /// Uses the connection timeout from `TransportConfig`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::transport(format!("timed out connecting to {}", addr)))?
            .map_err(|e| RpcError::transport(format!("failed to connect to {}: {}", addr, e)))?;

        debug!("Connected to {}", addr);

        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Frame>(TransportConfig::OUTBOUND_QUEUE);
        let routes = Routes::default();
        let closed = Arc::new(AtomicBool::new(false));

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
                    debug!("Connection writer to {} stopped: {}", addr, e);
                    break;
                }
            }
        });

        let reader_task = {
            let routes = routes.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                loop {
                    let bytes = match read_frame(&mut reader).await {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => {
                            debug!("Server {} closed the connection", addr);
                            break;
                        }
                        Err(e) => {
                            debug!("Connection to {} failed: {}", addr, e);
                            break;
                        }
                    };
                    match Frame::decode(&bytes) {
                        Ok(Frame::Open { call_id, .. }) => {
                            warn!("Ignoring open frame for call {} from server", call_id);
                        }
                        Ok(frame) => routes.deliver(frame),
                        Err(e) => {
                            warn!("Malformed frame from {}: {}", addr, e);
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                routes.clear();
            })
        };

        Ok(Self {
            addr,
            next_id: AtomicU64::new(1),
            outbound,
            routes,
            closed,
            reader_task,
            writer_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection has been lost.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lost(&self) -> RpcError {
        RpcError::transport(format!("connection to {} is closed", self.addr))
    }
}

#[async_trait::async_trait]
impl Transport for Connection {
    /// Open a call on this connection.
    ///
    /// The client deadline travels to the server as the time remaining, so
    /// both ends expire the call together.
    async fn open(
        &self,
        method: &str,
        shape: CallShape,
        timeout: Option<Duration>,
    ) -> Result<ClientCall> {
        if self.is_closed() {
            return Err(self.lost());
        }

        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let deadline = Deadline::from_timeout(timeout);
        let (local, remote) = call::open_with_id(id, method, shape, deadline);
        let inbound = self
            .routes
            .register(&local.context)
            .ok_or_else(|| RpcError::Internal {
                message: format!("call id {} is already in use", id),
            })?;

        // The reader may have cleared the routes just before registration.
        if self.is_closed() {
            local.context.abort(StatusCode::Unavailable);
            return Err(self.lost());
        }

        let timeout_ms = deadline
            .remaining()
            .map(|left| u64::try_from(left.as_millis()).unwrap_or(u64::MAX));
        self.outbound
            .send(Frame::Open {
                call_id: id,
                method: method.to_string(),
                shape,
                timeout_ms,
            })
            .await
            .map_err(|_| self.lost())?;

        tokio::spawn(pump_out(id, Side::Client, remote.requests, self.outbound.clone()));
        tokio::spawn(pump_in(remote.responses, inbound));
        Ok(local)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reader_task.abort();
        self.writer_task.abort();
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::service::{GreetService, ServiceSet};
    use crate::transport::RpcServer;
    use serde_json::json;

    async fn start(services: ServiceSet) -> crate::transport::RpcServerHandle {
        let config = ServerConfig::new().with_port(0);
        RpcServer::start(Arc::new(services), &config).await.unwrap()
    }

    #[tokio::test]
    async fn test_connection_unary_call() {
        let mut handle = start(ServiceSet::standard()).await;
        let connection = Connection::connect(handle.addr()).await.unwrap();

        let mut call = connection.open("Sum", CallShape::Unary, None).await.unwrap();
        call.requests
            .send(json!({"first": 3, "second": 10}))
            .await
            .unwrap();

        assert_eq!(
            call.responses.receive().await.unwrap(),
            Some(json!({"result": 13}))
        );
        assert_eq!(call.responses.receive().await.unwrap(), None);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_connection() {
        let mut handle = start(ServiceSet::standard()).await;
        let connection = Arc::new(Connection::connect(handle.addr()).await.unwrap());

        let mut tasks = Vec::new();
        for i in 0..8i64 {
            let connection = connection.clone();
            tasks.push(tokio::spawn(async move {
                let mut call = connection.open("Sum", CallShape::Unary, None).await.unwrap();
                call.requests
                    .send(json!({"first": i, "second": 100}))
                    .await
                    .unwrap();
                call.responses.receive().await.unwrap()
            }));
        }

        for (i, task) in tasks.into_iter().enumerate() {
            let response = task.await.unwrap();
            assert_eq!(response, Some(json!({"result": i as i64 + 100})));
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_connect_to_dead_server_is_transport_failure() {
        // Use a port that nothing is listening on
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = Connection::connect(addr).await;

        match result.unwrap_err() {
            RpcError::TransportFailure { message } => assert!(message.contains("127.0.0.1:1")),
            other => panic!("Expected TransportFailure, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_shutdown_fails_open_calls() {
        let mut handle = start(ServiceSet::standard()).await;
        let connection = Connection::connect(handle.addr()).await.unwrap();

        let mut call = connection
            .open("GreetEveryone", CallShape::BidiStream, None)
            .await
            .unwrap();
        call.requests
            .send(json!({"greeting": {"first_name": "Nathan"}}))
            .await
            .unwrap();
        assert_eq!(
            call.responses.receive().await.unwrap(),
            Some(json!({"result": "Hello Nathan!"}))
        );

        handle.shutdown();

        let err = call.responses.receive().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {:?}", err);
        assert!(!err.is_deadline_exceeded());

        // Retry until the reader observed the loss (up to 1s)
        let mut detected = false;
        for _ in 0..20 {
            if connection.open("Sum", CallShape::Unary, None).await.is_err() {
                detected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(detected, "Connection should detect server shutdown");
    }

    #[tokio::test]
    async fn test_deadline_travels_to_server() {
        let services = ServiceSet::new()
            .with(GreetService::new().with_deadline_delay(3, Duration::from_millis(100)));
        let mut handle = start(services).await;
        let connection = Connection::connect(handle.addr()).await.unwrap();

        let mut call = connection
            .open(
                "GreetWithDeadline",
                CallShape::Unary,
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        call.requests
            .send(json!({"greeting": {"first_name": "Nathan"}}))
            .await
            .unwrap();

        let err = call.responses.receive().await.unwrap_err();
        assert!(err.is_deadline_exceeded(), "unexpected error: {:?}", err);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_error_reaches_client() {
        let mut handle = start(ServiceSet::standard()).await;
        let connection = Connection::connect(handle.addr()).await.unwrap();

        let mut call = connection
            .open("SquareRoot", CallShape::Unary, None)
            .await
            .unwrap();
        call.requests.send(json!({"number": -4})).await.unwrap();

        match call.responses.receive().await.unwrap_err() {
            RpcError::InvalidArgument { message } => {
                assert_eq!(message, "Received a negative number: -4")
            }
            other => panic!("Expected InvalidArgument, got: {:?}", other),
        }

        handle.shutdown();
    }
}
