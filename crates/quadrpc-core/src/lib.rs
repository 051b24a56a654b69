//! quadrpc core - call-shape engine for request/response messaging.
//!
//! Every call has one of four shapes (unary, server-streaming,
//! client-streaming, bidirectional) and runs over a two-direction message
//! channel with independent half-close, deadline propagation and
//! cancellation. Calls can be served in-process or over TCP.
//!
//! # Example
//!
//! ```rust,ignore
//! use quadrpc_core::{CalculatorClient, LocalTransport, ServiceSet};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> quadrpc_core::Result<()> {
//!     let transport = LocalTransport::new(Arc::new(ServiceSet::standard()));
//!     let calculator = CalculatorClient::new(transport);
//!
//!     println!("3 + 10 = {}", calculator.sum(3, 10).await?);
//!
//!     let mut primes = calculator.prime_factors(120).await?;
//!     while let Some(factor) = primes.receive().await? {
//!         println!("{}", factor.prime);
//!     }
//!     Ok(())
//! }
//! ```

pub mod call;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use call::{
    CallContext, CallId, CallShape, CallState, ClientCall, MessageReceiver, MessageSender,
    ServerCall,
};
pub use cancel::{CancellationToken, Deadline};
pub use client::{CalculatorClient, ClientStreamCall, GreetClient};
pub use config::ServerConfig;
pub use error::{Result, RpcError, Status, StatusCode};
pub use service::{CalculatorService, GreetService, Service, ServiceSet};
pub use transport::{Connection, LocalTransport, RpcServer, RpcServerHandle, Transport};
