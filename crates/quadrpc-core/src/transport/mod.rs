//! Transports: how a client end reaches a service.
//!
//! `LocalTransport` runs handlers in-process on tokio tasks. The TCP
//! transport (`RpcServer` / `Connection`) carries the same calls over a
//! length-prefixed JSON frame protocol, multiplexing many calls on one
//! connection.

mod bridge;
pub mod client;
pub mod protocol;
pub mod server;

pub use client::Connection;
pub use server::{RpcServer, RpcServerHandle};

use crate::call::{self, CallShape, ClientCall};
use crate::cancel::Deadline;
use crate::error::Result;
use crate::service::{reject_call, resolve, spawn_call, Service};
use std::sync::Arc;
use std::time::Duration;

/// Something that can open calls.
///
/// An unknown method or a shape mismatch is not an error of `open`: the
/// returned call fails with `Unimplemented` when its responses are read.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        method: &str,
        shape: CallShape,
        timeout: Option<Duration>,
    ) -> Result<ClientCall>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn open(
        &self,
        method: &str,
        shape: CallShape,
        timeout: Option<Duration>,
    ) -> Result<ClientCall> {
        (**self).open(method, shape, timeout).await
    }
}

/// In-process transport dispatching straight to a service.
pub struct LocalTransport<S: ?Sized> {
    service: Arc<S>,
}

impl<S: Service + ?Sized> LocalTransport<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

impl<S: ?Sized> Clone for LocalTransport<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

#[async_trait::async_trait]
impl<S: Service + ?Sized> Transport for LocalTransport<S> {
    async fn open(
        &self,
        method: &str,
        shape: CallShape,
        timeout: Option<Duration>,
    ) -> Result<ClientCall> {
        let (client, server) = call::open(method, shape, Deadline::from_timeout(timeout));
        match resolve(&*self.service, method, shape) {
            Ok(_) => spawn_call(self.service.clone(), server),
            Err(e) => reject_call(server, e),
        }
        Ok(client)
    }
}
