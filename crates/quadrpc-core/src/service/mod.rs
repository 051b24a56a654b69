//! Operation handlers and the runtime that drives them.
//!
//! A `Service` owns a fixed table of methods. Every incoming call gets its own
//! tokio task running `serve_call`, so all per-call state (running sums,
//! running maxima) lives inside that task and nothing is shared between calls.

pub mod calculator;
pub mod greet;

pub use calculator::CalculatorService;
pub use greet::GreetService;

use crate::call::{CallShape, ServerCall};
use crate::error::{Result, RpcError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name and shape of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub shape: CallShape,
}

impl MethodDescriptor {
    pub const fn new(name: &'static str, shape: CallShape) -> Self {
        Self { name, shape }
    }
}

/// Trait for dispatching calls to operation handlers.
#[async_trait::async_trait]
pub trait Service: Send + Sync + 'static {
    /// Service name, used in logs.
    fn name(&self) -> &'static str;

    /// Methods this service answers.
    fn methods(&self) -> Vec<MethodDescriptor>;

    /// Run the handler for `method` to completion.
    ///
    /// Returning `Err` terminates the call with that error unless the handler
    /// already closed its response direction.
    async fn call(&self, method: &str, call: &mut ServerCall) -> Result<()>;

    fn lookup(&self, method: &str) -> Option<MethodDescriptor> {
        self.methods().into_iter().find(|m| m.name == method)
    }
}

/// Check that `method` exists and is being opened with its declared shape.
pub fn resolve<S: Service + ?Sized>(
    service: &S,
    method: &str,
    shape: CallShape,
) -> Result<MethodDescriptor> {
    let descriptor = service.lookup(method).ok_or_else(|| RpcError::Unimplemented {
        message: format!("Unknown method: {}", method),
    })?;
    if descriptor.shape != shape {
        return Err(RpcError::Unimplemented {
            message: format!(
                "{} is a {} method, opened as {}",
                method, descriptor.shape, shape
            ),
        });
    }
    Ok(descriptor)
}

/// Drive one call's handler and terminate the call from its result.
pub async fn serve_call<S: Service + ?Sized>(service: &S, mut call: ServerCall) {
    let method = call.context.method().to_string();
    let id = call.context.id();

    match service.call(&method, &mut call).await {
        Ok(()) => debug!("call {} {}.{} completed", id, service.name(), method),
        Err(e) if call.responses.is_closed() => {
            warn!(
                "call {} {}.{} failed after its response was complete: {}",
                id,
                service.name(),
                method,
                e
            );
        }
        Err(e) => {
            debug!("call {} {}.{} failed: {}", id, service.name(), method, e);
            call.responses.fail(e.to_status()).await;
        }
    }
    call.responses.close_send();
}

/// Spawn `serve_call` on its own task.
pub fn spawn_call<S: Service + ?Sized>(service: Arc<S>, call: ServerCall) {
    tokio::spawn(async move {
        serve_call(&*service, call).await;
    });
}

/// Terminate a call that has no handler, on its own task.
pub fn reject_call(mut call: ServerCall, error: RpcError) {
    debug!("rejecting call {}: {}", call.context.id(), error);
    tokio::spawn(async move {
        call.responses.fail(error.to_status()).await;
    });
}

/// Several services answered through one dispatch point.
#[derive(Clone, Default)]
pub struct ServiceSet {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service: impl Service) -> Self {
        self.services.push(Arc::new(service));
        self
    }

    /// Calculator and greet services together.
    pub fn standard() -> Self {
        Self::new()
            .with(CalculatorService::new())
            .with(GreetService::new())
    }

    fn owner(&self, method: &str) -> Option<&Arc<dyn Service>> {
        self.services
            .iter()
            .find(|s| s.lookup(method).is_some())
    }
}

#[async_trait::async_trait]
impl Service for ServiceSet {
    fn name(&self) -> &'static str {
        "services"
    }

    fn methods(&self) -> Vec<MethodDescriptor> {
        self.services.iter().flat_map(|s| s.methods()).collect()
    }

    async fn call(&self, method: &str, call: &mut ServerCall) -> Result<()> {
        match self.owner(method) {
            Some(service) => service.call(method, call).await,
            None => Err(RpcError::Unimplemented {
                message: format!("Unknown method: {}", method),
            }),
        }
    }
}
