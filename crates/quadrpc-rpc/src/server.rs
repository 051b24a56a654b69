//! TCP server bootstrap.

use quadrpc_core::{RpcServer, RpcServerHandle, ServerConfig, ServiceSet};
use std::sync::Arc;
use tracing::info;

/// Start serving the calculator and greet services.
///
/// The returned handle reports the bound address (useful when port=0) and
/// stops the server when dropped.
pub async fn start_server(
    host: &str,
    port: u16,
    max_connections: usize,
) -> anyhow::Result<RpcServerHandle> {
    let config = ServerConfig::new()
        .with_host(host)
        .with_port(port)
        .with_max_connections(max_connections);
    let services = Arc::new(ServiceSet::standard());

    let handle = RpcServer::start(services, &config).await?;
    info!("Serving calculator and greet services on {}", handle.addr());

    Ok(handle)
}
