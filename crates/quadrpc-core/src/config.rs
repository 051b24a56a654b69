//! Centralized configuration for quadrpc.
//!
//! Constants for channel sizing, transport limits and the demo services'
//! pacing, plus a small runtime-overridable server configuration.

use std::time::Duration;

/// Message Channel sizing.
pub struct ChannelConfig;

impl ChannelConfig {
    /// Buffered messages per direction before `send` waits for the receiver.
    pub const DIRECTION_CAPACITY: usize = 32;
    /// Buffered frames per call waiting to be routed by a connection.
    pub const ROUTE_CAPACITY: usize = 256;
}

/// TCP transport limits.
pub struct TransportConfig;

impl TransportConfig {
    pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024; // 4MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_CONNECTIONS: usize = 64;
    pub const OUTBOUND_QUEUE: usize = 256;
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 50051;
}

/// Calculator service limits.
pub struct CalculatorConfig;

impl CalculatorConfig {
    /// Trial divisions `PrimeFactors` runs between cancellation checks.
    pub const TRIAL_DIVISIONS_PER_YIELD: u64 = 100_000;
}

/// Pacing for the greet service.
pub struct GreetConfig;

impl GreetConfig {
    pub const REPEAT_COUNT: u32 = 10;
    pub const REPEAT_INTERVAL: Duration = Duration::from_secs(1);
    /// Number of one-second ticks `GreetWithDeadline` waits before answering.
    pub const DEADLINE_TICKS: u32 = 3;
    pub const DEADLINE_TICK: Duration = Duration::from_secs(1);
}

/// Runtime configuration for an RPC server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on (0 = auto-assign).
    pub port: u16,
    /// Maximum concurrently served connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: TransportConfig::DEFAULT_HOST.to_string(),
            port: TransportConfig::DEFAULT_PORT,
            max_connections: TransportConfig::MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
