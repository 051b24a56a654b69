//! quadrpc - call-shape RPC server and client driver.
//!
//! `quadrpc serve` answers the calculator and greet services over TCP;
//! `quadrpc demo` runs the client driver scenarios against a server, or
//! against in-process services with `--local`.

mod driver;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use driver::{Driver, DriverConfig, Scenario};
use quadrpc_core::config::TransportConfig;
use quadrpc_core::{Connection, LocalTransport, ServiceSet, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "quadrpc")]
#[command(about = "Call-shape RPC server and client driver")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the calculator and greet services
    Serve {
        /// Host to bind to
        #[arg(long, default_value = TransportConfig::DEFAULT_HOST)]
        host: String,

        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value_t = TransportConfig::DEFAULT_PORT)]
        port: u16,

        /// Maximum concurrently served connections
        #[arg(long, default_value_t = TransportConfig::MAX_CONNECTIONS)]
        max_connections: usize,
    },
    /// Run client driver scenarios
    Demo {
        /// Scenario to run
        #[arg(value_enum, default_value_t = Scenario::All)]
        scenario: Scenario,

        /// Server address
        #[arg(long, default_value = "127.0.0.1:50051")]
        addr: SocketAddr,

        /// Run against in-process services instead of a server
        #[arg(long)]
        local: bool,

        /// Pause between streamed requests, in milliseconds
        #[arg(long, default_value_t = 1000)]
        pacing_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            host,
            port,
            max_connections,
        } => {
            info!("Starting quadrpc server");
            let handle = server::start_server(&host, port, max_connections).await?;

            println!("RPC_PORT={}", handle.port);

            // Wait for shutdown signal
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            drop(handle);
        }
        Command::Demo {
            scenario,
            addr,
            local,
            pacing_ms,
        } => {
            let transport: Arc<dyn Transport> = if local {
                info!("Running against in-process services");
                Arc::new(LocalTransport::new(Arc::new(ServiceSet::standard())))
            } else {
                info!("Connecting to {}", addr);
                Arc::new(Connection::connect(addr).await?)
            };

            let config = DriverConfig::default().with_pacing(Duration::from_millis(pacing_ms));
            Driver::new(transport, config).run(scenario).await?;
        }
    }

    Ok(())
}
