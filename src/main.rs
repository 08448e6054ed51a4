//! tls-lifecycle
//!
//! ```text
//! serve    TLS echo server: greets each peer, echoes every message,
//!          stops listening on SIGINT/SIGTERM, then closes its peers
//! connect  TLS client: prints the peer identity, sends one message,
//!          prints replies until the server goes quiet, disconnects
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use tls_lifecycle::config::{load_config, AppConfig};
use tls_lifecycle::lifecycle::wait_for_shutdown_signal;
use tls_lifecycle::observability::logging::{init_tracing, TracingLogger};
use tls_lifecycle::observability::metrics::init_metrics;
use tls_lifecycle::{EventKind, NotificationEvent, ServerEvent, TlsClient, TlsServer};

/// How long `connect` waits for further replies before disconnecting.
const REPLY_IDLE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "tls-lifecycle")]
#[command(about = "TLS client and server with an explicit connection lifecycle", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "tls-lifecycle.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the TLS echo server from the [server] table
    Serve,
    /// Connect with the [client] table and send one message
    Connect {
        #[arg(short, long, default_value = "Hello from TLS Client!")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_tracing(config.observability.log_level);
    tracing::info!(config = %cli.config.display(), "tls-lifecycle v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Connect { message } => connect(config, message).await,
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = config.server.ok_or("missing [server] table")?;
    let logger = Arc::new(TracingLogger::from_config(&config.observability));
    let server = Arc::new(TlsServer::new(server_config).with_logger(logger));
    let mut events = server.subscribe(&[EventKind::Connect, EventKind::Data]);

    server.start().await?;

    let echo = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let ServerEvent::Peer { connection, event } = event else {
                    continue;
                };
                let Some(peer) = server.connection(connection) else {
                    continue;
                };
                let reply = match event {
                    NotificationEvent::Connected(identity) => {
                        tracing::info!(
                            %connection,
                            protocol = %identity.protocol,
                            authorized = identity.authorized,
                            "Client connected"
                        );
                        b"Hello from TLS Server!".to_vec()
                    }
                    NotificationEvent::DataReceived { data, .. } => {
                        format!("Echo: {}", String::from_utf8_lossy(&data)).into_bytes()
                    }
                    _ => continue,
                };
                if let Err(e) = peer.send(&reply).await {
                    tracing::warn!(%connection, error = %e, "Failed to reply");
                }
            }
        })
    };

    wait_for_shutdown_signal().await;

    server.stop().await;
    for peer in server.connections() {
        peer.close().await;
    }
    echo.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn connect(config: AppConfig, message: String) -> Result<(), Box<dyn std::error::Error>> {
    let client_config = config.client.ok_or("missing [client] table")?;
    let logger = Arc::new(TracingLogger::from_config(&config.observability));
    let client = TlsClient::new(client_config).with_logger(logger);
    let mut events = client.subscribe(&[
        EventKind::Data,
        EventKind::End,
        EventKind::Close,
        EventKind::Error,
    ]);

    let identity = client.connect().await?;
    println!("{}", serde_json::to_string_pretty(&identity)?);

    client.write(message.as_bytes()).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(NotificationEvent::DataReceived { data, .. }) => {
                    println!("{}", String::from_utf8_lossy(&data));
                }
                Some(NotificationEvent::PeerClosed) => tracing::info!("Server ended the connection"),
                Some(NotificationEvent::TransportError(e)) => {
                    tracing::error!(error = %e, "Connection failed");
                    break;
                }
                Some(_) | None => break,
            },
            _ = tokio::time::sleep(REPLY_IDLE) => break,
            _ = wait_for_shutdown_signal() => break,
        }
    }

    client.disconnect().await;
    tracing::info!(state = %client.state(), "Disconnected");
    Ok(())
}
