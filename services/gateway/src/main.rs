use clap::Parser;
use gateway::router::create_router;
use gateway::state::AppState;
use replication::{Coordinator, NodeRole};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// How long in-flight requests get to finish after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "clob-node", about = "Replicated limit order book node")]
struct Cli {
    /// Port for the HTTP server
    #[arg(short, long)]
    port: u16,

    /// Node mode: primary or secondary
    #[arg(short, long, default_value = "primary")]
    mode: NodeRole,

    /// Comma-separated peer URLs for replication fan-out and read repair
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Primary URL, used by secondaries to redirect writes
    #[arg(long, default_value = "")]
    primary: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let coordinator = Arc::new(Coordinator::new(cli.mode, cli.peers, cli.primary));
    info!(
        role = %coordinator.role(),
        peers = ?coordinator.peers(),
        required_peer_acks = coordinator.required_peer_acks(),
        can_accept_write = coordinator.can_accept_write(),
        primary = coordinator.primary(),
        "replica node startup"
    );
    if !coordinator.can_accept_write() && coordinator.primary().is_empty() {
        warn!("secondary started without primary; writes will fail until primary is configured");
    }
    if coordinator.role().is_primary() && coordinator.peers().is_empty() {
        info!("primary started with no peers configured; replication quorums run in single-node mode");
    }

    let state = AppState::new(coordinator);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut graceful_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = graceful_rx.changed().await;
        info!("shutdown signal received, draining");
    });

    let mut drain_rx = shutdown_rx;
    tokio::select! {
        result = server => result?,
        _ = async move {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        } => {
            warn!("drain window elapsed, forcing shutdown");
        }
    }

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
