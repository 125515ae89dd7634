use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use gpuwatch_data::{
    DashboardSnapshot, PipelineConfig, PipelineError, SharedDashboard, SourceLoader, bootstrap,
    mutation_rng, spawn_ticker,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const DEFAULT_WS_ADDR: &str = "0.0.0.0:9002";
const DEFAULT_WS_BUFFER_SIZE: usize = 64;

/// Every frame sent to a client is one of these, tagged by `type`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Welcome {
        message: &'static str,
        timestamp: DateTime<Utc>,
    },
    Snapshot {
        data: &'a DashboardSnapshot,
    },
}

impl ServerMessage<'_> {
    fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(error) => {
                error!(%error, "failed to serialise server message");
                None
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    init_logging();

    info!("Starting gpuwatch-data WebSocket server");

    let config = PipelineConfig::from_env()?;
    let loader = SourceLoader::for_base_url(config.base_url.clone());
    let dashboard = bootstrap(&loader, &config).await?.into_shared();

    // Configurable buffer size via WS_BUFFER_SIZE env var
    let buffer_size = std::env::var("WS_BUFFER_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|size: &usize| *size > 0)
        .unwrap_or(DEFAULT_WS_BUFFER_SIZE);
    info!(buffer_size, "WebSocket broadcast buffer size");
    let (tx, _rx) = broadcast::channel::<Arc<DashboardSnapshot>>(buffer_size);

    // Configurable via WS_ADDR env var
    let server_addr = parse_ws_addr(std::env::var("WS_ADDR").ok())?;
    let listener = TcpListener::bind(server_addr)
        .await
        .map_err(|error| PipelineError::Server(format!("bind {server_addr}: {error}")))?;
    info!("WebSocket server listening on ws://{}", server_addr);

    let server = tokio::spawn(start_websocket_server(
        listener,
        dashboard.clone(),
        tx.clone(),
    ));

    let mut ticker = spawn_ticker(
        dashboard,
        config.tick_interval,
        mutation_rng(&config),
        tx,
    );

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(error) => warn!(%error, "failed to listen for shutdown signal"),
            }
            Ok(())
        }
        result = ticker.wait() => result,
    };

    server.abort();
    match outcome {
        Ok(()) => ticker.shutdown().await,
        Err(error) => {
            error!(%error, "pipeline stopped");
            Err(error)
        }
    }
}

fn parse_ws_addr(value: Option<String>) -> Result<SocketAddr, PipelineError> {
    let value = value.unwrap_or_else(|| DEFAULT_WS_ADDR.to_string());
    value
        .parse()
        .map_err(|error| PipelineError::Server(format!("invalid WS_ADDR {value}: {error}")))
}

/// Accept clients until the listener fails.
async fn start_websocket_server(
    listener: TcpListener,
    dashboard: SharedDashboard,
    tx: broadcast::Sender<Arc<DashboardSnapshot>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New WebSocket connection from {}", peer_addr);
                tokio::spawn(handle_client(
                    stream,
                    peer_addr,
                    dashboard.clone(),
                    tx.subscribe(),
                ));
            }
            Err(error) => {
                error!(%error, "WebSocket accept failed");
                break;
            }
        }
    }
}

/// Handle individual WebSocket client connection
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dashboard: SharedDashboard,
    mut rx: broadcast::Receiver<Arc<DashboardSnapshot>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Welcome, then the current state so the client can render before the next tick
    let current = dashboard.lock().snapshot();
    let greeting = [
        ServerMessage::Welcome {
            message: "Connected to gpuwatch price feed",
            timestamp: Utc::now(),
        },
        ServerMessage::Snapshot { data: &current },
    ];
    for frame in greeting.iter().filter_map(ServerMessage::to_frame) {
        if ws_sender.send(frame).await.is_err() {
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    let Some(frame) = (ServerMessage::Snapshot { data: &*snapshot }).to_frame()
                    else {
                        continue;
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Only the newest snapshot matters, keep going
                    warn!("Client {} lagged, skipped {} snapshots", peer_addr, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Broadcast channel closed for {}", peer_addr);
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    debug!("Received ping from {}", peer_addr);
                }
                Ok(Message::Text(text)) => {
                    debug!("Received text from {}: {}", peer_addr, text);
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            info!("Send task completed for {}", peer_addr);
        }
        _ = &mut recv_task => {
            send_task.abort();
            info!("Receive task completed for {}", peer_addr);
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
