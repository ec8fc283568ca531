//! Health & status API endpoints
//!
//! Provides HTTP endpoints for monitoring:
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Uptime and per-network ingest cursors

use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::db::IbcStore;
use crate::metrics;
use crate::types::Network;

/// Server start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Maximum concurrent connections to the API server.
const API_MAX_CONNECTIONS: usize = 128;

/// Read timeout for incoming connections.
const API_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    networks: Vec<NetworkStatus>,
}

#[derive(Serialize)]
struct NetworkStatus {
    network: String,
    last_processed_height: i64,
}

/// Start the API server (health, metrics and status endpoints)
pub async fn start_api_server(
    addr: SocketAddr,
    store: Arc<dyn IbcStore>,
    networks: Vec<Network>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    START_TIME.get_or_init(Instant::now);
    metrics::UP.set(1.0);

    let semaphore = Arc::new(Semaphore::new(API_MAX_CONNECTIONS));

    loop {
        let (mut socket, _) = listener.accept().await?;
        let sem = semaphore.clone();
        let store = store.clone();
        let networks = networks.clone();

        tokio::spawn(async move {
            let _permit = match sem.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let mut buf = [0u8; 4096];
            let n = match tokio::time::timeout(API_READ_TIMEOUT, socket.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => n,
                _ => return,
            };

            let (method, path) = match parse_request(&buf[..n]) {
                Some(mp) => mp,
                None => {
                    let _ = socket
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    return;
                }
            };

            match (method.as_str(), path.as_str()) {
                ("GET", "/metrics") | ("GET", "/") => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    let _ = encoder.encode(&metric_families, &mut buffer);

                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                        buffer.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&buffer).await;
                }
                ("GET", "/health") => {
                    let response =
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK";
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                ("GET", "/status") => {
                    let mut statuses = Vec::new();
                    for network in &networks {
                        let height = store
                            .get_ingest_cursor(*network)
                            .await
                            .ok()
                            .flatten()
                            .unwrap_or(0);
                        statuses.push(NetworkStatus {
                            network: network.to_string(),
                            last_processed_height: height,
                        });
                    }
                    let status = StatusResponse {
                        status: "ok".to_string(),
                        uptime_seconds: START_TIME
                            .get()
                            .map(|t| t.elapsed().as_secs())
                            .unwrap_or(0),
                        networks: statuses,
                    };
                    let body = serde_json::to_vec(&status).unwrap_or_default();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                }
                _ => {
                    let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                    let _ = socket.write_all(response.as_bytes()).await;
                }
            }
        });
    }
}

/// Parse HTTP method and path from raw request bytes.
fn parse_request(buf: &[u8]) -> Option<(String, String)> {
    let request = std::str::from_utf8(buf).ok()?;
    let first_line = request.lines().next()?;
    let mut parts = first_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    Some((method, path))
}
