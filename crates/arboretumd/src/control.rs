//! Control socket protocol.
//!
//! One request per connection. The client sends the bytes `status`; the
//! daemon answers with `name=up|down` pairs separated by single spaces, in
//! worker order, then closes. Anything else is closed without an answer.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{DaemonError, DaemonResult};
use crate::supervisor::{WorkerHealth, WorkerState};

pub const STATUS_REQUEST: &[u8] = b"status";

/// Longest request read before giving up on a connection.
const MAX_REQUEST: usize = 64;

/// Encode worker health as the status response.
pub fn render_status(health: &[WorkerHealth]) -> String {
    health
        .iter()
        .map(|h| {
            let state = if h.state == WorkerState::Up { "up" } else { "down" };
            format!("{}={state}", h.name)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode a status response.
pub fn parse_status(response: &str) -> DaemonResult<Vec<WorkerHealth>> {
    response
        .split_whitespace()
        .map(|pair| {
            let (name, state) = pair
                .split_once('=')
                .ok_or_else(|| DaemonError::Protocol(format!("missing '=' in {pair:?}")))?;
            let state = match state {
                "up" => WorkerState::Up,
                "down" => WorkerState::Down,
                other => {
                    return Err(DaemonError::Protocol(format!(
                        "unknown state {other:?} for {name}"
                    )));
                }
            };
            Ok(WorkerHealth {
                name: name.to_string(),
                state,
            })
        })
        .collect()
}

/// Serve one control connection. Reads until the request is complete, the
/// peer stops sending, or `read_timeout` passes.
pub(crate) async fn serve_connection(
    mut stream: TcpStream,
    health: &[WorkerHealth],
    read_timeout: Duration,
) {
    let request = match tokio::time::timeout(read_timeout, read_request(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            debug!(error = %e, "control read failed");
            return;
        }
        Err(_) => {
            debug!("control read timed out");
            return;
        }
    };

    if request != STATUS_REQUEST {
        debug!(request = %String::from_utf8_lossy(&request), "unknown control request");
        return;
    }

    let response = render_status(health);
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "control write failed");
        return;
    }
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut request = Vec::with_capacity(STATUS_REQUEST.len());
    let mut buf = [0u8; MAX_REQUEST];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(request);
        }
        request.extend_from_slice(&buf[..n]);
        if request.len() >= STATUS_REQUEST.len() || request.len() >= MAX_REQUEST {
            return Ok(request);
        }
    }
}

/// Ask the daemon at `addr` for worker health.
pub async fn query_status(addr: SocketAddr, timeout: Duration) -> DaemonResult<Vec<WorkerHealth>> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(STATUS_REQUEST).await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok::<_, DaemonError>(response)
    };
    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| DaemonError::Timeout { addr })??;
    if response.is_empty() {
        return Err(DaemonError::Protocol("empty response".to_string()));
    }
    parse_status(&response)
}
