//! Readiness probe logic.
//!
//! A branch is ready once its workload answers the readiness endpoint with
//! a 2xx. Until the workload listens, connecting is refused; that is the
//! only outcome treated as "not ready yet".

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProbeError;

/// Outcome of a readiness probe that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Connection refused: the workload is still building.
    NotReady,
}

#[async_trait]
pub trait ReadinessProber: Send + Sync {
    async fn probe(&self, ip: &str) -> Result<Readiness, ProbeError>;
}

/// Probes `http://<ip>:<port><path>`.
#[derive(Debug, Clone)]
pub struct HttpProber {
    port: u16,
    path: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            port,
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReadinessProber for HttpProber {
    async fn probe(&self, ip: &str) -> Result<Readiness, ProbeError> {
        let address = if ip.contains(':') {
            format!("[{ip}]:{}", self.port)
        } else {
            format!("{ip}:{}", self.port)
        };
        http_probe(&address, &self.path, self.timeout).await
    }
}

/// Perform an HTTP readiness probe against `address` (host:port).
///
/// Returns `Ready` on 2xx and `NotReady` when the connection is refused.
/// Every other outcome, including non-2xx answers and timeouts, is an error.
pub async fn http_probe(
    address: &str,
    path: &str,
    timeout: Duration,
) -> Result<Readiness, ProbeError> {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!(%uri, "readiness probe refused");
                return Ok(Readiness::NotReady);
            }
            Err(source) => {
                return Err(ProbeError::Connect {
                    address: address.to_string(),
                    source,
                });
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Handshake {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "arboretum-probe/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(Readiness::Ready)
        } else {
            Err(ProbeError::UnexpectedStatus {
                uri: uri.clone(),
                status: resp.status().as_u16(),
            })
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeError::Timeout { uri, timeout }),
    }
}
