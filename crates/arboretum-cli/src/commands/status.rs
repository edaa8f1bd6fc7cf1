//! `arboretum status`: ask the running daemon which workers are up.

use std::net::SocketAddr;
use std::time::Duration;

use arboretum_core::ArboretumConfig;

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn status(config: &ArboretumConfig) -> anyhow::Result<bool> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.daemon.control_port));
    match arboretumd::query_status(addr, STATUS_TIMEOUT).await {
        Ok(health) => {
            println!("{}", arboretumd::render_status(&health));
            Ok(true)
        }
        Err(e) => {
            eprintln!("Daemon not reachable on {addr}: {e}");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_without_daemon_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = super::super::config_in(&dir);
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        config.daemon.control_port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!status(&config).await.unwrap());
    }
}
