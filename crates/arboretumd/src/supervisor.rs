//! Worker supervision.
//!
//! The supervisor owns one task per [`WorkerKind`] and the control
//! listener. Each tick it answers at most one control connection and
//! replaces any worker whose task has finished. A tick never blocks longer
//! than the accept timeout.
//!
//! ```text
//!   starting ──► up ──(task finished)──► down ──(respawn)──► up ...
//! ```

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use arboretum_core::DaemonConfig;

use crate::control;
use crate::error::{DaemonError, DaemonResult};
use crate::workers::{WorkerContext, WorkerKind, run_worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Up,
    Down,
}

/// One worker's entry in a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHealth {
    pub name: String,
    pub state: WorkerState,
}

/// Supervisor timing and control address.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub control_addr: SocketAddr,
    pub tick_interval: Duration,
    pub accept_timeout: Duration,
    pub read_timeout: Duration,
}

impl From<&DaemonConfig> for SupervisorConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            control_addr: SocketAddr::from(([127, 0, 0, 1], config.control_port)),
            tick_interval: config.tick_interval(),
            accept_timeout: config.accept_timeout(),
            read_timeout: config.accept_timeout(),
        }
    }
}

struct WorkerSlot {
    kind: WorkerKind,
    state: WorkerState,
    handle: JoinHandle<()>,
    restarts: u32,
}

fn spawn_worker(
    kind: WorkerKind,
    ctx: &Arc<WorkerContext>,
    shutdown: &watch::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_worker(kind, ctx.clone(), shutdown.subscribe()))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct Supervisor {
    ctx: Arc<WorkerContext>,
    config: SupervisorConfig,
    listener: TcpListener,
    slots: Vec<WorkerSlot>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Spawn every worker, then bind the control listener.
    ///
    /// If binding fails the workers already started are stopped and joined
    /// before the error is returned.
    pub async fn start(ctx: Arc<WorkerContext>, config: SupervisorConfig) -> DaemonResult<Self> {
        let (shutdown_tx, _) = watch::channel(false);

        let mut slots = Vec::with_capacity(WorkerKind::ALL.len());
        for kind in WorkerKind::ALL {
            let mut slot = WorkerSlot {
                kind,
                state: WorkerState::Starting,
                handle: spawn_worker(kind, &ctx, &shutdown_tx),
                restarts: 0,
            };
            slot.state = WorkerState::Up;
            debug!(worker = %kind, "worker up");
            slots.push(slot);
        }

        let listener = match TcpListener::bind(config.control_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(addr = %config.control_addr, error = %source, "control socket bind failed, stopping workers");
                shutdown_tx.send_replace(true);
                for slot in slots {
                    let _ = slot.handle.await;
                }
                return Err(DaemonError::Bind {
                    addr: config.control_addr,
                    source,
                });
            }
        };

        info!(addr = %listener.local_addr()?, "control socket listening");
        Ok(Self {
            ctx,
            config,
            listener,
            slots,
            shutdown_tx,
        })
    }

    /// Address the control listener is bound to.
    pub fn local_addr(&self) -> DaemonResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Current state of every worker, in worker order. A worker whose task
    /// has ended is `Down` until the next tick replaces it.
    pub fn health(&self) -> Vec<WorkerHealth> {
        self.slots
            .iter()
            .map(|slot| WorkerHealth {
                name: slot.kind.name().to_string(),
                state: if slot.handle.is_finished() {
                    WorkerState::Down
                } else {
                    slot.state
                },
            })
            .collect()
    }

    /// How many times the worker of `kind` has been replaced.
    pub fn restarts(&self, kind: WorkerKind) -> u32 {
        self.slots
            .iter()
            .find(|slot| slot.kind == kind)
            .map_or(0, |slot| slot.restarts)
    }

    /// One supervision step: revive finished workers, then serve at most
    /// one control connection. Accepting and serving share one deadline of
    /// `accept_timeout` from the start of the tick.
    pub async fn tick(&mut self) {
        let deadline = Instant::now() + self.config.accept_timeout;
        self.revive_finished().await;

        match tokio::time::timeout_at(deadline, self.listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!(%peer, "control connection");
                // Workers may have died while we waited.
                self.revive_finished().await;
                let health = self.health();
                let remaining = deadline.saturating_duration_since(Instant::now());
                let read_timeout = self.config.read_timeout.min(remaining);
                let served = tokio::time::timeout_at(
                    deadline,
                    control::serve_connection(stream, &health, read_timeout),
                )
                .await;
                if served.is_err() {
                    debug!(%peer, "control connection dropped at tick deadline");
                }
            }
            Ok(Err(e)) => warn!(error = %e, "control accept failed"),
            Err(_) => {}
        }
    }

    async fn revive_finished(&mut self) {
        for slot in &mut self.slots {
            if !slot.handle.is_finished() {
                continue;
            }
            slot.state = WorkerState::Down;

            let replacement = spawn_worker(slot.kind, &self.ctx, &self.shutdown_tx);
            let finished = std::mem::replace(&mut slot.handle, replacement);
            match finished.await {
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    error!(worker = %slot.kind, panic = %message, "worker panicked");
                }
                Err(e) => error!(worker = %slot.kind, error = %e, "worker task failed"),
                Ok(()) => warn!(worker = %slot.kind, "worker exited unexpectedly"),
            }

            slot.restarts += 1;
            slot.state = WorkerState::Up;
            info!(worker = %slot.kind, restarts = slot.restarts, "worker restarted");
        }
    }

    /// Tick until `shutdown` resolves, then stop every worker.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> DaemonResult<()> {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Set the stop signal and wait for every worker to exit.
    pub async fn shutdown(self) {
        info!("stopping workers");
        self.shutdown_tx.send_replace(true);
        for slot in self.slots {
            match slot.handle.await {
                Ok(()) => debug!(worker = %slot.kind, "worker joined"),
                Err(e) => warn!(worker = %slot.kind, error = %e, "worker ended abnormally"),
            }
        }
        info!("all workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_addr_is_loopback() {
        let config = SupervisorConfig::from(&DaemonConfig::default());
        assert_eq!(config.control_addr, "127.0.0.1:4114".parse().unwrap());
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert!(config.read_timeout <= config.accept_timeout);
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
