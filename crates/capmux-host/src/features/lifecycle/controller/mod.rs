use std::sync::Arc;
use std::time::Duration;

use capmux_core::ModuleSelection;
use capmux_proto::ProtocolEndpoint;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::features::lifecycle::service::{Orchestrator, ShutdownReport};

pub const PARENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Returns true once the process that launched us is gone.
pub type ParentCheck = fn() -> bool;

#[derive(Clone)]
pub struct LifecycleController {
    service: Arc<Orchestrator>,
    parent_poll: Duration,
    parent_gone: ParentCheck,
}

impl LifecycleController {
    pub fn new(service: Arc<Orchestrator>) -> Self {
        Self {
            service,
            parent_poll: PARENT_POLL_INTERVAL,
            parent_gone,
        }
    }

    pub fn with_parent_check(mut self, poll: Duration, check: ParentCheck) -> Self {
        self.parent_poll = poll;
        self.parent_gone = check;
        self
    }

    pub fn service(&self) -> &Arc<Orchestrator> {
        &self.service
    }

    pub async fn start(
        &self,
        selection: &ModuleSelection,
        document: &Map<String, Value>,
        endpoint: &dyn ProtocolEndpoint,
    ) -> crate::Result<Vec<String>> {
        self.service.start(selection, document, endpoint).await
    }

    pub async fn shutdown(&self) -> ShutdownReport {
        self.service.shutdown().await
    }

    /// Cancels `trigger` on SIGINT or SIGTERM.
    pub fn spawn_signal_listener(self: Arc<Self>, trigger: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                received = shutdown_signal() => match received {
                    Ok(signal) => {
                        info!(signal = signal, "shutdown signal received");
                        trigger.cancel();
                    }
                    Err(error) => {
                        warn!(error = %error, "cannot listen for signals");
                    }
                },
                _ = trigger.cancelled() => {}
            }
        })
    }

    /// Cancels `trigger` once the parent process disappears (we get
    /// re-parented to pid 1).
    pub fn spawn_parent_monitor(self: Arc<Self>, trigger: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.parent_poll);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if (self.parent_gone)() {
                            info!("parent process exited, shutting down");
                            trigger.cancel();
                            break;
                        }
                        debug!("parent process alive");
                    }
                    _ = trigger.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(unix)]
fn parent_gone() -> bool {
    std::os::unix::process::parent_id() == 1
}

#[cfg(not(unix))]
fn parent_gone() -> bool {
    false
}

pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => Ok("SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
