use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use capmux_core::{
    ConfigCheck, HostConfig, ModuleSelection, ProviderContext, ProviderRegistry,
};
use capmux_endpoint::{serve_sse, serve_stdio, McpEndpoint};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config_doc;
use crate::features::lifecycle::controller::LifecycleController;
use crate::features::lifecycle::repo::InMemoryLifecycleRepository;
use crate::features::lifecycle::service::{Orchestrator, ShutdownReport};
use crate::features::observability::controller::{
    global_observability_controller, ObservabilityController,
};
use crate::pidfile::PidFile;
use crate::{HostError, Result};

// How long the transport gets to wind down after the token is cancelled.
const TRANSPORT_DRAIN: Duration = Duration::from_secs(3);

/// Composition root: one per process run.
pub struct Host {
    config: Arc<HostConfig>,
    registry: Arc<ProviderRegistry>,
    shutdown_timeout: Duration,
}

impl Host {
    pub fn new(config: HostConfig, registry: ProviderRegistry, shutdown_timeout: Duration) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            shutdown_timeout,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Registered provider names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// The config document as this run would see it: the file on disk merged
    /// onto every selected provider's defaults. Written out when no file
    /// exists yet.
    pub fn merged_config(&self) -> Result<Map<String, Value>> {
        self.config.check()?;
        let path = self.config.config_path();
        let document = config_doc::load(&path)?;
        let selection = ModuleSelection::parse(&self.config.module);

        let mut snapshots = Vec::new();
        for entry in selection.select(&self.registry).selected {
            let ctx = ProviderContext::new(
                entry.name.clone(),
                Arc::clone(&self.config),
                CancellationToken::new(),
            );
            let mut provider = entry.instantiate(ctx)?;
            if let Some(section) = config_doc::provider_section(&document, &entry.name)? {
                provider
                    .load_config(section)
                    .map_err(|source| HostError::Startup {
                        provider: entry.name.clone(),
                        source,
                    })?;
            }
            snapshots.push((entry.name.as_str(), provider.config()));
        }

        let merged = config_doc::render(&self.config, snapshots)?;
        config_doc::write_if_absent(&path, &merged)?;
        Ok(merged)
    }

    /// Runs until a signal, parent exit or the transport closing, then shuts
    /// every provider down.
    pub async fn serve(&self) -> Result<ShutdownReport> {
        self.serve_until(std::future::pending()).await
    }

    /// Like [`Host::serve`], with `stop` as one more shutdown trigger.
    pub async fn serve_until<F>(&self, stop: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        self.config.check()?;
        self.config.ensure_directories()?;
        let mut pid_file = PidFile::acquire(self.config.pid_path())?;

        let outcome = self.run(stop).await;
        pid_file.release();
        outcome
    }

    async fn run<F>(&self, stop: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        let document = config_doc::load(&self.config.config_path())?;
        let metrics = global_observability_controller().map_err(HostError::Metrics)?;
        let endpoint = Arc::new(self.endpoint(&metrics));

        let orchestrator = Orchestrator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::new(InMemoryLifecycleRepository::new()),
            metrics,
        )
        .with_shutdown_timeout(self.shutdown_timeout);
        let cancel = orchestrator.cancel_token();
        let controller = Arc::new(LifecycleController::new(Arc::new(orchestrator)));

        let selection = ModuleSelection::parse(&self.config.module);
        controller
            .start(&selection, &document, endpoint.as_ref())
            .await?;

        let trigger = CancellationToken::new();
        let signals = Arc::clone(&controller).spawn_signal_listener(trigger.clone());
        let monitor = Arc::clone(&controller).spawn_parent_monitor(trigger.clone());
        let mut transport = self.spawn_transport(Arc::clone(&endpoint), cancel)?;

        tokio::pin!(stop);
        let mut transport_result = None;
        tokio::select! {
            joined = &mut transport => {
                info!("transport closed");
                transport_result = Some(joined);
            }
            _ = trigger.cancelled() => {}
            _ = &mut stop => info!("stop requested"),
        }

        let report = controller.shutdown().await;
        trigger.cancel();

        let joined = match transport_result {
            Some(joined) => Some(joined),
            None => match tokio::time::timeout(TRANSPORT_DRAIN, &mut transport).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    warn!("transport did not stop in time");
                    transport.abort();
                    None
                }
            },
        };
        signals.abort();
        monitor.abort();

        match joined {
            Some(Ok(Err(error))) => Err(HostError::Endpoint(error)),
            Some(Err(join_error)) => {
                warn!(error = %join_error, "transport task failed");
                Ok(report)
            }
            _ => Ok(report),
        }
    }

    fn endpoint(&self, metrics: &Arc<ObservabilityController>) -> McpEndpoint {
        McpEndpoint::new(self.config.server_name.clone(), self.config.version.clone())
            .with_instructions(self.config.description.clone())
            .with_tool_observer(metrics.tool_observer())
            .with_metrics(metrics.metrics_renderer())
    }

    fn spawn_transport(
        &self,
        endpoint: Arc<McpEndpoint>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<capmux_endpoint::Result<()>>> {
        if !self.config.is_sse() {
            return Ok(tokio::spawn(serve_stdio(
                endpoint,
                tokio::io::stdin(),
                tokio::io::stdout(),
                cancel,
            )));
        }

        let addr: SocketAddr = self.config.listen_addr.parse().map_err(
            |e: std::net::AddrParseError| HostError::ListenAddr {
                addr: self.config.listen_addr.clone(),
                reason: e.to_string(),
            },
        )?;
        let base_url = self.config.base_url.clone();
        Ok(tokio::spawn(async move {
            serve_sse(endpoint, addr, &base_url, cancel).await
        }))
    }
}
