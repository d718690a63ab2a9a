use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use capmux_core::{
    load_service, CapabilityProvider, CoreError, HostConfig, LifecycleEvent, ModuleSelection,
    ProviderContext, ProviderRegistry, ProviderState, RegistryEntry, Selection,
};
use capmux_proto::ProtocolEndpoint;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config_doc::provider_section;
use crate::features::lifecycle::repo::LifecycleRepository;
use crate::features::observability::controller::ObservabilityController;
use crate::HostError;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of closing every provider under the shutdown deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Every close finished before the deadline.
    pub graceful: bool,
    pub closed: Vec<String>,
    pub failed: Vec<String>,
    /// Providers that had not reported when the deadline hit.
    pub pending: Vec<String>,
}

struct ActiveProvider {
    name: String,
    provider: Arc<dyn CapabilityProvider>,
}

// A provider that failed mid-startup, kept so it can still be closed.
struct StartFailure {
    provider: Option<Arc<dyn CapabilityProvider>>,
    source: CoreError,
}

/// Drives the selected providers from construction to close.
///
/// Startup is sequential and stops at the first failure. Shutdown closes all
/// providers concurrently and waits at most `shutdown_timeout` before it
/// cancels the shared token regardless.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    host: Arc<HostConfig>,
    cancel: CancellationToken,
    repo: Arc<dyn LifecycleRepository>,
    metrics: Arc<ObservabilityController>,
    shutdown_timeout: Duration,
    states: Mutex<HashMap<String, ProviderState>>,
    active: Mutex<Vec<ActiveProvider>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        host: Arc<HostConfig>,
        repo: Arc<dyn LifecycleRepository>,
        metrics: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            registry,
            host,
            cancel: CancellationToken::new(),
            repo,
            metrics,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            states: Mutex::new(HashMap::new()),
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Root of the token tree shared with providers and transports.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// Names of providers that are serving, in start order.
    pub fn active_providers(&self) -> Vec<String> {
        lock(&self.active)
            .iter()
            .map(|active| active.name.clone())
            .collect()
    }

    pub fn state(&self, provider: &str) -> Option<ProviderState> {
        lock(&self.states).get(provider).copied()
    }

    pub async fn events(&self, provider: &str) -> capmux_core::Result<Vec<LifecycleEvent>> {
        self.repo.events_for(provider.to_string()).await
    }

    /// Starts the selected providers in registry order and adapts each one
    /// into `endpoint`.
    ///
    /// The first failure closes what was already started (and the failing
    /// provider) before the error is returned.
    pub async fn start(
        &self,
        selection: &ModuleSelection,
        document: &Map<String, Value>,
        endpoint: &dyn ProtocolEndpoint,
    ) -> crate::Result<Vec<String>> {
        let Selection { selected, unknown } = selection.select(&self.registry);
        for name in &unknown {
            warn!(provider = %name, "selected provider is not registered, skipping");
        }
        if selected.is_empty() {
            warn!(module = %self.host.module, "no providers selected");
        }

        for entry in selected {
            if let Err(failure) = self.start_one(entry, document, endpoint).await {
                error!(
                    provider = %entry.name,
                    error = %failure.source,
                    "provider failed to start, aborting startup"
                );
                if let Some(provider) = failure.provider {
                    let reason = failure.source.to_string();
                    if let Err(error) = self
                        .transition(&entry.name, ProviderState::Closing, Some(&reason))
                        .await
                    {
                        warn!(provider = %entry.name, error = %error, "unexpected provider state");
                    }
                    lock(&self.active).push(ActiveProvider {
                        name: entry.name.clone(),
                        provider,
                    });
                }

                let report = self.shutdown().await;
                debug!(?report, "startup rollback finished");
                return Err(HostError::Startup {
                    provider: entry.name.clone(),
                    source: failure.source,
                });
            }
        }

        let started = self.active_providers();
        self.metrics.set_active_providers(started.len());
        info!(providers = ?started, "providers started");
        Ok(started)
    }

    async fn start_one(
        &self,
        entry: &RegistryEntry,
        document: &Map<String, Value>,
        endpoint: &dyn ProtocolEndpoint,
    ) -> Result<(), StartFailure> {
        let name = entry.name.as_str();
        self.transition(name, ProviderState::Created, None)
            .await
            .map_err(|source| StartFailure {
                provider: None,
                source,
            })?;

        let ctx = ProviderContext::new(name, Arc::clone(&self.host), self.cancel.child_token());
        let mut provider = entry.instantiate(ctx).map_err(|source| StartFailure {
            provider: None,
            source,
        })?;

        if let Err(source) = self
            .bring_up(name, provider.as_mut(), document, endpoint)
            .await
        {
            return Err(StartFailure {
                provider: Some(Arc::from(provider)),
                source,
            });
        }

        lock(&self.active).push(ActiveProvider {
            name: name.to_string(),
            provider: Arc::from(provider),
        });
        Ok(())
    }

    async fn bring_up(
        &self,
        name: &str,
        provider: &mut dyn CapabilityProvider,
        document: &Map<String, Value>,
        endpoint: &dyn ProtocolEndpoint,
    ) -> capmux_core::Result<()> {
        if let Some(section) = provider_section(document, name)? {
            provider.load_config(section)?;
            self.transition(name, ProviderState::Configured, None).await?;
            debug!(parent: provider.context().span(), config = %provider.config(), "config applied");
        }

        provider.init().await?;
        self.transition(name, ProviderState::Initialized, None).await?;
        self.metrics.record_provider_initialized();

        let counts = load_service(&*provider, endpoint);
        self.transition(name, ProviderState::Serving, None).await?;
        info!(
            parent: provider.context().span(),
            tools = counts.tools,
            resources = counts.resources,
            resource_templates = counts.resource_templates,
            prompts = counts.prompts,
            "provider serving"
        );
        Ok(())
    }

    /// Closes every started provider concurrently, then cancels the shared
    /// token. Calling it again only re-cancels the token.
    pub async fn shutdown(&self) -> ShutdownReport {
        let providers = std::mem::take(&mut *lock(&self.active));
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        info!(
            providers = providers.len(),
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "shutting down providers"
        );

        let mut pending = Vec::with_capacity(providers.len());
        let mut closing = JoinSet::new();
        let mut close_handles = Vec::with_capacity(pending.capacity());
        for ActiveProvider { name, provider } in providers {
            if self.state(&name) != Some(ProviderState::Closing) {
                if let Err(error) = self.transition(&name, ProviderState::Closing, None).await {
                    warn!(provider = %name, error = %error, "unexpected provider state");
                }
            }
            pending.push(name.clone());
            // The inner task turns a panicking close into a JoinError.
            let close = tokio::spawn(async move { provider.close().await });
            close_handles.push(close.abort_handle());
            closing.spawn(async move { (name, close.await) });
        }

        let mut report = ShutdownReport::default();
        loop {
            match tokio::time::timeout_at(deadline, closing.join_next()).await {
                Ok(Some(Ok((name, outcome)))) => {
                    pending.retain(|p| p != &name);
                    let failure = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(error)) => Some(error.to_string()),
                        Err(join_error) => Some(format!("close task failed: {join_error}")),
                    };
                    match failure {
                        None => {
                            debug!(provider = %name, "provider closed");
                            self.finish_close(&name, None).await;
                            report.closed.push(name);
                        }
                        Some(reason) => {
                            warn!(provider = %name, error = %reason, "provider close failed");
                            self.finish_close(&name, Some(&reason)).await;
                            report.failed.push(name);
                        }
                    }
                }
                Ok(Some(Err(join_error))) => {
                    warn!(error = %join_error, "close task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = ?pending, "shutdown deadline reached, forcing exit");
                    for handle in &close_handles {
                        handle.abort();
                    }
                    closing.abort_all();
                    break;
                }
            }
        }

        for name in &pending {
            self.metrics.record_provider_close(name, "pending");
        }
        report.closed.sort();
        report.failed.sort();
        pending.sort();
        report.pending = pending;
        report.graceful = report.pending.is_empty();

        self.cancel.cancel();
        self.metrics.set_active_providers(0);
        self.metrics.record_shutdown(started.elapsed());
        info!(
            graceful = report.graceful,
            closed = report.closed.len(),
            failed = report.failed.len(),
            pending = report.pending.len(),
            "shutdown finished"
        );
        report
    }

    async fn finish_close(&self, name: &str, failure: Option<&str>) {
        let outcome = if failure.is_some() { "failed" } else { "closed" };
        self.metrics.record_provider_close(name, outcome);
        if let Err(error) = self.transition(name, ProviderState::Closed, failure).await {
            warn!(provider = %name, error = %error, "unexpected provider state");
        }
    }

    async fn transition(
        &self,
        provider: &str,
        next: ProviderState,
        failure: Option<&str>,
    ) -> capmux_core::Result<()> {
        let from = {
            let mut states = lock(&self.states);
            let from = states.get(provider).copied();
            match from {
                Some(current) => {
                    current.transition(provider, next)?;
                }
                None if next != ProviderState::Created => {
                    return Err(CoreError::UnknownProvider(provider.to_string()));
                }
                None => {}
            }
            states.insert(provider.to_string(), next);
            from
        };

        let event = LifecycleEvent::new(provider, from, next);
        let event = match failure {
            Some(reason) => event.with_error(reason),
            None => event,
        };
        if let Err(error) = self.repo.record(event).await {
            warn!(provider = provider, error = %error, "failed to record lifecycle event");
        }
        Ok(())
    }
}

// State stays consistent across a panic elsewhere, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
