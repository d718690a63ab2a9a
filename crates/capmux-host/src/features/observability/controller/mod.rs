use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use capmux_endpoint::{MetricsRenderer, ToolObserver, ToolOutcome};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::warn;

pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    /// Controller over a private registry.
    pub fn standalone() -> Result<Self, String> {
        let repo = Arc::new(ObservabilityRepository::new()?);
        Ok(Self::new(ObservabilityService::new(repo)))
    }

    pub fn record_provider_initialized(&self) {
        self.service.record_provider_initialized();
    }

    pub fn set_active_providers(&self, count: usize) {
        self.service.set_active_providers(count);
    }

    pub fn record_provider_close(&self, provider: &str, outcome: &str) {
        self.service.record_provider_close(provider, outcome);
    }

    pub fn record_tool_call(&self, tool: &str, outcome: ToolOutcome) {
        self.service.record_tool_call(tool, outcome.as_str());
    }

    pub fn record_shutdown(&self, elapsed: Duration) {
        self.service.record_shutdown(elapsed);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.service.render_metrics()
    }

    /// Hook for the endpoint's `tools/call` path.
    pub fn tool_observer(self: &Arc<Self>) -> ToolObserver {
        let controller = Arc::clone(self);
        Arc::new(move |tool: &str, outcome: ToolOutcome| controller.record_tool_call(tool, outcome))
    }

    /// Renderer for `GET /metrics`.
    pub fn metrics_renderer(self: &Arc<Self>) -> MetricsRenderer {
        let controller = Arc::clone(self);
        Arc::new(move || {
            controller.render_metrics().unwrap_or_else(|error| {
                warn!(error = %error, "failed to render metrics");
                String::new()
            })
        })
    }
}

static GLOBAL_OBSERVABILITY: OnceLock<Arc<ObservabilityController>> = OnceLock::new();

pub fn global_observability_controller() -> Result<Arc<ObservabilityController>, String> {
    if let Some(controller) = GLOBAL_OBSERVABILITY.get() {
        return Ok(Arc::clone(controller));
    }
    let controller = Arc::new(ObservabilityController::standalone()?);
    Ok(Arc::clone(GLOBAL_OBSERVABILITY.get_or_init(|| controller)))
}
