use crate::features::observability::repo::ObservabilityRepository;
use std::sync::Arc;
use std::time::Duration;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_provider_initialized(&self) {
        self.repo.inc_providers_initialized();
    }

    pub fn set_active_providers(&self, count: usize) {
        self.repo.set_active_providers(count as f64);
    }

    pub fn record_provider_close(&self, provider: &str, outcome: &str) {
        self.repo.inc_provider_close(provider, outcome);
    }

    pub fn record_tool_call(&self, tool: &str, outcome: &str) {
        self.repo.inc_tool_invocation(tool, outcome);
    }

    pub fn record_shutdown(&self, elapsed: Duration) {
        self.repo.observe_shutdown_duration(elapsed.as_secs_f64());
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
