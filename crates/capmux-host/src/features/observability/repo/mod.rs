use prometheus::{
    opts, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    active_providers: Gauge,
    providers_initialized_total: IntCounter,
    provider_close_total: CounterVec,
    tool_invocation_total: CounterVec,
    shutdown_duration_seconds: Histogram,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let active_providers =
            Gauge::with_opts(opts!("capmux_active_providers", "Providers currently serving"))
                .map_err(|e| e.to_string())?;
        let providers_initialized_total = IntCounter::with_opts(opts!(
            "capmux_providers_initialized_total",
            "Providers initialized since start"
        ))
        .map_err(|e| e.to_string())?;
        let provider_close_total = CounterVec::new(
            opts!(
                "capmux_provider_close_total",
                "Provider close outcomes (closed / failed / pending)"
            ),
            &["provider", "outcome"],
        )
        .map_err(|e| e.to_string())?;
        let tool_invocation_total = CounterVec::new(
            opts!("capmux_tool_invocation_total", "Tool calls by outcome"),
            &["tool", "outcome"],
        )
        .map_err(|e| e.to_string())?;
        let shutdown_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "capmux_shutdown_duration_seconds",
            "Time spent closing providers (seconds)",
        ))
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(active_providers.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(providers_initialized_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(provider_close_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(tool_invocation_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(shutdown_duration_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            active_providers,
            providers_initialized_total,
            provider_close_total,
            tool_invocation_total,
            shutdown_duration_seconds,
        })
    }

    pub fn set_active_providers(&self, count: f64) {
        self.active_providers.set(count);
    }

    pub fn inc_providers_initialized(&self) {
        self.providers_initialized_total.inc();
    }

    pub fn inc_provider_close(&self, provider: &str, outcome: &str) {
        self.provider_close_total
            .with_label_values(&[provider, outcome])
            .inc();
    }

    pub fn inc_tool_invocation(&self, tool: &str, outcome: &str) {
        self.tool_invocation_total
            .with_label_values(&[tool, outcome])
            .inc();
    }

    pub fn observe_shutdown_duration(&self, seconds: f64) {
        self.shutdown_duration_seconds.observe(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
