pub mod controller;
pub mod repo;
pub mod service;

pub use service::BrowserConfig;

use async_trait::async_trait;
use capmux_core::config::load_prompt;
use capmux_core::merge::merge_and_check;
use capmux_core::{
    config_snapshot, CapabilityProvider, CapabilitySet, ProviderContext, ProviderFactory, Result,
};
use controller::BrowserProviderController;
use repo::{BrowserRepository, DevToolsBrowserRepository};
use serde_json::{Map, Value};
use service::BrowserProviderService;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const BROWSER_PROVIDER_NAME: &str = "Browser";

const BROWSER_PROMPT_DEFAULT: &str = "\
You are a web browsing assistant driving one browser page. The page keeps its state \
between calls, so navigate first and then interact with it.

- `browser_navigate` loads a URL. Only http, https, file and about URLs are accepted.
- `browser_click`, `browser_fill`, `browser_select` and `browser_hover` take a CSS selector.
- `browser_evaluate` runs JavaScript in the page and returns the result.
- `browser_screenshot` saves a PNG to the data directory; tell the user where.
- To debug scripts, call `browser_debug_enable` first. Then use `browser_set_breakpoint` \
(1-based line numbers), `browser_pause`, `browser_resume`, `browser_get_callstack` and \
`browser_remove_breakpoint`.
- Page loads are cut off after the configured URL timeout; retry once before giving up.
";

/// Drives a local Chromium page over the DevTools protocol.
pub struct BrowserProvider {
    ctx: ProviderContext,
    caps: CapabilitySet,
    config: BrowserConfig,
    repo: Option<Arc<dyn BrowserRepository>>,
    controller: Mutex<Option<Arc<BrowserProviderController>>>,
    inflight: CancellationToken,
}

impl BrowserProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        let inflight = ctx.cancel_token().child_token();
        let config = BrowserConfig::for_host(ctx.host());
        Self {
            ctx,
            caps: CapabilitySet::new(BROWSER_PROVIDER_NAME),
            config,
            repo: None,
            controller: Mutex::new(None),
            inflight,
        }
    }

    /// The default repository is built in `init` so it sees the merged
    /// `executable` setting.
    pub fn with_repository(ctx: ProviderContext, repo: Arc<dyn BrowserRepository>) -> Self {
        Self {
            repo: Some(repo),
            ..Self::new(ctx)
        }
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|ctx: ProviderContext| -> Result<Box<dyn CapabilityProvider>> {
            Ok(Box::new(BrowserProvider::new(ctx)))
        })
    }

    pub fn settings(&self) -> &BrowserConfig {
        &self.config
    }

    fn repository(&self) -> Arc<dyn BrowserRepository> {
        match &self.repo {
            Some(repo) => Arc::clone(repo),
            None => {
                let chromium =
                    DevToolsBrowserRepository::new(&self.config.executable, self.config.launch());
                match chromium.executable() {
                    Some(path) => {
                        info!(parent: self.ctx.span(), executable = %path.display(), "using browser")
                    }
                    None => warn!(
                        parent: self.ctx.span(),
                        "no browser executable found; browser tools will fail until one is installed"
                    ),
                }
                Arc::new(chromium)
            }
        }
    }
}

#[async_trait]
impl CapabilityProvider for BrowserProvider {
    fn name(&self) -> &'static str {
        BROWSER_PROVIDER_NAME
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    fn config(&self) -> String {
        config_snapshot(BROWSER_PROVIDER_NAME, &self.config)
    }

    fn load_config(&mut self, section: &Map<String, Value>) -> Result<()> {
        merge_and_check(&mut self.config, section)
    }

    async fn init(&mut self) -> Result<()> {
        let prompt = load_prompt(&self.config.prompt_file, BROWSER_PROMPT_DEFAULT)?;
        let service = BrowserProviderService::new(self.repository(), self.config.clone());
        service.prepare().await?;

        let controller = Arc::new(BrowserProviderController::new(
            service,
            prompt,
            self.config.call_timeout(),
            self.inflight.clone(),
        ));
        controller.register(&self.caps)?;
        if let Ok(mut slot) = self.controller.lock() {
            *slot = Some(controller);
        }

        info!(
            parent: self.ctx.span(),
            headless = self.config.headless,
            url_timeout = self.config.url_timeout,
            profile = %self.config.browser_data_path,
            "browser provider initialized"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inflight.cancel();
        let controller = self.controller.lock().ok().and_then(|mut slot| slot.take());
        if let Some(controller) = controller {
            controller.shutdown().await;
        }
        info!(parent: self.ctx.span(), "browser provider closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::browser_provider::repo::MockBrowserRepository;
    use capmux_core::{ConfigCheck, CoreError, HostConfig};

    fn context(base: &std::path::Path) -> ProviderContext {
        ProviderContext::new(
            BROWSER_PROVIDER_NAME,
            Arc::new(HostConfig::default().with_base_path(base)),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_init_prepares_dirs_and_registers() {
        let base = tempfile::tempdir().unwrap();
        let mut provider =
            BrowserProvider::with_repository(context(base.path()), Arc::new(MockBrowserRepository::new()));
        provider.init().await.unwrap();

        assert!(base.path().join("browser").is_dir());
        assert!(base.path().join("data").is_dir());
        assert_eq!(provider.tools().len(), 13);
        assert_eq!(provider.prompts().len(), 1);
    }

    #[test]
    fn test_load_config_coerces_and_validates() {
        let base = tempfile::tempdir().unwrap();
        let mut provider = BrowserProvider::new(context(base.path()));
        let section = serde_json::json!({ "headless": "false", "url_timeout": "15" });
        provider.load_config(section.as_object().unwrap()).unwrap();

        assert!(!provider.settings().headless);
        assert_eq!(provider.settings().url_timeout, 15);

        let before = provider.settings().clone();
        let bad = serde_json::json!({ "url_timeout": 5, "timeout": 0 });
        let err = provider.load_config(bad.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
        assert_eq!(provider.settings(), &before);
    }

    #[test]
    fn test_config_round_trip_passes_validation() {
        let base = tempfile::tempdir().unwrap();
        let mut provider = BrowserProvider::new(context(base.path()));
        let snapshot: Value = serde_json::from_str(&provider.config()).unwrap();

        provider.load_config(snapshot.as_object().unwrap()).unwrap();
        assert!(provider.settings().check().is_ok());
    }

    #[tokio::test]
    async fn test_close_shuts_down_browser() {
        let base = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_shutdown().times(1).returning(|| ());
        let mut provider = BrowserProvider::with_repository(context(base.path()), Arc::new(repo));
        provider.init().await.unwrap();

        provider.close().await.unwrap();
        assert!(provider.inflight.is_cancelled());
    }

    #[test]
    fn test_close_cancels_inflight_runs() {
        let base = tempfile::tempdir().unwrap();
        let provider = BrowserProvider::new(context(base.path()));

        tokio_test::block_on(provider.close()).unwrap();
        assert!(provider.inflight.is_cancelled());
        assert!(!provider.context().is_cancelled());
    }
}
