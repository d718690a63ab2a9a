use crate::features::browser_provider::repo::{BrowserLaunch, BrowserRepository};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use capmux_core::config::{check_positive, check_prompt_file};
use capmux_core::{ConfigCheck, CoreError, HostConfig, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SINGLETON_LOCK: &str = "SingletonLock";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_WIDTH: u64 = 1280;
const DEFAULT_HEIGHT: u64 = 800;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub prompt_file: String,
    pub headless: bool,
    /// Seconds allowed for a whole tool call.
    pub timeout: i64,
    /// Seconds a navigation may take to finish loading.
    pub url_timeout: i64,
    /// Seconds to wait for a selector to match a visible element.
    pub selector_query_timeout: i64,
    pub user_agent: String,
    pub default_language: String,
    /// Where screenshots are written.
    pub data_path: String,
    /// Browser profile directory.
    pub browser_data_path: String,
    /// Empty means search `PATH`.
    pub executable: String,
}

impl BrowserConfig {
    pub fn for_host(host: &HostConfig) -> Self {
        Self {
            prompt_file: String::new(),
            headless: true,
            timeout: 30,
            url_timeout: 10,
            selector_query_timeout: 20,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_language: "en-US".to_string(),
            data_path: host.data_dir().to_string_lossy().into_owned(),
            browser_data_path: host.browser_dir().to_string_lossy().into_owned(),
            executable: String::new(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        seconds(self.timeout)
    }

    pub fn launch(&self) -> BrowserLaunch {
        BrowserLaunch {
            user_agent: self.user_agent.clone(),
            language: self.default_language.clone(),
            profile_dir: PathBuf::from(&self.browser_data_path),
            headless: self.headless,
            startup_timeout: LAUNCH_TIMEOUT,
        }
    }
}

impl ConfigCheck for BrowserConfig {
    fn check(&self) -> Result<()> {
        check_positive("timeout", self.timeout)?;
        check_positive("url_timeout", self.url_timeout)?;
        check_positive("selector_query_timeout", self.selector_query_timeout)?;
        if self.data_path.trim().is_empty() {
            return Err(CoreError::InvalidConfig("data_path must not be empty".to_string()));
        }
        if self.browser_data_path.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "browser_data_path must not be empty".to_string(),
            ));
        }
        check_prompt_file(&self.prompt_file)
    }
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(value.max(1) as u64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub path: PathBuf,
    pub png: Vec<u8>,
}

/// Screenshot options; no selector means the whole page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenshotRequest {
    pub name: String,
    pub selector: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
}

/// Breakpoint position with 1-based line and column.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub url: String,
    pub line: u64,
    pub column: Option<u64>,
    pub condition: Option<String>,
}

/// Page and debugger operations that answer with a text summary.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserAction {
    Navigate { url: String },
    Click { selector: String },
    Fill { selector: String, value: String },
    Select { selector: String, value: String },
    Hover { selector: String },
    Evaluate { script: String },
    Debugging { enabled: bool },
    SetBreakpoint(Breakpoint),
    RemoveBreakpoint { id: String },
    Pause,
    Resume,
    CallStack,
}

/// Viewport-relative box of a visible element.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    scroll_x: f64,
    #[serde(default)]
    scroll_y: f64,
}

impl ElementBox {
    fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

pub struct BrowserProviderService {
    repo: Arc<dyn BrowserRepository>,
    config: BrowserConfig,
    debugging: AtomicBool,
}

impl BrowserProviderService {
    pub fn new(repo: Arc<dyn BrowserRepository>, config: BrowserConfig) -> Self {
        Self {
            repo,
            config,
            debugging: AtomicBool::new(false),
        }
    }

    pub fn profile_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.browser_data_path)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.data_path)
    }

    /// Creates the profile and data directories and clears a lock left by
    /// a browser that did not exit cleanly.
    pub async fn prepare(&self) -> Result<()> {
        let profile = self.profile_dir();
        create_dir(&profile).await?;
        create_dir(&self.data_dir()).await?;

        let lock = profile.join(SINGLETON_LOCK);
        // The lock is usually a dangling symlink, so check the link itself.
        if tokio::fs::symlink_metadata(&lock).await.is_ok() {
            tokio::fs::remove_file(&lock).await.map_err(|e| {
                CoreError::Io(format!("failed to remove {}: {e}", lock.display()))
            })?;
            info!(lock = %lock.display(), "removed stale browser lock");
        }
        Ok(())
    }

    pub async fn perform(&self, action: BrowserAction) -> Result<String> {
        match action {
            BrowserAction::Navigate { url } => self.navigate(&url).await,
            BrowserAction::Click { selector } => self.click(&selector).await,
            BrowserAction::Fill { selector, value } => self.fill(&selector, &value).await,
            BrowserAction::Select { selector, value } => self.select(&selector, &value).await,
            BrowserAction::Hover { selector } => self.hover(&selector).await,
            BrowserAction::Evaluate { script } => self.evaluate(&script).await,
            BrowserAction::Debugging { enabled } => self.set_debugging(enabled).await,
            BrowserAction::SetBreakpoint(breakpoint) => self.set_breakpoint(&breakpoint).await,
            BrowserAction::RemoveBreakpoint { id } => self.remove_breakpoint(&id).await,
            BrowserAction::Pause => self.debugger("Debugger.pause", "Execution paused").await,
            BrowserAction::Resume => self.debugger("Debugger.resume", "Execution resumed").await,
            BrowserAction::CallStack => self.call_stack(),
        }
    }

    pub async fn shutdown(&self) {
        self.repo.shutdown().await;
    }

    async fn navigate(&self, url: &str) -> Result<String> {
        let url = checked_url(url)?;
        let reply = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = reply.get("errorText").and_then(Value::as_str) {
            return Err(CoreError::Io(format!("failed to navigate to {url}: {error}")));
        }

        let limit = seconds(self.config.url_timeout);
        let deadline = Instant::now() + limit;
        while self.evaluate_value("document.readyState".to_string()).await? != json!("complete") {
            if Instant::now() >= deadline {
                return Err(CoreError::Timeout(format!(
                    "{url} did not finish loading within {}s",
                    limit.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        info!(url = url, "navigated");
        Ok(format!("Navigated to {url}"))
    }

    pub async fn screenshot(&self, request: &ScreenshotRequest) -> Result<Screenshot> {
        let params = match request.selector.as_deref() {
            Some(selector) => {
                let element = self.wait_visible(selector).await?;
                json!({
                    "format": "png",
                    "captureBeyondViewport": true,
                    "clip": {
                        "x": element.x + element.scroll_x,
                        "y": element.y + element.scroll_y,
                        "width": element.width,
                        "height": element.height,
                        "scale": 1
                    }
                })
            }
            None => {
                self.call(
                    "Emulation.setDeviceMetricsOverride",
                    json!({
                        "width": request.width.unwrap_or(DEFAULT_WIDTH),
                        "height": request.height.unwrap_or(DEFAULT_HEIGHT),
                        "deviceScaleFactor": 1,
                        "mobile": false
                    }),
                )
                .await?;
                json!({ "format": "png", "captureBeyondViewport": true })
            }
        };

        let reply = self.call("Page.captureScreenshot", params).await?;
        let data = reply
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Io("screenshot returned no image data".to_string()))?;
        let png = STANDARD.decode(data).map_err(|e| {
            CoreError::SerializationError(format!("screenshot data is not base64: {e}"))
        })?;

        let path = self.data_dir().join(screenshot_file_name(&request.name));
        tokio::fs::write(&path, &png)
            .await
            .map_err(|e| CoreError::Io(format!("failed to save {}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = png.len(), "screenshot saved");
        Ok(Screenshot { path, png })
    }

    async fn click(&self, selector: &str) -> Result<String> {
        match self.wait_visible(selector).await {
            Ok(element) => {
                let (x, y) = element.center();
                for kind in ["mousePressed", "mouseReleased"] {
                    self.call(
                        "Input.dispatchMouseEvent",
                        json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
                    )
                    .await?;
                }
                Ok(format!("Clicked element {selector}"))
            }
            Err(CoreError::Timeout(reason)) => {
                debug!(selector = selector, reason = %reason, "clicking through script");
                self.run_element_script(selector, "el.click();", "click").await?;
                Ok(format!("Clicked element {selector} through script"))
            }
            Err(err) => Err(err),
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<String> {
        match self.wait_visible(selector).await {
            Ok(_) => {
                self.run_element_script(selector, "el.focus(); el.value = '';", "fill")
                    .await?;
                self.call("Input.insertText", json!({ "text": value })).await?;
                Ok(format!("Filled {selector} with {value}"))
            }
            Err(CoreError::Timeout(reason)) => {
                debug!(selector = selector, reason = %reason, "filling through script");
                let body = format!(
                    "el.value = {}; \
                     el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                     el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
                    js_string(value)
                );
                self.run_element_script(selector, &body, "fill").await?;
                Ok(format!("Filled {selector} with {value} through script"))
            }
            Err(err) => Err(err),
        }
    }

    async fn select(&self, selector: &str, value: &str) -> Result<String> {
        if let Err(err) = self.wait_visible(selector).await {
            if !matches!(err, CoreError::Timeout(_)) {
                return Err(err);
            }
            debug!(selector = selector, "select element not visible, setting it anyway");
        }
        let body = format!(
            "el.value = {value}; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             if (el.value !== {value}) return {{ success: false, error: 'no option with that value' }};",
            value = js_string(value)
        );
        self.run_element_script(selector, &body, "select").await?;
        Ok(format!("Selected {value} in {selector}"))
    }

    async fn hover(&self, selector: &str) -> Result<String> {
        match self.wait_visible(selector).await {
            Ok(element) => {
                let (x, y) = element.center();
                self.call(
                    "Input.dispatchMouseEvent",
                    json!({ "type": "mouseMoved", "x": x, "y": y }),
                )
                .await?;
                Ok(format!("Hovered over {selector}"))
            }
            Err(CoreError::Timeout(reason)) => {
                debug!(selector = selector, reason = %reason, "hovering through script");
                let body = "['mouseenter', 'mouseover', 'mousemove'].forEach((type) => \
                            el.dispatchEvent(new MouseEvent(type, { view: window, bubbles: true, cancelable: true })));";
                self.run_element_script(selector, body, "hover").await?;
                Ok(format!("Hovered over {selector} through script"))
            }
            Err(err) => Err(err),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<String> {
        let expression = if needs_function_wrapper(script) {
            format!("(() => {{\n{script}\n}})()")
        } else {
            script.to_string()
        };

        Ok(match self.evaluate_value(expression).await? {
            Value::Null => "Script finished; the result is null or undefined".to_string(),
            Value::String(text) => format!("Script result: {text}"),
            other => format!("Script result: {other}"),
        })
    }

    async fn set_debugging(&self, enabled: bool) -> Result<String> {
        let method = if enabled {
            "Debugger.enable"
        } else {
            "Debugger.disable"
        };
        self.call(method, json!({})).await?;
        self.debugging.store(enabled, Ordering::SeqCst);
        info!(enabled = enabled, "javascript debugging toggled");
        Ok(format!(
            "JavaScript debugging {}",
            if enabled { "enabled" } else { "disabled" }
        ))
    }

    fn require_debugging(&self) -> Result<()> {
        if self.debugging.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::InvalidArgument(
                "debugging is off; enable it with browser_debug_enable first".to_string(),
            ))
        }
    }

    async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<String> {
        self.require_debugging()?;
        if breakpoint.line == 0 {
            return Err(CoreError::InvalidArgument(
                "line numbers start at 1".to_string(),
            ));
        }

        let mut params = json!({ "url": breakpoint.url, "lineNumber": breakpoint.line - 1 });
        if let Some(column) = breakpoint.column.filter(|c| *c > 0) {
            params["columnNumber"] = json!(column - 1);
        }
        if let Some(condition) = &breakpoint.condition {
            params["condition"] = json!(condition);
        }

        let reply = self.call("Debugger.setBreakpointByUrl", params).await?;
        let id = reply
            .get("breakpointId")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Io("breakpoint was not assigned an id".to_string()))?;
        let resolved = reply
            .get("locations")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Ok(format!(
            "Breakpoint {id} set at {}:{} ({resolved} resolved locations)",
            breakpoint.url, breakpoint.line
        ))
    }

    async fn remove_breakpoint(&self, id: &str) -> Result<String> {
        self.require_debugging()?;
        self.call("Debugger.removeBreakpoint", json!({ "breakpointId": id }))
            .await?;
        Ok(format!("Breakpoint {id} removed"))
    }

    async fn debugger(&self, method: &str, done: &str) -> Result<String> {
        self.require_debugging()?;
        self.call(method, json!({})).await?;
        Ok(done.to_string())
    }

    fn call_stack(&self) -> Result<String> {
        self.require_debugging()?;
        let frames = self.repo.paused_frames().ok_or_else(|| {
            CoreError::InvalidArgument("execution is not paused".to_string())
        })?;
        let lines = describe_frames(&frames);
        if lines.is_empty() {
            return Ok("Paused with an empty call stack".to_string());
        }
        Ok(lines.join("\n"))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.repo.call(method.to_string(), params).await
    }

    /// Value of a page expression; a thrown exception becomes an error.
    async fn evaluate_value(&self, expression: String) -> Result<Value> {
        let reply = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
            )
            .await?;
        if let Some(details) = reply.get("exceptionDetails") {
            return Err(CoreError::InvalidArgument(format!(
                "script threw: {}",
                exception_text(details)
            )));
        }
        Ok(reply.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    async fn wait_visible(&self, selector: &str) -> Result<ElementBox> {
        let script = element_box_script(selector);
        let limit = seconds(self.config.selector_query_timeout);
        let deadline = Instant::now() + limit;
        loop {
            let value = self.evaluate_value(script.clone()).await?;
            if !value.is_null() {
                return Ok(serde_json::from_value(value)?);
            }
            if Instant::now() >= deadline {
                return Err(CoreError::Timeout(format!(
                    "no visible element matched {selector} within {}s",
                    limit.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Runs `body` with `el` bound to the first match of `selector`. The
    /// body may return early with `{ success: false, error }`.
    async fn run_element_script(&self, selector: &str, body: &str, action: &str) -> Result<()> {
        let script = format!(
            "(() => {{ try {{ \
               const el = document.querySelector({selector}); \
               if (!el) return {{ success: false, error: 'element not found' }}; \
               {body} \
               return {{ success: true }}; \
             }} catch (e) {{ return {{ success: false, error: String(e) }}; }} }})()",
            selector = js_string(selector)
        );
        let outcome = self.evaluate_value(script).await?;
        if outcome.get("success").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }
        let reason = outcome
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        Err(CoreError::InvalidArgument(format!(
            "{action} on {selector} failed: {reason}"
        )))
    }
}

fn checked_url(url: &str) -> Result<&str> {
    let url = url.trim();
    let supported = ["http://", "https://", "file://", "about:"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    if !supported {
        return Err(CoreError::InvalidArgument(format!(
            "url '{url}' must start with http://, https://, file:// or about:"
        )));
    }
    Ok(url)
}

/// JSON string literals are valid JavaScript string literals.
fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn element_box_script(selector: &str) -> String {
    format!(
        "(() => {{ \
           const el = document.querySelector({}); \
           if (!el) return null; \
           const rect = el.getBoundingClientRect(); \
           const style = window.getComputedStyle(el); \
           if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' || style.display === 'none') return null; \
           return {{ x: rect.left, y: rect.top, width: rect.width, height: rect.height, scrollX: window.scrollX, scrollY: window.scrollY }}; \
         }})()",
        js_string(selector)
    )
}

/// Bare `return` statements are only legal inside a function body.
fn needs_function_wrapper(script: &str) -> bool {
    let trimmed = script.trim_start();
    if trimmed.starts_with("(function") || trimmed.starts_with("(() =>") {
        return false;
    }
    script
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .any(|word| word == "return")
}

fn exception_text(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("uncaught exception")
        .to_string()
}

fn describe_frames(frames: &Value) -> Vec<String> {
    let Some(frames) = frames.as_array() else {
        return Vec::new();
    };
    frames
        .iter()
        .enumerate()
        .map(|(depth, frame)| {
            let name = frame
                .get("functionName")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .unwrap_or("(anonymous)");
            let url = frame.get("url").and_then(Value::as_str).unwrap_or("");
            let line = frame
                .pointer("/location/lineNumber")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let column = frame
                .pointer("/location/columnNumber")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            format!("#{depth} {name} {url}:{}:{}", line + 1, column + 1)
        })
        .collect()
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| CoreError::Io(format!("failed to create {}: {e}", path.display())))
}

/// `<name>_<random>.png`, keeping only characters safe in a file name.
fn screenshot_file_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_suffix(".png").unwrap_or(name);
    let stem: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let stem = if stem.is_empty() {
        "screenshot".to_string()
    } else {
        stem
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stem}_{}.png", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::browser_provider::repo::MockBrowserRepository;

    fn config(base: &Path) -> BrowserConfig {
        BrowserConfig::for_host(&HostConfig::default().with_base_path(base))
    }

    fn evaluated(value: Value) -> Value {
        json!({ "result": { "type": "object", "value": value } })
    }

    fn visible_box() -> Value {
        evaluated(json!({ "x": 10.0, "y": 20.0, "width": 100.0, "height": 40.0, "scrollX": 0, "scrollY": 300 }))
    }

    /// Answers `Runtime.evaluate` by looking at the expression and records
    /// every other method it sees.
    fn scripted_page(repo: &mut MockBrowserRepository, on_other: fn(&str, &Value) -> Value) {
        repo.expect_call().returning(move |method, params| {
            if method != "Runtime.evaluate" {
                return Ok(on_other(&method, &params));
            }
            let expression = params["expression"].as_str().unwrap_or_default();
            Ok(if expression == "document.readyState" {
                evaluated(json!("complete"))
            } else if expression.contains("getBoundingClientRect") {
                visible_box()
            } else if expression.contains("success: true") {
                evaluated(json!({ "success": true }))
            } else {
                evaluated(json!(42))
            })
        });
    }

    fn service(repo: MockBrowserRepository, base: &Path) -> BrowserProviderService {
        BrowserProviderService::new(Arc::new(repo), config(base))
    }

    #[test]
    fn test_defaults_pass_check() {
        let config = config(Path::new("/tmp/capmux-browser"));
        assert_eq!(config.url_timeout, 10);
        assert_eq!(config.browser_data_path, "/tmp/capmux-browser/browser");
        assert!(config.check().is_ok());
        assert_eq!(config.launch().profile_dir, PathBuf::from("/tmp/capmux-browser/browser"));
    }

    #[test]
    fn test_non_positive_timeouts_rejected() {
        let base = config(Path::new("/tmp/capmux-browser"));
        for broken in [
            BrowserConfig { timeout: 0, ..base.clone() },
            BrowserConfig { url_timeout: -3, ..base.clone() },
            BrowserConfig { selector_query_timeout: 0, ..base.clone() },
        ] {
            assert!(matches!(broken.check(), Err(CoreError::InvalidConfig(_))));
        }
    }

    #[tokio::test]
    async fn test_prepare_removes_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let profile = PathBuf::from(&config.browser_data_path);
        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(profile.join(SINGLETON_LOCK), "host-1234").unwrap();

        let service = BrowserProviderService::new(Arc::new(MockBrowserRepository::new()), config);
        service.prepare().await.unwrap();

        assert!(!profile.join(SINGLETON_LOCK).exists());
        assert!(service.data_dir().is_dir());
    }

    #[tokio::test]
    async fn test_navigate_waits_for_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call()
            .withf(|method, params| method == "Page.navigate" && params["url"] == "https://example.com")
            .times(1)
            .returning(|_, _| Ok(json!({ "frameId": "F1" })));
        repo.expect_call()
            .withf(|method, _| method == "Runtime.evaluate")
            .returning(|_, _| Ok(evaluated(json!("complete"))));

        let text = service(repo, dir.path())
            .perform(BrowserAction::Navigate {
                url: " https://example.com ".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(text, "Navigated to https://example.com");
    }

    #[tokio::test]
    async fn test_navigation_error_text_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call()
            .returning(|_, _| Ok(json!({ "errorText": "net::ERR_NAME_NOT_RESOLVED" })));

        let err = service(repo, dir.path())
            .perform(BrowserAction::Navigate {
                url: "https://nowhere.invalid".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Io(msg) if msg.contains("ERR_NAME_NOT_RESOLVED")));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_never_reaches_browser() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call().never();

        let err = service(repo, dir.path())
            .perform(BrowserAction::Navigate {
                url: "javascript:alert(1)".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_click_presses_at_element_center() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        scripted_page(&mut repo, |method, params| {
            assert_eq!(method, "Input.dispatchMouseEvent");
            assert_eq!(params["x"], 60.0);
            assert_eq!(params["y"], 40.0);
            json!({})
        });

        let text = service(repo, dir.path())
            .perform(BrowserAction::Click {
                selector: "#submit".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(text, "Clicked element #submit");
    }

    #[tokio::test]
    async fn test_invisible_element_falls_back_to_script() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.selector_query_timeout = 1;
        let mut repo = MockBrowserRepository::new();
        repo.expect_call()
            .withf(|method, _| method == "Runtime.evaluate")
            .returning(|_, params| {
                let expression = params["expression"].as_str().unwrap_or_default();
                Ok(if expression.contains("getBoundingClientRect") {
                    evaluated(Value::Null)
                } else {
                    assert!(expression.contains("el.click()"));
                    evaluated(json!({ "success": true }))
                })
            });

        let text = BrowserProviderService::new(Arc::new(repo), config)
            .perform(BrowserAction::Click {
                selector: "#hidden".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(text, "Clicked element #hidden through script");
    }

    #[tokio::test]
    async fn test_fill_inserts_text_after_clearing() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        scripted_page(&mut repo, |method, params| {
            assert_eq!(method, "Input.insertText");
            assert_eq!(params["text"], "it's \"quoted\"");
            json!({})
        });

        let text = service(repo, dir.path())
            .perform(BrowserAction::Fill {
                selector: "input[name=q]".to_string(),
                value: "it's \"quoted\"".to_string(),
            })
            .await
            .unwrap();

        assert!(text.starts_with("Filled input[name=q]"));
    }

    #[tokio::test]
    async fn test_select_reports_missing_option() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call().returning(|_, params| {
            let expression = params["expression"].as_str().unwrap_or_default();
            Ok(if expression.contains("getBoundingClientRect") {
                visible_box()
            } else {
                evaluated(json!({ "success": false, "error": "no option with that value" }))
            })
        });

        let err = service(repo, dir.path())
            .perform(BrowserAction::Select {
                selector: "select#size".to_string(),
                value: "XXL".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::InvalidArgument(msg) if msg.contains("no option")));
    }

    #[tokio::test]
    async fn test_hover_moves_mouse() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        scripted_page(&mut repo, |method, params| {
            assert_eq!(method, "Input.dispatchMouseEvent");
            assert_eq!(params["type"], "mouseMoved");
            json!({})
        });

        let text = service(repo, dir.path())
            .perform(BrowserAction::Hover {
                selector: "nav a".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(text, "Hovered over nav a");
    }

    #[tokio::test]
    async fn test_evaluate_wraps_bare_return_and_reports_exceptions() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call()
            .withf(|_, params| params["expression"].as_str().unwrap_or_default().starts_with("(() => {"))
            .times(1)
            .returning(|_, _| Ok(evaluated(json!("Example Domain"))));
        repo.expect_call().returning(|_, _| {
            Ok(json!({
                "result": { "type": "object" },
                "exceptionDetails": { "text": "Uncaught", "exception": { "description": "ReferenceError: nope is not defined" } }
            }))
        });
        let service = service(repo, dir.path());

        let text = service
            .perform(BrowserAction::Evaluate {
                script: "return document.title".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(text, "Script result: Example Domain");

        let err = service
            .perform(BrowserAction::Evaluate {
                script: "nope.value".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(msg) if msg.contains("ReferenceError")));
    }

    #[tokio::test]
    async fn test_screenshot_of_element_lands_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        scripted_page(&mut repo, |method, params| {
            assert_eq!(method, "Page.captureScreenshot");
            assert_eq!(params["clip"]["y"], 320.0);
            json!({ "data": "iVBORw==" })
        });
        let config = config(dir.path());
        let data_dir = PathBuf::from(&config.data_path);
        std::fs::create_dir_all(&data_dir).unwrap();

        let shot = BrowserProviderService::new(Arc::new(repo), config)
            .screenshot(&ScreenshotRequest {
                name: "home page!.png".to_string(),
                selector: Some("main".to_string()),
                ..ScreenshotRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(shot.path.parent(), Some(data_dir.as_path()));
        let file_name = shot.path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("homepage_"));
        assert_eq!(shot.png, vec![0x89, b'P', b'N', b'G']);
        assert_eq!(std::fs::read(&shot.path).unwrap(), shot.png);
    }

    #[tokio::test]
    async fn test_full_page_screenshot_sets_viewport() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call()
            .withf(|method, params| {
                method == "Emulation.setDeviceMetricsOverride"
                    && params["width"] == 1024
                    && params["height"] == DEFAULT_HEIGHT
            })
            .times(1)
            .returning(|_, _| Ok(json!({})));
        repo.expect_call()
            .withf(|method, params| method == "Page.captureScreenshot" && params.get("clip").is_none())
            .times(1)
            .returning(|_, _| Ok(json!({ "data": "AQID" })));
        let config = config(dir.path());
        std::fs::create_dir_all(&config.data_path).unwrap();

        let shot = BrowserProviderService::new(Arc::new(repo), config)
            .screenshot(&ScreenshotRequest {
                name: "full".to_string(),
                width: Some(1024),
                ..ScreenshotRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(shot.png, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_debugger_requires_enable() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call().never();

        let err = service(repo, dir.path())
            .perform(BrowserAction::Pause)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::InvalidArgument(msg) if msg.contains("browser_debug_enable")));
    }

    #[tokio::test]
    async fn test_breakpoint_lines_are_one_based() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call()
            .withf(|method, _| method == "Debugger.enable")
            .times(1)
            .returning(|_, _| Ok(json!({ "debuggerId": "D1" })));
        repo.expect_call()
            .withf(|method, params| {
                method == "Debugger.setBreakpointByUrl"
                    && params["lineNumber"] == 9
                    && params["columnNumber"] == 2
                    && params["condition"] == "x > 1"
            })
            .times(1)
            .returning(|_, _| Ok(json!({ "breakpointId": "1:9:2:app.js", "locations": [{}] })));
        repo.expect_call()
            .withf(|method, params| method == "Debugger.removeBreakpoint" && params["breakpointId"] == "1:9:2:app.js")
            .times(1)
            .returning(|_, _| Ok(json!({})));
        let service = service(repo, dir.path());

        service.perform(BrowserAction::Debugging { enabled: true }).await.unwrap();
        let set = service
            .perform(BrowserAction::SetBreakpoint(Breakpoint {
                url: "https://a.test/app.js".to_string(),
                line: 10,
                column: Some(3),
                condition: Some("x > 1".to_string()),
            }))
            .await
            .unwrap();
        assert!(set.starts_with("Breakpoint 1:9:2:app.js set at https://a.test/app.js:10"));
        assert!(set.contains("1 resolved"));

        let removed = service
            .perform(BrowserAction::RemoveBreakpoint {
                id: "1:9:2:app.js".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(removed, "Breakpoint 1:9:2:app.js removed");
    }

    #[tokio::test]
    async fn test_call_stack_lists_paused_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = MockBrowserRepository::new();
        repo.expect_call().returning(|_, _| Ok(json!({})));
        repo.expect_paused_frames().times(1).returning(|| None);
        repo.expect_paused_frames().returning(|| {
            Some(json!([
                { "functionName": "tick", "url": "https://a.test/app.js", "location": { "lineNumber": 4, "columnNumber": 0 } },
                { "functionName": "", "url": "https://a.test/app.js", "location": { "lineNumber": 20, "columnNumber": 8 } }
            ]))
        });
        let service = service(repo, dir.path());
        service.perform(BrowserAction::Debugging { enabled: true }).await.unwrap();

        let err = service.perform(BrowserAction::CallStack).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(msg) if msg.contains("not paused")));

        let stack = service.perform(BrowserAction::CallStack).await.unwrap();
        assert_eq!(
            stack,
            "#0 tick https://a.test/app.js:5:1\n#1 (anonymous) https://a.test/app.js:21:9"
        );
    }

    #[test]
    fn test_function_wrapper_detection() {
        assert!(needs_function_wrapper("const t = document.title; return t;"));
        assert!(!needs_function_wrapper("document.title"));
        assert!(!needs_function_wrapper("(function() { return 1; })()"));
        assert!(!needs_function_wrapper("returnValue + 1"));
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a[name="q"]"#), r#""a[name=\"q\"]""#);
    }

    #[test]
    fn test_screenshot_file_name_defaults() {
        let name = screenshot_file_name("");
        assert!(name.starts_with("screenshot_"));
        assert_ne!(name, screenshot_file_name(""));
    }
}
