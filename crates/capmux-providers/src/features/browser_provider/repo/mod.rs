use async_trait::async_trait;
use capmux_core::{CoreError, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EXECUTABLE_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const WINDOW_SIZE: &str = "1280,800";
const LISTENING_PREFIX: &str = "DevTools listening on ";
const CLOSE_GRACE: Duration = Duration::from_secs(3);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;
type PausedFrames = Arc<Mutex<Option<Value>>>;

/// How the browser process is started.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserLaunch {
    pub user_agent: String,
    pub language: String,
    pub profile_dir: PathBuf,
    pub headless: bool,
    /// Time the process gets to open its DevTools endpoint.
    pub startup_timeout: Duration,
}

/// One long-lived page driven over the Chrome DevTools protocol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserRepository: Send + Sync {
    /// Sends a DevTools command to the page and returns its `result`.
    async fn call(&self, method: String, params: Value) -> Result<Value>;

    /// Call frames from the last `Debugger.paused` event, while paused.
    fn paused_frames(&self) -> Option<Value>;

    /// Ends the page session and stops the browser.
    async fn shutdown(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Launches a local Chromium-family browser on first use and keeps it
/// running until `shutdown`. A session whose connection dropped is
/// relaunched on the next call.
pub struct DevToolsBrowserRepository {
    executable: Option<PathBuf>,
    launch: BrowserLaunch,
    session: AsyncMutex<Option<Arc<DevToolsSession>>>,
    paused: PausedFrames,
}

impl DevToolsBrowserRepository {
    /// An empty `executable` searches `PATH` for a known browser.
    pub fn new(executable: &str, launch: BrowserLaunch) -> Self {
        let executable = if executable.trim().is_empty() {
            find_executable()
        } else {
            Some(PathBuf::from(executable.trim()))
        };
        Self {
            executable,
            launch,
            session: AsyncMutex::new(None),
            paused: PausedFrames::default(),
        }
    }

    pub fn executable(&self) -> Option<&PathBuf> {
        self.executable.as_ref()
    }

    fn command(&self) -> Result<Command> {
        let executable = self.executable.as_ref().ok_or_else(|| {
            CoreError::NotFound(format!(
                "no browser executable found (tried {})",
                EXECUTABLE_CANDIDATES.join(", ")
            ))
        })?;

        let launch = &self.launch;
        let mut command = Command::new(executable);
        if launch.headless {
            command.arg("--headless=new");
        }
        command
            .arg("--remote-debugging-port=0")
            .arg("--disable-gpu")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-features=Translate")
            .arg("--disable-extensions")
            .arg("--disable-infobars")
            .arg("--mute-audio")
            .arg("--ignore-certificate-errors")
            .arg(format!("--user-data-dir={}", launch.profile_dir.display()))
            .arg(format!("--user-agent={}", launch.user_agent))
            .arg(format!("--lang={}", launch.language))
            .arg(format!("--window-size={WINDOW_SIZE}"))
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }

    async fn session(&self) -> Result<Arc<DevToolsSession>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if !session.is_closed() {
                return Ok(Arc::clone(session));
            }
            warn!("browser connection lost, relaunching");
        }

        let session = Arc::new(self.start().await?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn start(&self) -> Result<DevToolsSession> {
        let mut child = self
            .command()?
            .spawn()
            .map_err(|e| CoreError::Io(format!("failed to launch browser: {e}")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CoreError::Io("browser stderr was not captured".to_string()))?;

        let startup = self.launch.startup_timeout;
        let url = tokio::time::timeout(startup, listening_url(stderr))
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "browser did not open DevTools within {}s",
                    startup.as_secs()
                ))
            })??;
        info!(devtools = %url, "browser started");

        *lock(&self.paused) = None;
        let session = DevToolsSession::connect(&url, Arc::clone(&self.paused)).await?;
        *lock(&session.child) = Some(child);
        session.open_page().await?;
        Ok(session)
    }
}

#[async_trait]
impl BrowserRepository for DevToolsBrowserRepository {
    async fn call(&self, method: String, params: Value) -> Result<Value> {
        let session = self.session().await?;
        debug!(method = %method, "devtools call");
        session.call(&method, params).await
    }

    fn paused_frames(&self) -> Option<Value> {
        lock(&self.paused).clone()
    }

    async fn shutdown(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
            info!("browser stopped");
        }
    }
}

/// Reads browser stderr until the DevTools endpoint is announced, then keeps
/// draining it so the browser never blocks on a full pipe.
async fn listening_url(stderr: ChildStderr) -> Result<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = devtools_url(&line) {
            let url = url.to_string();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(output = %line, "browser");
                }
            });
            return Ok(url);
        }
        debug!(output = %line, "browser");
    }
    Err(CoreError::Io(
        "browser exited before opening DevTools".to_string(),
    ))
}

fn devtools_url(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix(LISTENING_PREFIX)
        .map(str::trim)
        .filter(|url| url.starts_with("ws://"))
}

fn command_frame(id: u64, session: Option<&str>, method: &str, params: Value) -> String {
    let mut frame = json!({ "id": id, "method": method, "params": params });
    if let Some(session) = session {
        frame["sessionId"] = Value::String(session.to_string());
    }
    frame.to_string()
}

fn connection_closed() -> CoreError {
    CoreError::Io("browser connection closed".to_string())
}

#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RemoteError>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    code: i64,
    message: String,
}

/// A websocket connection to the browser plus the flattened page session
/// commands are routed to.
pub(crate) struct DevToolsSession {
    writer: AsyncMutex<SplitSink<Socket, Message>>,
    waiters: Waiters,
    next_id: AtomicU64,
    page: Mutex<Option<String>>,
    closed: CancellationToken,
    child: Mutex<Option<Child>>,
}

impl DevToolsSession {
    pub(crate) async fn connect(url: &str, paused: PausedFrames) -> Result<Self> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| CoreError::Io(format!("failed to connect to {url}: {e}")))?;
        let (writer, reader) = socket.split();

        let waiters = Waiters::default();
        let closed = CancellationToken::new();
        tokio::spawn(read_events(
            reader,
            Arc::clone(&waiters),
            paused,
            closed.clone(),
        ));

        Ok(Self {
            writer: AsyncMutex::new(writer),
            waiters,
            next_id: AtomicU64::new(1),
            page: Mutex::new(None),
            closed,
            child: Mutex::new(None),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn send(&self, session: Option<&str>, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(connection_closed());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.waiters).insert(id, tx);

        let frame = command_frame(id, session, method, params);
        if let Err(err) = self.writer.lock().await.send(Message::Text(frame)).await {
            lock(&self.waiters).remove(&id);
            return Err(CoreError::Io(format!("failed to send {method}: {err}")));
        }

        tokio::select! {
            biased;
            reply = rx => reply.unwrap_or_else(|_| Err(connection_closed())),
            _ = self.closed.cancelled() => Err(connection_closed()),
        }
    }

    /// Sends to the attached page, or to the browser before a page exists.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let page = lock(&self.page).clone();
        self.send(page.as_deref(), method, params).await
    }

    pub(crate) async fn open_page(&self) -> Result<()> {
        let target = self
            .send(None, "Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = target
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Io("Target.createTarget returned no targetId".to_string()))?;

        let attached = self
            .send(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Io("Target.attachToTarget returned no sessionId".to_string()))?;
        *lock(&self.page) = Some(session_id.to_string());

        self.call("Page.enable", json!({})).await?;
        self.call("Runtime.enable", json!({})).await?;
        debug!(target = target_id, "page attached");
        Ok(())
    }

    pub(crate) async fn close(&self) {
        if !self.is_closed() {
            let bye = self.send(None, "Browser.close", json!({}));
            if tokio::time::timeout(CLOSE_GRACE, bye).await.is_err() {
                debug!("browser ignored Browser.close");
            }
        }
        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "browser already exited");
            }
        }
        self.closed.cancel();
    }
}

async fn read_events(
    mut reader: SplitStream<Socket>,
    waiters: Waiters,
    paused: PausedFrames,
    closed: CancellationToken,
) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "DevTools connection failed");
                break;
            }
        };
        match serde_json::from_str::<Incoming>(&text) {
            Ok(incoming) => route(incoming, &waiters, &paused),
            Err(err) => warn!(error = %err, "unreadable DevTools message"),
        }
    }

    closed.cancel();
    for (_, waiter) in lock(&waiters).drain() {
        let _ = waiter.send(Err(connection_closed()));
    }
}

fn route(incoming: Incoming, waiters: &Waiters, paused: &PausedFrames) {
    if let Some(id) = incoming.id {
        let Some(waiter) = lock(waiters).remove(&id) else {
            return;
        };
        let outcome = match incoming.error {
            Some(err) => Err(CoreError::Io(format!(
                "DevTools error {}: {}",
                err.code, err.message
            ))),
            None => Ok(incoming.result.unwrap_or(Value::Null)),
        };
        let _ = waiter.send(outcome);
        return;
    }

    match incoming.method.as_deref() {
        Some("Debugger.paused") => {
            let frames = incoming
                .params
                .get("callFrames")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            *lock(paused) = Some(frames);
        }
        Some("Debugger.resumed") => *lock(paused) = None,
        Some("Inspector.detached") => warn!("page detached from DevTools"),
        _ => {}
    }
}

fn find_executable() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        EXECUTABLE_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}
