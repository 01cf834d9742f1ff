// ─── Lifecycle Controller ───
// One actor task owns the catalog, the console history and the process
// handle. UI-facing code talks to it through `LifecycleController` and
// listens to `LifecycleEvent`s; nothing else touches that state.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::app_state::{HostPaths, HostSettings};
use crate::core::downloader::{DownloadProgress, Downloader};
use crate::core::error::{HostError, HostResult};
use crate::core::launch::{
    ConsoleLog, ConsoleSnapshot, ExitInfo, ProcessHandle, ProcessSupervisor, Termination,
};
use crate::core::server::{write_server_config, ServerConfig};
use crate::core::version::{VersionCatalog, VersionEntry};

const COMMAND_BUFFER: usize = 32;
const INTERNAL_BUFFER: usize = 256;
/// Events retained for a slow subscriber before it starts lagging.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing in flight, no server jar on disk.
    Idle,
    FetchingCatalog,
    Downloading,
    /// Nothing in flight, server jar present.
    Ready,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::FetchingCatalog => write!(f, "fetching the catalog"),
            LifecycleState::Downloading => write!(f, "downloading"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FetchCatalog,
    Download,
    Start,
    Stop,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::FetchCatalog => "fetch the catalog",
            Operation::Download => "download",
            Operation::Start => "start the server",
            Operation::Stop => "stop the server",
        }
    }
}

impl LifecycleState {
    pub fn is_quiescent(self) -> bool {
        matches!(self, LifecycleState::Idle | LifecycleState::Ready)
    }

    /// The transition table. Fetch, download and start each need the
    /// controller to be at rest; stop only means something while a server
    /// is coming up or running.
    pub fn permits(self, op: Operation) -> bool {
        match op {
            Operation::FetchCatalog | Operation::Download | Operation::Start => {
                self.is_quiescent()
            }
            Operation::Stop => matches!(self, LifecycleState::Starting | LifecycleState::Running),
        }
    }
}

/// Snapshot used to drive control enablement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: LifecycleState,
    pub artifact_present: bool,
    pub pid: Option<u32>,
}

impl Status {
    pub fn can_fetch(&self) -> bool {
        self.state.permits(Operation::FetchCatalog)
    }

    pub fn can_download(&self) -> bool {
        self.state.permits(Operation::Download)
    }

    pub fn can_start(&self) -> bool {
        self.state.permits(Operation::Start) && self.artifact_present
    }

    pub fn can_stop(&self) -> bool {
        self.state.permits(Operation::Stop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StateChanged { state: LifecycleState },
    CatalogUpdated { versions: Vec<VersionEntry> },
    DownloadProgress(DownloadProgress),
    /// One console line, either from the server or written by the host.
    Output { line: String },
    /// The console history started evicting old lines.
    LogTruncated { dropped: u64 },
    /// Transient, user-facing message.
    Notice { level: NoticeLevel, message: String },
    /// The server ended without being asked to.
    ProcessExited { code: Option<i32> },
    /// The server ended because of `stop()` or shutdown.
    ProcessStopped { forced: bool },
    Shutdown,
}

/// Bounded event feed. A subscriber that falls behind receives
/// `RecvError::Lagged(n)` and can resync from `console()` and `status()`.
pub type EventStream = broadcast::Receiver<LifecycleEvent>;

enum Command {
    FetchCatalog {
        reply: oneshot::Sender<HostResult<Vec<VersionEntry>>>,
    },
    Download {
        version: String,
        reply: oneshot::Sender<HostResult<u64>>,
    },
    Start {
        max_players: String,
        port: String,
        reply: oneshot::Sender<HostResult<Option<u32>>>,
    },
    Stop {
        reply: oneshot::Sender<HostResult<()>>,
    },
    Catalog {
        reply: oneshot::Sender<Vec<VersionEntry>>,
    },
    Console {
        reply: oneshot::Sender<ConsoleSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Completions reported back to the actor by the tasks it spawned.
enum Internal {
    CatalogFetched(HostResult<VersionCatalog>),
    Downloaded(HostResult<u64>),
    Output { line: String },
    OutputClosed { run: u64, exit: ExitInfo },
    Stopped { result: HostResult<Termination> },
}

/// Caller waiting on a long-running operation.
enum Pending {
    Nothing,
    Fetch(oneshot::Sender<HostResult<Vec<VersionEntry>>>),
    Download {
        reply: oneshot::Sender<HostResult<u64>>,
        dest: PathBuf,
    },
    Stop(oneshot::Sender<HostResult<()>>),
}

struct RunningServer {
    run: u64,
    handle: ProcessHandle,
}

/// Cloneable handle to the lifecycle actor.
#[derive(Clone)]
pub struct LifecycleController {
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<Status>,
}

impl LifecycleController {
    /// Start the actor on the current tokio runtime.
    ///
    /// The actor stops, killing any running server, when `shutdown` is
    /// called or the last handle is dropped.
    pub fn spawn(paths: HostPaths, settings: HostSettings, client: Client) -> (Self, EventStream) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, event_rx) = broadcast::channel(EVENT_BUFFER);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);

        let state = if paths.artifact_present() {
            LifecycleState::Ready
        } else {
            LifecycleState::Idle
        };
        let (status_tx, status_rx) = watch::channel(Status {
            state,
            artifact_present: state == LifecycleState::Ready,
            pid: None,
        });

        let actor = Lifecycle {
            supervisor: ProcessSupervisor::new(settings.java_binary()),
            console: ConsoleLog::new(settings.console_capacity),
            paths,
            settings,
            client,
            catalog: VersionCatalog::default(),
            truncation_signalled: false,
            state,
            server: None,
            next_run: 0,
            pending: Pending::Nothing,
            task: None,
            status_tx,
            events,
            internal_tx,
        };
        tokio::spawn(actor.run(commands, internal_rx));

        (
            Self {
                tx,
                status: status_rx,
            },
            event_rx,
        )
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> HostResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| HostError::ControllerClosed)?;
        rx.await.map_err(|_| HostError::ControllerClosed)
    }

    /// Replace the catalog with a fresh copy of the remote manifest.
    pub async fn fetch_catalog(&self) -> HostResult<Vec<VersionEntry>> {
        self.request(|reply| Command::FetchCatalog { reply }).await?
    }

    /// Download the jar for `version` from the current catalog.
    pub async fn download(&self, version: &str) -> HostResult<u64> {
        let version = version.to_string();
        self.request(|reply| Command::Download { version, reply })
            .await?
    }

    /// Write the configuration and launch the server. Unparseable numbers
    /// fall back to the defaults. Resolves once the process is running.
    pub async fn start(&self, max_players_text: &str, port_text: &str) -> HostResult<Option<u32>> {
        let max_players = max_players_text.to_string();
        let port = port_text.to_string();
        self.request(|reply| Command::Start {
            max_players,
            port,
            reply,
        })
        .await?
    }

    /// Stop the running server. A no-op when nothing is running.
    pub async fn stop(&self) -> HostResult<()> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    pub async fn catalog(&self) -> HostResult<Vec<VersionEntry>> {
        self.request(|reply| Command::Catalog { reply }).await
    }

    pub async fn console(&self) -> HostResult<ConsoleSnapshot> {
        self.request(|reply| Command::Console { reply }).await
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Cancel in-flight work, kill the server and stop the actor.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }
}

struct Lifecycle {
    paths: HostPaths,
    settings: HostSettings,
    client: Client,
    supervisor: ProcessSupervisor,
    catalog: VersionCatalog,
    console: ConsoleLog,
    truncation_signalled: bool,
    state: LifecycleState,
    server: Option<RunningServer>,
    next_run: u64,
    pending: Pending,
    task: Option<AbortHandle>,
    status_tx: watch::Sender<Status>,
    events: broadcast::Sender<LifecycleEvent>,
    internal_tx: mpsc::Sender<Internal>,
}

impl Lifecycle {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<Internal>,
    ) {
        info!("Lifecycle controller started ({})", self.state);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(message) = internal.recv() => self.handle_internal(message),
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::FetchCatalog { reply } => match self.begin_fetch() {
                Ok(()) => self.pending = Pending::Fetch(reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Download { version, reply } => match self.begin_download(&version) {
                Ok(dest) => self.pending = Pending::Download { reply, dest },
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Start {
                max_players,
                port,
                reply,
            } => {
                let result = self.start(&max_players, &port).await;
                let _ = reply.send(result);
            }
            Command::Stop { reply } => self.begin_stop(reply),
            Command::Catalog { reply } => {
                let _ = reply.send(self.catalog.entries().to_vec());
            }
            Command::Console { reply } => {
                let _ = reply.send(self.console.snapshot());
            }
            Command::Shutdown { .. } => unreachable!("handled by the run loop"),
        }
    }

    fn begin_fetch(&mut self) -> HostResult<()> {
        self.admit(Operation::FetchCatalog)?;
        self.set_state(LifecycleState::FetchingCatalog);

        let client = self.client.clone();
        let url = self.settings.manifest_url.clone();
        let base = self.settings.download_base_url.clone();
        self.spawn_op(
            async move { VersionCatalog::fetch(&client, &url, &base).await },
            Internal::CatalogFetched,
        );
        Ok(())
    }

    fn begin_download(&mut self, version: &str) -> HostResult<PathBuf> {
        self.admit(Operation::Download)?;

        let Some(entry) = self.catalog.find(version).cloned() else {
            return Err(self.refuse(HostError::UnknownVersion(version.to_string())));
        };
        // Resolve storage before any network traffic.
        let dest = match self.paths.artifact_path() {
            Ok(dest) => dest,
            Err(e) => return Err(self.fail("Download failed", e)),
        };

        self.set_state(LifecycleState::Downloading);
        self.console_line("[DOWNLOAD] Downloading server jar...");
        info!(
            "Downloading Paper {} build {} from {}",
            entry.version, entry.build_number, entry.download_url
        );

        let events = self.events.clone();
        let downloader = Downloader::new(self.client.clone()).with_progress(Arc::new(
            move |progress: DownloadProgress| {
                let _ = events.send(LifecycleEvent::DownloadProgress(progress));
            },
        ));
        let target = dest.clone();
        self.spawn_op(
            async move { downloader.download_file(&entry.download_url, &target).await },
            Internal::Downloaded,
        );
        Ok(dest)
    }

    async fn start(&mut self, max_players_text: &str, port_text: &str) -> HostResult<Option<u32>> {
        self.admit(Operation::Start)?;

        let config = ServerConfig::from_input(max_players_text, port_text);
        let (server_dir, jar) = match (self.paths.server_dir(), self.paths.artifact_path()) {
            (Ok(dir), Ok(jar)) => (dir, jar),
            (Err(e), _) | (_, Err(e)) => return Err(self.fail("Failed to start server", e)),
        };

        // Checked here so a missing jar never reaches the OS.
        let present = tokio::fs::metadata(&jar)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !present {
            return Err(self.refuse(HostError::ArtifactMissing(jar)));
        }

        self.set_state(LifecycleState::Starting);

        if let Err(e) = write_server_config(&config, &server_dir).await {
            self.settle();
            return Err(self.fail("Failed to write server configuration", e));
        }

        let mut handle = match self.supervisor.spawn(&jar, &server_dir).await {
            Ok(handle) => handle,
            Err(e) => {
                self.settle();
                return Err(self.fail("Failed to start server", e));
            }
        };

        self.next_run += 1;
        let run = self.next_run;
        self.truncation_signalled = false;
        self.forward_output(run, &mut handle);

        let pid = handle.pid();
        self.server = Some(RunningServer { run, handle });
        self.set_state(LifecycleState::Running);
        self.console_line("[RUNTIME] Server started...");
        info!(
            "Server run {} started (pid {:?}, max-players={}, port={})",
            run, pid, config.max_players, config.port
        );
        Ok(pid)
    }

    fn begin_stop(&mut self, reply: oneshot::Sender<HostResult<()>>) {
        if !self.state.permits(Operation::Stop) {
            debug!("Stop ignored while {}", self.state);
            let _ = reply.send(Ok(()));
            return;
        }
        let Some(server) = self.server.take() else {
            self.settle();
            let _ = reply.send(Ok(()));
            return;
        };

        self.set_state(LifecycleState::Stopping);
        info!("Stopping server run {}", server.run);

        let grace = self.settings.graceful_stop();
        self.spawn_op(
            async move { Ok::<_, HostError>(ProcessSupervisor::terminate(server.handle, grace).await) },
            |result| Internal::Stopped { result },
        );
        self.pending = Pending::Stop(reply);
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::CatalogFetched(result) => {
                self.task = None;
                let result = match result {
                    Ok(catalog) => {
                        self.catalog = catalog;
                        let versions = self.catalog.entries().to_vec();
                        self.emit(LifecycleEvent::CatalogUpdated {
                            versions: versions.clone(),
                        });
                        Ok(versions)
                    }
                    Err(e) => Err(self.fail("Failed to fetch versions", e)),
                };
                self.settle();
                if let Pending::Fetch(reply) = self.take_pending() {
                    let _ = reply.send(result);
                }
            }
            Internal::Downloaded(result) => {
                self.task = None;
                let pending = self.take_pending();
                let result = match (result, &pending) {
                    (Ok(written), Pending::Download { dest, .. }) => {
                        self.console_line(format!(
                            "[DOWNLOAD] Download completed: {}",
                            dest.display()
                        ));
                        Ok(written)
                    }
                    (Ok(written), _) => Ok(written),
                    (Err(e), _) => Err(self.fail("Download failed", e)),
                };
                self.settle();
                if let Pending::Download { reply, .. } = pending {
                    let _ = reply.send(result);
                }
            }
            Internal::Output { line } => {
                debug!("[server] {}", line);
                self.console_line(line);
            }
            Internal::OutputClosed { run, exit } => {
                self.console_line("[RUNTIME] Server stopped.");
                let current = self.server.as_ref().map(|s| s.run);
                if current != Some(run) || self.state != LifecycleState::Running {
                    // Stopped on request; the stop path owns the transition.
                    return;
                }
                self.server = None;
                info!("Server run {} exited on its own ({:?})", run, exit.code);
                self.emit(LifecycleEvent::ProcessExited { code: exit.code });
                if !exit.success {
                    self.notice(
                        NoticeLevel::Warn,
                        match exit.code {
                            Some(code) => format!("Server exited with code {code}"),
                            None => "Server was terminated externally".to_string(),
                        },
                    );
                }
                self.settle();
            }
            Internal::Stopped { result } => {
                self.task = None;
                let forced = match result {
                    Ok(termination) => termination.forced,
                    Err(e) => {
                        error!("Stop task failed: {}", e);
                        true
                    }
                };
                self.emit(LifecycleEvent::ProcessStopped { forced });
                self.notice(NoticeLevel::Info, "Server stopped".to_string());
                self.settle();
                if let Pending::Stop(reply) = self.take_pending() {
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down lifecycle controller");
        if let Some(task) = self.task.take() {
            task.abort();
        }

        match self.take_pending() {
            Pending::Nothing => {}
            Pending::Fetch(reply) => {
                let _ = reply.send(Err(HostError::Cancelled));
            }
            Pending::Download { reply, dest } => {
                // Never leave a half-written jar that looks usable.
                if let Err(e) = tokio::fs::remove_file(&dest).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial download {:?}: {}", dest, e);
                    }
                }
                let _ = reply.send(Err(HostError::Cancelled));
            }
            // The aborted stop task dropped its handle, which kills the server.
            Pending::Stop(reply) => {
                let _ = reply.send(Ok(()));
            }
        }

        if let Some(server) = self.server.take() {
            let termination = ProcessSupervisor::terminate(server.handle, None).await;
            self.emit(LifecycleEvent::ProcessStopped {
                forced: termination.forced,
            });
        }

        self.settle();
        self.emit(LifecycleEvent::Shutdown);
    }

    /// Pump the run's output into the actor, then report the exit.
    fn forward_output(&self, run: u64, handle: &mut ProcessHandle) {
        let relay = handle.take_output();
        let mut exit = handle.exit_observer();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            if let Some(mut relay) = relay {
                while let Some(line) = relay.next_line().await {
                    if tx.send(Internal::Output { line }).await.is_err() {
                        return;
                    }
                }
            }
            let exit = exit.wait().await;
            let _ = tx.send(Internal::OutputClosed { run, exit }).await;
        });
    }

    fn spawn_op<T, F, W>(&mut self, op: F, wrap: W)
    where
        T: Send + 'static,
        F: Future<Output = HostResult<T>> + Send + 'static,
        W: FnOnce(HostResult<T>) -> Internal + Send + 'static,
    {
        let inner = tokio::spawn(op);
        self.task = Some(inner.abort_handle());
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = match inner.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(HostError::Cancelled),
                Err(e) => Err(HostError::TaskFailed(e.to_string())),
            };
            let _ = tx.send(wrap(result)).await;
        });
    }

    fn take_pending(&mut self) -> Pending {
        std::mem::replace(&mut self.pending, Pending::Nothing)
    }

    fn admit(&mut self, op: Operation) -> HostResult<()> {
        if self.state.permits(op) {
            return Ok(());
        }
        let err = HostError::Rejected {
            operation: op.name(),
            state: self.state.to_string(),
        };
        Err(self.refuse(err))
    }

    /// Surface a rejected request. State is left alone.
    fn refuse(&mut self, err: HostError) -> HostError {
        self.notice(NoticeLevel::Warn, err.to_string());
        err
    }

    fn fail(&mut self, context: &str, err: HostError) -> HostError {
        self.notice(NoticeLevel::Error, format!("{context}: {err}"));
        err
    }

    /// Return to whichever resting state matches the disk.
    fn settle(&mut self) {
        let state = if self.paths.artifact_present() {
            LifecycleState::Ready
        } else {
            LifecycleState::Idle
        };
        self.set_state(state);
    }

    fn set_state(&mut self, state: LifecycleState) {
        if self.state != state {
            debug!("Lifecycle {} -> {}", self.state, state);
            self.state = state;
            self.emit(LifecycleEvent::StateChanged { state });
        }
        self.status_tx.send_replace(Status {
            state,
            artifact_present: self.paths.artifact_present(),
            pid: self.server.as_ref().and_then(|s| s.handle.pid()),
        });
    }

    fn console_line(&mut self, line: impl Into<String>) {
        let line = line.into();
        if self.console.push(line.clone()) && !self.truncation_signalled {
            self.truncation_signalled = true;
            warn!(
                "Console history full, dropping oldest lines ({} so far)",
                self.console.dropped()
            );
            self.emit(LifecycleEvent::LogTruncated {
                dropped: self.console.dropped(),
            });
        }
        self.emit(LifecycleEvent::Output { line });
    }

    fn notice(&mut self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Info => info!("{}", message),
            NoticeLevel::Warn => warn!("{}", message),
            NoticeLevel::Error => error!("{}", message),
        }
        self.emit(LifecycleEvent::Notice { level, message });
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }
}
