use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;

use ocsync_core::{ConfigStore, Configuration, SyncStatus, YamlConfigStore};

use crate::error::{io_err, DaemonError};
use crate::event::SyncEvent;
use crate::orchestrator::{SyncDecision, SyncOrchestrator};
use crate::paths::{ocsync_root, socket_path};
use crate::process::{Completion, Launcher, ProcessRunner};
use crate::protocol::{DaemonRequest, DaemonResponse, StatusSnapshot, StatusUpdate};
use crate::timer::{TimerScheduler, TokioTimers};
use crate::watcher::FilesystemWatcher;

/// How long connected clients get to finish writing once the daemon stops.
const CLIENT_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub home: PathBuf,
    /// Debug-level logging, and the synchronizer's own output goes to the
    /// daemon's stdout/stderr instead of being discarded.
    pub diagnostic: bool,
    pub json_logs: bool,
}

/// Requests into the control domain. Each carries its own reply channel.
#[derive(Debug)]
enum ControlCommand {
    Sync {
        force: bool,
        respond_to: oneshot::Sender<SyncDecision>,
    },
    Configure {
        config: Configuration,
        respond_to: oneshot::Sender<Result<SyncDecision, String>>,
    },
    Status {
        respond_to: oneshot::Sender<StatusSnapshot>,
    },
    Subscribe {
        respond_to: oneshot::Sender<(SyncStatus, broadcast::Receiver<SyncStatus>)>,
    },
    /// Replies whether a run is still in flight.
    Stop { respond_to: oneshot::Sender<bool> },
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(options: DaemonOptions) -> Result<(), DaemonError> {
    init_tracing(options.diagnostic, options.json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(run(options));
    // A run abandoned by a second interrupt must not hold the process open.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

/// Run the daemon runtime.
pub async fn run(options: DaemonOptions) -> Result<(), DaemonError> {
    let DaemonOptions {
        home, diagnostic, ..
    } = options;
    ensure_runtime_dirs(&home)?;

    // Bind before anything else so a second daemon fails without syncing.
    let socket = socket_path(&home);
    let listener = bind_control_socket(&socket)?;

    let store = YamlConfigStore::at_home(&home);
    let config = load_or_default(&store, &home)?;

    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel::<SyncEvent>();
    let (completion_tx, completion_rx) = mpsc::unbounded_channel::<Completion>();
    let (command_tx, command_rx) = mpsc::channel::<ControlCommand>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher = FilesystemWatcher::new(trigger_tx.clone())?;
    let orchestrator = SyncOrchestrator::new(
        config,
        ProcessRunner::new(completion_tx, diagnostic),
        TokioTimers::new(trigger_tx),
    );
    let domain = ControlDomain::new(orchestrator, watcher, Box::new(store));

    let control_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result =
                control_task(domain, trigger_rx, completion_rx, command_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let commands = command_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(listener, socket, commands, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let commands = command_tx;
        tokio::spawn(async move { signal_task(commands, shutdown).await })
    };

    let (control_result, socket_result, signal_result) =
        tokio::join!(control_handle, socket_handle, signal_handle);

    handle_join("control", control_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

fn load_or_default(store: &dyn ConfigStore, home: &Path) -> Result<Configuration, DaemonError> {
    match store.load()? {
        Some(config) => Ok(config),
        None => {
            tracing::warn!("no saved configuration; using defaults until configured");
            Ok(Configuration::defaults_at(home))
        }
    }
}

// ---------------------------------------------------------------------------
// Control domain
// ---------------------------------------------------------------------------

/// Everything that may touch orchestrator state. Owned by exactly one task.
struct ControlDomain<L, T> {
    orchestrator: SyncOrchestrator<L, T>,
    watcher: FilesystemWatcher,
    store: Box<dyn ConfigStore>,
    started_at: DateTime<Utc>,
}

impl<L: Launcher, T: TimerScheduler> ControlDomain<L, T> {
    fn new(
        orchestrator: SyncOrchestrator<L, T>,
        watcher: FilesystemWatcher,
        store: Box<dyn ConfigStore>,
    ) -> Self {
        Self {
            orchestrator,
            watcher,
            store,
            started_at: Utc::now(),
        }
    }

    fn startup(&mut self) {
        let local_path = self.orchestrator.config().local_path.clone();
        warn_if_not_executable(self.orchestrator.config());
        self.watch(&local_path);
        self.orchestrator.handle_event(SyncEvent::InitialRun);
    }

    fn watch(&mut self, root: &Path) {
        if let Err(err) = self.watcher.rewatch(root) {
            tracing::warn!(error = %err, "local directory is not watched");
        }
    }

    fn on_trigger(&mut self, event: SyncEvent) {
        let source = event.source();
        let decision = self.orchestrator.handle_event(event);
        tracing::debug!(source, %decision, "trigger handled");
    }

    fn on_completion(&mut self, completion: Completion) {
        let action = self.orchestrator.on_process_complete(completion);
        tracing::debug!(?action, "completion handled");
    }

    fn on_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Sync { force, respond_to } => {
                let decision = if force {
                    self.orchestrator.force_sync()
                } else {
                    tracing::info!("sync requested by client");
                    self.orchestrator.request_sync()
                };
                let _ = respond_to.send(decision);
            }
            ControlCommand::Configure { config, respond_to } => {
                let result = self.configure(config).map_err(|err| err.to_string());
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "configuration rejected");
                }
                let _ = respond_to.send(result);
            }
            ControlCommand::Status { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            ControlCommand::Subscribe { respond_to } => {
                let subscription = (self.orchestrator.status(), self.orchestrator.subscribe());
                let _ = respond_to.send(subscription);
            }
            ControlCommand::Stop { respond_to } => {
                self.orchestrator.request_stop();
                let _ = respond_to.send(self.orchestrator.in_flight().is_some());
            }
        }
    }

    /// Validate, persist, then apply. Nothing changes if persisting fails.
    fn configure(&mut self, config: Configuration) -> Result<SyncDecision, DaemonError> {
        config.validate()?;
        warn_if_not_executable(&config);
        self.store.save(&config)?;
        self.watch(&config.local_path);
        Ok(self.orchestrator.reconfigure(config))
    }

    fn snapshot(&self) -> StatusSnapshot {
        let state = self.orchestrator.state();
        StatusSnapshot {
            running: true,
            status: self.orchestrator.status(),
            phase: state.phase,
            submit_again: state.submit_again,
            force_stop: state.force_stop,
            timer_armed: self.orchestrator.live_timer().is_some(),
            runs_started: self.orchestrator.runs_started(),
            last_outcome: self.orchestrator.last_outcome().cloned(),
            last_completed_at: self.orchestrator.last_completed_at(),
            watching: self.watcher.active().map(|handle| handle.root().to_path_buf()),
            local_path: self.orchestrator.config().local_path.clone(),
            started_at: self.started_at,
        }
    }

    fn is_terminated(&self) -> bool {
        self.orchestrator.is_terminated()
    }

    fn shutdown(&mut self) {
        self.orchestrator.request_stop();
        self.watcher.unwatch();
    }
}

fn warn_if_not_executable(config: &Configuration) {
    if !config.exe_is_executable() {
        tracing::warn!(exe = %config.exe.display(), "synchronizer is not an executable file");
    }
}

async fn control_task<L: Launcher, T: TimerScheduler>(
    mut domain: ControlDomain<L, T>,
    mut triggers: mpsc::UnboundedReceiver<SyncEvent>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
    mut commands: mpsc::Receiver<ControlCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    domain.startup();

    while !domain.is_terminated() {
        // Completions first: a command must observe every run that finished
        // before it was sent.
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            Some(completion) = completions.recv() => domain.on_completion(completion),
            Some(event) = triggers.recv() => domain.on_trigger(event),
            Some(command) = commands.recv() => domain.on_command(command),
            else => break,
        }
    }

    domain.shutdown();
    Ok(())
}

/// First interrupt asks for a graceful stop; a second one exits without
/// waiting for the running synchronizer.
async fn signal_task(
    commands: mpsc::Sender<ControlCommand>,
    shutdown: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let mut shutdown_rx = shutdown.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => return Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| DaemonError::Protocol(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c, stopping daemon");
            let (respond_to, _) = oneshot::channel();
            let _ = commands.send(ControlCommand::Stop { respond_to }).await;
        }
    }

    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| DaemonError::Protocol(format!("ctrl-c handler failed: {err}")))?;
            tracing::warn!("second ctrl-c, exiting without waiting for the running sync");
            let _ = shutdown.send(());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

fn bind_control_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    prepare_socket_for_bind(socket)?;
    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");
    Ok(listener)
}

async fn socket_server_task(
    listener: UnixListener,
    socket: PathBuf,
    commands: mpsc::Sender<ControlCommand>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let commands = commands.clone();
                let client_shutdown = shutdown_tx.subscribe();
                clients.spawn(async move {
                    if let Err(err) = handle_socket_client(stream, commands, client_shutdown).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }

    // Let pending replies (the stop acknowledgement in particular) go out.
    let drained = tokio::time::timeout(CLIENT_DRAIN, async {
        while clients.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        clients.shutdown().await;
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    commands: mpsc::Sender<ControlCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => line.map_err(|e| io_err("daemon socket read", e))?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        match request.cmd.as_str() {
            "subscribe" => return stream_status(&commands, &mut writer, shutdown_rx).await,
            "stop" => {
                let response = dispatch(&commands, request).await;
                write_response(&mut writer, &response).await?;
                break;
            }
            _ => {
                let response = dispatch(&commands, request).await;
                write_response(&mut writer, &response).await?;
            }
        }
    }

    Ok(())
}

async fn dispatch(commands: &mpsc::Sender<ControlCommand>, request: DaemonRequest) -> DaemonResponse {
    let result = match request.cmd.as_str() {
        "status" => ask(commands, |respond_to| ControlCommand::Status { respond_to })
            .await
            .map(|snapshot| json!(snapshot)),
        cmd @ ("sync" | "force") => {
            let force = cmd == "force";
            ask(commands, |respond_to| ControlCommand::Sync { force, respond_to })
                .await
                .map(|decision| json!(decision))
        }
        "configure" => {
            let Some(config) = request.config else {
                return DaemonResponse::error("configure requires a config");
            };
            match ask(commands, |respond_to| ControlCommand::Configure { config, respond_to }).await {
                Ok(Ok(decision)) => Ok(json!(decision)),
                Ok(Err(message)) => return DaemonResponse::error(message),
                Err(err) => Err(err),
            }
        }
        "stop" => ask(commands, |respond_to| ControlCommand::Stop { respond_to })
            .await
            .map(|waiting| json!({ "stopping": true, "waiting_for_run": waiting })),
        other => return DaemonResponse::error(format!("unknown command '{other}'")),
    };

    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

/// Hand one command to the control domain and wait for its reply.
async fn ask<R>(
    commands: &mpsc::Sender<ControlCommand>,
    build: impl FnOnce(oneshot::Sender<R>) -> ControlCommand,
) -> Result<R, DaemonError> {
    let (tx, rx) = oneshot::channel();
    commands
        .send(build(tx))
        .await
        .map_err(|_| DaemonError::ChannelClosed("control queue"))?;
    rx.await
        .map_err(|_| DaemonError::ChannelClosed("control response"))
}

async fn stream_status(
    commands: &mpsc::Sender<ControlCommand>,
    writer: &mut OwnedWriteHalf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (current, mut updates) =
        match ask(commands, |respond_to| ControlCommand::Subscribe { respond_to }).await {
            Ok(subscription) => subscription,
            Err(err) => return write_response(writer, &DaemonResponse::error(err.to_string())).await,
        };
    write_response(writer, &DaemonResponse::ok(json!(StatusUpdate { status: current }))).await?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            update = updates.recv() => match update {
                Ok(status) => {
                    if let Err(err) = write_json(writer, &StatusUpdate { status }).await {
                        tracing::debug!(error = %err, "status subscriber went away");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "status subscriber lagging; transitions dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = ocsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&root, fs::Permissions::from_mode(0o700))
            .map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_json<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(value)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    write_json(writer, response).await
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing(diagnostic: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if diagnostic { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
