//! ProcessSupervisor: lifecycle of named tool-server processes
//!
//! Each spawned process gets three background tasks: one per output stream
//! forwarding lines onto the event bus, and one waiting for the process to
//! exit. Readiness and exit are published through a `watch` channel so a
//! `start` call waiting for readiness sees an early exit immediately.
//!
//! Every spawn carries a generation number. Bookkeeping done by a
//! background task only applies while its generation is still the live
//! one, so a late exit from a stopped process never touches its successor.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::config::{ServerConfig, SupervisorConfig};
use super::restart::RestartPolicy;
use super::state::{OutputStream, ServerState};
use crate::error::{SupervisorError, exit_label};
use crate::events::{ConductorEvent, EventBus};

/// Bytes requested per read of a server's output pipe
const READ_CHUNK: usize = 8 * 1024;

/// A partial line longer than this is forwarded as it stands
const MAX_LINE: usize = 64 * 1024;

/// Supervises named external processes
///
/// Cheap to clone; clones share the same process table.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    configs: HashMap<String, ServerConfig>,
    settings: SupervisorConfig,
    table: Mutex<Table>,
    generation: AtomicU64,
    event_bus: Arc<dyn EventBus>,
}

#[derive(Default)]
struct Table {
    live: HashMap<String, ManagedServer>,
    /// Last state of servers that are no longer live
    settled: HashMap<String, ServerState>,
    policies: HashMap<String, RestartPolicy>,
    /// Generation whose crash scheduled a restart that has not fired yet
    pending_restart: HashMap<String, u64>,
    exit_listeners: Vec<mpsc::UnboundedSender<ExitNotice>>,
}

/// A managed server exited on its own
///
/// Delivered to every [`ProcessSupervisor::subscribe_exits`] receiver. Unlike
/// the bus, this channel never drops a notice for a slow reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    pub name: String,
    pub code: Option<i32>,
}

struct ManagedServer {
    generation: u64,
    pid: Option<u32>,
    state: watch::Receiver<ServerState>,
    kill: Option<oneshot::Sender<()>>,
}

enum Exit {
    Natural(std::io::Result<ExitStatus>),
    Requested,
}

impl ProcessSupervisor {
    pub fn new(
        configs: HashMap<String, ServerConfig>,
        settings: SupervisorConfig,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                configs,
                settings,
                table: Mutex::new(Table::default()),
                generation: AtomicU64::new(0),
                event_bus,
            }),
        }
    }

    /// Names of every configured server, sorted
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a server and wait for it to print the readiness marker
    ///
    /// Succeeds immediately when the server is already starting or
    /// running. On `StartupTimeout` the process is left running; call
    /// [`stop`](Self::stop) to get rid of it.
    pub async fn start(&self, name: &str) -> Result<(), SupervisorError> {
        let mut state = {
            let mut table = self.inner.table.lock().await;
            if table.live.contains_key(name) {
                debug!(server = %name, "Server already started");
                return Ok(());
            }
            let config = self
                .inner
                .configs
                .get(name)
                .ok_or_else(|| SupervisorError::UnknownServer(name.to_string()))?;
            table.pending_restart.remove(name);
            spawn_server(&self.inner, &mut table, name, config).await?
        };

        let startup_timeout = self.inner.settings.startup_timeout;
        let outcome = timeout(
            startup_timeout,
            state.wait_for(|s| !matches!(s, ServerState::Starting)),
        )
        .await
        .map(|settled| settled.map(|s| (*s).clone()));

        match outcome {
            Ok(Ok(ServerState::Running)) => {
                let mut table = self.inner.table.lock().await;
                if let Some(policy) = table.policies.get_mut(name) {
                    policy.reset();
                }
                Ok(())
            }
            Ok(Ok(ServerState::Exited { code })) => Err(SupervisorError::ProcessExited {
                name: name.to_string(),
                code,
            }),
            // Stopped or the exit watcher is gone
            Ok(_) => Err(SupervisorError::ProcessExited {
                name: name.to_string(),
                code: None,
            }),
            Err(_) => {
                warn!(server = %name, timeout = ?startup_timeout, "Server did not become ready");
                Err(SupervisorError::StartupTimeout {
                    name: name.to_string(),
                    timeout: startup_timeout,
                })
            }
        }
    }

    /// Terminate a server and wait for it to exit
    ///
    /// Idempotent: stopping a server that is not running succeeds. Also
    /// cancels a restart that is waiting out its backoff.
    pub async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let server = {
            let mut table = self.inner.table.lock().await;
            table.pending_restart.remove(name);
            match table.live.remove(name) {
                Some(server) => server,
                None => {
                    debug!(server = %name, "Server not running, nothing to stop");
                    return Ok(());
                }
            }
        };

        let ManagedServer {
            mut state,
            kill,
            pid,
            ..
        } = server;
        info!(server = %name, pid = ?pid, "Stopping server");
        if let Some(kill) = kill {
            let _ = kill.send(());
        }

        let stop_timeout = self.inner.settings.stop_timeout;
        let exited = timeout(
            stop_timeout,
            state.wait_for(|s| matches!(s, ServerState::Exited { .. })),
        )
        .await;
        if exited.is_err() {
            warn!(server = %name, timeout = ?stop_timeout, "Server did not exit after kill");
            return Err(SupervisorError::StopFailed {
                name: name.to_string(),
                reason: format!("process did not exit within {stop_timeout:?}"),
            });
        }

        self.inner
            .table
            .lock()
            .await
            .settled
            .insert(name.to_string(), ServerState::Stopped);
        self.inner
            .event_bus
            .publish(ConductorEvent::ServerStopped {
                name: name.to_string(),
            })
            .await;
        publish_state(&self.inner, name, ServerState::Stopped).await;
        info!(server = %name, "Server stopped");
        Ok(())
    }

    /// Stop every live server, continuing past individual failures
    pub async fn stop_all(&self) -> Result<(), SupervisorError> {
        let names: Vec<String> = {
            let table = self.inner.table.lock().await;
            let mut names: Vec<_> = table.live.keys().cloned().collect();
            names.sort();
            names
        };

        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.stop(&name).await {
                warn!(server = %name, error = %e, "Failed to stop server");
                failures.push((name, e.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::StopAll { failures })
        }
    }

    /// Receive a notice for every natural server exit from now on
    pub async fn subscribe_exits(&self) -> mpsc::UnboundedReceiver<ExitNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.table.lock().await.exit_listeners.push(tx);
        rx
    }

    /// Whether the server is alive and has signalled readiness
    pub async fn is_running(&self, name: &str) -> bool {
        let table = self.inner.table.lock().await;
        table
            .live
            .get(name)
            .is_some_and(|s| *s.state.borrow() == ServerState::Running)
    }

    /// Names of ready servers, sorted
    pub async fn list_running(&self) -> Vec<String> {
        let table = self.inner.table.lock().await;
        let mut names: Vec<_> = table
            .live
            .iter()
            .filter(|(_, s)| *s.state.borrow() == ServerState::Running)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Current state of a configured server, `None` for unknown names
    pub async fn state(&self, name: &str) -> Option<ServerState> {
        if !self.inner.configs.contains_key(name) {
            return None;
        }
        let table = self.inner.table.lock().await;
        let state = match table.live.get(name) {
            Some(server) => server.state.borrow().clone(),
            None => table.settled.get(name).cloned().unwrap_or_default(),
        };
        Some(state)
    }

    /// OS process ID of a live server
    pub async fn pid(&self, name: &str) -> Option<u32> {
        let table = self.inner.table.lock().await;
        table.live.get(name).and_then(|s| s.pid)
    }
}

/// Spawn the process and its background tasks, registering it as live
async fn spawn_server(
    inner: &Arc<Inner>,
    table: &mut Table,
    name: &str,
    config: &ServerConfig,
) -> Result<watch::Receiver<ServerState>, SupervisorError> {
    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| {
        error!(server = %name, command = %config.command, error = %source, "Failed to spawn server");
        SupervisorError::SpawnFailed {
            name: name.to_string(),
            source,
        }
    })?;

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let pid = child.id();
    let (state_tx, state_rx) = watch::channel(ServerState::Starting);
    let state_tx = Arc::new(state_tx);
    let (kill_tx, kill_rx) = oneshot::channel();

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(
            inner.clone(),
            name.to_string(),
            OutputStream::Stdout,
            stdout,
            Some(state_tx.clone()),
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(
            inner.clone(),
            name.to_string(),
            OutputStream::Stderr,
            stderr,
            None,
        ));
    }
    tokio::spawn(watch_exit(
        inner.clone(),
        name.to_string(),
        generation,
        child,
        state_tx,
        kill_rx,
    ));

    table.settled.remove(name);
    table.live.insert(
        name.to_string(),
        ManagedServer {
            generation,
            pid,
            state: state_rx.clone(),
            kill: Some(kill_tx),
        },
    );

    info!(server = %name, pid = ?pid, generation, "Server spawned");
    publish_state(inner, name, ServerState::Starting).await;
    Ok(state_rx)
}

/// Forward each line of one stream onto the bus
///
/// Output is read as raw bytes and decoded lossily, so a stray invalid byte
/// never stops the stream from being drained. The stdout forwarder also owns
/// readiness: the marker is matched against buffered bytes, before the line
/// that carries it is complete, and moves the server from `Starting` to
/// `Running`.
async fn forward_output<R>(
    inner: Arc<Inner>,
    name: String,
    stream: OutputStream,
    mut reader: R,
    ready: Option<Arc<watch::Sender<ServerState>>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let marker = inner.settings.ready_marker.as_bytes().to_vec();
    let mut watching = ready.is_some() && !marker.is_empty();
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(server = %name, %stream, error = %e, "Output stream read failed");
                break;
            }
        };
        pending.extend_from_slice(&chunk[..n]);

        // Checked before draining so a marker in a finished line is seen too
        let found = watching && contains(&pending, &marker);

        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            publish_line(&inner, &name, stream, &line).await;
        }
        if pending.len() > MAX_LINE {
            let line = std::mem::take(&mut pending);
            publish_line(&inner, &name, stream, &line).await;
        }

        if found {
            watching = false;
            if let Some(state) = &ready {
                mark_ready(&inner, &name, state).await;
            }
        }
    }

    if !pending.is_empty() {
        publish_line(&inner, &name, stream, &pending).await;
    }
}

async fn publish_line(inner: &Inner, name: &str, stream: OutputStream, raw: &[u8]) {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw).into_owned();
    debug!(server = %name, %stream, line = %line, "Server output");
    inner
        .event_bus
        .publish(ConductorEvent::ServerOutput {
            name: name.to_string(),
            stream,
            line,
        })
        .await;
}

async fn mark_ready(inner: &Inner, name: &str, state: &watch::Sender<ServerState>) {
    let became_ready = state.send_if_modified(|s| {
        if *s == ServerState::Starting {
            *s = ServerState::Running;
            true
        } else {
            false
        }
    });
    if became_ready {
        info!(server = %name, "Server ready");
        publish_state(inner, name, ServerState::Running).await;
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Wait for the process to exit, either on its own or on request
async fn watch_exit(
    inner: Arc<Inner>,
    name: String,
    generation: u64,
    mut child: Child,
    state: Arc<watch::Sender<ServerState>>,
    kill: oneshot::Receiver<()>,
) {
    let exit = tokio::select! {
        status = child.wait() => Exit::Natural(status),
        _ = kill => Exit::Requested,
    };

    let status = match exit {
        Exit::Natural(status) => status,
        Exit::Requested => {
            if let Err(e) = child.start_kill() {
                debug!(server = %name, error = %e, "Kill failed, process likely gone");
            }
            let status = child.wait().await;
            state.send_replace(ServerState::Exited {
                code: exit_code(&name, status),
            });
            return;
        }
    };

    let code = exit_code(&name, status);
    let was_ready = *state.borrow() == ServerState::Running;

    let restart_delay = {
        let mut table = inner.table.lock().await;
        state.send_replace(ServerState::Exited { code });

        let is_current = table
            .live
            .get(&name)
            .is_some_and(|s| s.generation == generation);
        if !is_current {
            return;
        }
        table.live.remove(&name);
        table
            .settled
            .insert(name.clone(), ServerState::Exited { code });
        let notice = ExitNotice {
            name: name.clone(),
            code,
        };
        table
            .exit_listeners
            .retain(|listener| listener.send(notice.clone()).is_ok());

        let restart = was_ready && inner.configs.get(&name).is_some_and(|c| c.restart);
        let delay = if restart {
            table
                .policies
                .entry(name.clone())
                .or_default()
                .next_delay(Instant::now())
        } else {
            None
        };
        if delay.is_some() {
            table.pending_restart.insert(name.clone(), generation);
        } else if restart {
            warn!(server = %name, "Server keeps crashing, giving up on restarts");
        }
        delay
    };

    warn!(server = %name, code = ?code, "Server exited ({})", exit_label(&code));
    inner
        .event_bus
        .publish(ConductorEvent::ServerExit {
            name: name.clone(),
            code,
        })
        .await;
    publish_state(&inner, &name, ServerState::Exited { code }).await;

    if let Some(delay) = restart_delay {
        schedule_restart(inner, name, generation, delay);
    }
}

/// Restart a crashed server after its backoff delay
///
/// A `start` or `stop` in the meantime clears the pending entry, which
/// cancels the restart.
fn schedule_restart(inner: Arc<Inner>, name: String, generation: u64, delay: Duration) {
    info!(server = %name, delay = ?delay, "Scheduling server restart");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        {
            let mut table = inner.table.lock().await;
            if table.pending_restart.get(&name) != Some(&generation) {
                debug!(server = %name, "Restart cancelled");
                return;
            }
            table.pending_restart.remove(&name);
        }

        let supervisor = ProcessSupervisor { inner };
        if let Err(e) = supervisor.start(&name).await {
            warn!(server = %name, error = %e, "Server restart failed");
        }
    });
}

async fn publish_state(inner: &Inner, name: &str, state: ServerState) {
    inner
        .event_bus
        .publish(ConductorEvent::ServerStateChanged {
            name: name.to_string(),
            state,
        })
        .await;
}

fn exit_code(name: &str, status: std::io::Result<ExitStatus>) -> Option<i32> {
    match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(server = %name, error = %e, "Failed to wait for server exit");
            None
        }
    }
}
