//! Shell session lifecycle
//!
//! ```text
//!   connect ──► spawn client ──► pumps + exit watcher ──► wait for prompt ──► ready
//!                                                              │ (timeout)
//!                                                              └──► forced ready
//!
//!   disconnect / remote exit ──► teardown:
//!     1. detach pumps (stop signal)
//!     2. close stdin, abort pumps (drops stdout/stderr)
//!     3. SIGTERM, grace window, SIGKILL
//!     4. publish connected = false
//! ```
//!
//! One writer (the send path) and one reader per stream (the pumps). Teardown
//! is guarded by an atomic flag so it runs once no matter how many paths
//! trigger it.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use super::buffer::OutputBuffer;
use super::prompt;
use super::signals::{self, Signal};
use super::transport::{LocalShellTransport, SshOptions, SshTransport, Transport};
use super::ShellChannel;
use crate::ansi::{self, StreamNormalizer};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::models::ConnectionTarget;
use crate::security_audit;
use crate::state::Observable;

/// Bytes read from the client per pump iteration
const READ_CHUNK: usize = 8192;

/// Characters of output carried in a connect error
const CONNECT_EXCERPT_CHARS: usize = 400;

/// Poll interval while waiting for output to go quiet
const QUIET_POLL: Duration = Duration::from_millis(25);

/// Exit state published by the watcher: `None` while running
type ExitState = Option<Option<i32>>;

/// Timing and sizing knobs for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub prompt_quiet_period: Duration,
    pub disconnect_grace: Duration,
    pub max_buffer_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            prompt_quiet_period: config.prompt_quiet_period(),
            disconnect_grace: config.disconnect_grace(),
            max_buffer_bytes: config.max_buffer_bytes,
        }
    }
}

/// Observable connection state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Client process is attached
    pub connected: bool,
    /// Prompt seen (or readiness forced after the connect timeout)
    pub ready: bool,
    /// Exit status of the last client process
    pub exit_status: Option<i32>,
}

/// What started a teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownCause {
    /// `disconnect()`, including cleanup after a failed connect
    Requested,
    /// The client of the given generation went away on its own
    RemoteExit(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Everything that exists only while a client process is attached
struct ProcessHandles {
    stdin: ChildStdin,
    pumps: Vec<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<ExitState>,
    pid: Option<u32>,
    started: Instant,
    /// Which client process these handles belong to
    generation: u64,
}

struct SessionInner {
    id: Uuid,
    transport: Box<dyn Transport>,
    settings: SessionSettings,
    buffer: Mutex<OutputBuffer>,
    status: Observable<SessionStatus>,
    terminating: AtomicBool,
    /// Bumped for every spawned client
    generation: AtomicU64,
    handles: tokio::sync::Mutex<Option<ProcessHandles>>,
}

/// A persistent interactive shell on a remote (or local) host
pub struct ShellSession {
    inner: Arc<SessionInner>,
}

impl ShellSession {
    /// Session over an arbitrary transport
    pub fn new(transport: impl Transport + 'static, settings: SessionSettings) -> Self {
        let buffer = OutputBuffer::new(settings.max_buffer_bytes);
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                transport: Box::new(transport),
                settings,
                buffer: Mutex::new(buffer),
                status: Observable::new(SessionStatus::default()),
                terminating: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                handles: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// SSH session to `target` using `config`
    pub fn ssh(target: ConnectionTarget, config: &SessionConfig) -> Self {
        Self::new(
            SshTransport::new(target, SshOptions::from(config)),
            SessionSettings::from(config),
        )
    }

    /// Local `sh -i` session using `config`
    pub fn local(config: &SessionConfig) -> Self {
        Self::new(
            LocalShellTransport::new(config.local_shell.clone()),
            SessionSettings::from(config),
        )
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn host(&self) -> String {
        self.inner.transport.host()
    }

    /// Current status snapshot
    pub fn status(&self) -> SessionStatus {
        self.inner.status.get()
    }

    /// Observe status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.status.read(|s| s.connected && s.ready)
    }

    /// Full contents of the rolling output buffer
    pub fn output(&self) -> String {
        self.inner.lock_buffer().contents().to_string()
    }

    /// Last (possibly unterminated) line of output
    pub fn last_line(&self) -> String {
        self.inner.lock_buffer().last_line().to_string()
    }

    /// Start the client and wait until the remote shell is ready.
    ///
    /// Connecting an already connected session is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.terminating.load(Ordering::SeqCst) {
            inner.wait_disconnected().await;
        }

        let mut exit_rx = {
            let mut guard = inner.handles.lock().await;
            if guard.is_some() {
                debug!("Session {} already connected", inner.id);
                return Ok(());
            }

            let host = inner.transport.host();
            security_audit::log_connection_attempt(&host, inner.transport.auth_kind());
            info!("Connecting session {} to {}", inner.id, host);

            let handles = inner.spawn_client()?;
            let exit_rx = handles.exit_rx.clone();
            *guard = Some(handles);
            exit_rx
        };

        let mut status_rx = inner.status.subscribe();
        let outcome = timeout(inner.settings.connect_timeout, async {
            tokio::select! {
                ready = status_rx.wait_for(|s| s.ready || !s.connected) => {
                    ready.map(|s| s.ready).unwrap_or(false)
                }
                _ = exit_rx.wait_for(Option::is_some) => false,
            }
        })
        .await;

        match outcome {
            Ok(true) => inner.wait_quiet().await,
            Ok(false) => return Err(self.connect_failed(exit_rx).await),
            Err(_) => {
                warn!(
                    "No prompt from {} within {:?}, assuming the shell is ready",
                    inner.transport.host(),
                    inner.settings.connect_timeout
                );
                inner.status.update(|s| s.ready = true);
            }
        }

        let exited = (*exit_rx.borrow()).is_some();
        if exited || !inner.status.read(|s| s.connected) {
            return Err(self.connect_failed(exit_rx).await);
        }

        security_audit::log_session_start(&inner.transport.host());
        info!("Session {} ready", inner.id);
        Ok(())
    }

    /// Build the connect error after the client died during connect
    async fn connect_failed(&self, mut exit_rx: watch::Receiver<ExitState>) -> Error {
        let inner = &self.inner;
        wait_for_exit(&mut exit_rx, inner.settings.disconnect_grace).await;
        let exit_status = (*exit_rx.borrow()).flatten();
        let output_excerpt = ansi::tail_excerpt(&self.output(), CONNECT_EXCERPT_CHARS);

        // Releases handles if the watcher has not already done so
        if let Err(e) = self.disconnect().await {
            debug!("Cleanup after failed connect: {}", e);
        }

        error!(
            "Connection to {} failed (exit status {:?})",
            inner.transport.host(),
            exit_status
        );
        Error::ConnectFailed {
            host: inner.transport.host(),
            exit_status,
            output_excerpt,
        }
    }

    /// Write `text` plus a newline to the remote shell
    pub async fn send(&self, text: &str) -> Result<()> {
        self.write_bytes(format!("{}\n", text).as_bytes()).await
    }

    /// Send Ctrl+C through the terminal
    pub async fn send_interrupt(&self) -> Result<()> {
        self.write_bytes(&[0x03]).await
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.inner.handles.lock().await;
        let handles = match guard.as_mut() {
            Some(handles) if !self.inner.terminating.load(Ordering::SeqCst) => handles,
            _ => return Err(Error::NotConnected),
        };

        let write = async {
            handles.stdin.write_all(bytes).await?;
            handles.stdin.flush().await
        };
        write.await.map_err(|e| {
            warn!("Write to session {} failed: {}", self.inner.id, e);
            Error::SendFailed {
                reason: e.to_string(),
            }
        })?;

        debug!("Sent {} bytes to session {}", bytes.len(), self.inner.id);
        Ok(())
    }

    /// Tear the session down. Idempotent; concurrent calls wait for the first.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.inner.teardown(TeardownCause::Requested).await {
            self.inner.wait_disconnected().await;
        }
        Ok(())
    }
}

impl SessionInner {
    fn lock_buffer(&self) -> MutexGuard<'_, OutputBuffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the client, its pumps and its exit watcher
    fn spawn_client(self: &Arc<Self>) -> Result<ProcessHandles> {
        let program = self.transport.program();
        let mut command = self.transport.command()?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ClientNotFound {
                program: program.clone(),
            },
            io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                program: program.clone(),
                reason: e.to_string(),
            },
            _ => Error::SpawnFailed {
                program: program.clone(),
                reason: e.to_string(),
            },
        })?;

        let missing = |stream: &str| Error::SpawnFailed {
            program: program.clone(),
            reason: format!("{} was not captured", stream),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let pid = child.id();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        debug!(
            "Spawned {} (pid {:?}, generation {}) for session {}",
            program, pid, generation, self.id
        );

        self.status.set(SessionStatus {
            connected: true,
            ready: false,
            exit_status: None,
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let pumps = vec![
            tokio::spawn(pump_output(
                Arc::clone(self),
                stdout,
                stop_rx.clone(),
                StreamKind::Stdout,
                generation,
            )),
            tokio::spawn(pump_output(
                Arc::clone(self),
                stderr,
                stop_rx,
                StreamKind::Stderr,
                generation,
            )),
        ];
        tokio::spawn(watch_exit(Arc::clone(self), child, kill_rx, exit_tx, generation));

        Ok(ProcessHandles {
            stdin,
            pumps,
            stop_tx,
            kill_tx: Some(kill_tx),
            exit_rx,
            pid,
            started: Instant::now(),
            generation,
        })
    }

    /// Append normalized output and flag readiness on first prompt sighting
    fn append_output(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        let at_prompt = {
            let mut buffer = self.lock_buffer();
            buffer.append(text);
            prompt::is_prompt_line(buffer.last_line())
        };

        if at_prompt {
            let became_ready = self.status.transition(|s| {
                if s.ready || !s.connected {
                    return false;
                }
                s.ready = true;
                true
            });
            if became_ready {
                debug!("Prompt detected, session {} ready", self.id);
            }
        }
    }

    /// Wait until no output has arrived for the quiet period
    async fn wait_quiet(&self) {
        let quiet = self.settings.prompt_quiet_period;
        if quiet.is_zero() {
            return;
        }
        let deadline = Instant::now() + self.settings.connect_timeout;
        loop {
            let idle = self.lock_buffer().idle_for().unwrap_or(quiet);
            if idle >= quiet || Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep((quiet - idle).min(QUIET_POLL)).await;
        }
    }

    /// Wait (bounded) until another teardown has published the disconnect
    async fn wait_disconnected(&self) {
        let mut rx = self.status.subscribe();
        let limit = self.settings.disconnect_grace * 4 + Duration::from_secs(1);
        let done = timeout(limit, rx.wait_for(|s| !s.connected))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        if !done {
            warn!("Session {} still tearing down after {:?}", self.id, limit);
        }
    }

    /// Stdout hit EOF: give the exit watcher a moment to report, then tear down
    async fn on_stdout_closed(self: Arc<Self>, generation: u64) {
        let exit_rx = {
            let guard = self.handles.lock().await;
            guard
                .as_ref()
                .filter(|h| h.generation == generation)
                .map(|h| h.exit_rx.clone())
        };
        if let Some(mut rx) = exit_rx {
            wait_for_exit(&mut rx, self.settings.disconnect_grace).await;
        }
        self.teardown(TeardownCause::RemoteExit(generation)).await;
    }

    /// A remote-exit teardown for a client that has since been replaced
    fn is_stale(&self, cause: TeardownCause, current: Option<&ProcessHandles>) -> bool {
        match cause {
            TeardownCause::Requested => false,
            TeardownCause::RemoteExit(generation) => current.map_or(
                generation != self.generation.load(Ordering::SeqCst),
                |h| h.generation != generation,
            ),
        }
    }

    /// Run the teardown sequence. Returns false if another teardown is already
    /// in progress.
    ///
    /// A remote-exit teardown only ever touches the client it was spawned
    /// for; after a reconnect it is a no-op.
    async fn teardown(&self, cause: TeardownCause) -> bool {
        if self.is_stale(cause, None) {
            debug!("Session {} ignoring teardown for a replaced client", self.id);
            return true;
        }
        if self.terminating.swap(true, Ordering::SeqCst) {
            return false;
        }
        let requested = cause == TeardownCause::Requested;

        let taken = {
            let mut guard = self.handles.lock().await;
            if self.is_stale(cause, guard.as_ref()) {
                debug!("Session {} ignoring teardown for a replaced client", self.id);
                self.terminating.store(false, Ordering::SeqCst);
                return true;
            }
            guard.take()
        };
        let Some(mut handles) = taken else {
            self.status.update(|s| {
                s.connected = false;
                s.ready = false;
            });
            self.terminating.store(false, Ordering::SeqCst);
            return true;
        };

        let grace = self.settings.disconnect_grace;

        // Remote exit: let the pumps drain what the client wrote last
        if !requested {
            let _ = timeout(grace, join_all(handles.pumps.iter_mut())).await;
        }

        // 1. Detach: pumps stop appending before anything is closed
        let _ = handles.stop_tx.send(true);

        // 2. Close handles
        drop(handles.stdin);
        for pump in handles.pumps.drain(..) {
            pump.abort();
        }

        // 3. Terminate the client
        let mut exit_rx = handles.exit_rx.clone();
        if (*exit_rx.borrow()).is_none() {
            if requested {
                if let Some(pid) = handles.pid {
                    if let Err(e) = signals::send_signal(pid, Signal::Terminate) {
                        debug!("SIGTERM to pid {} failed: {}", pid, e);
                    }
                }
            }
            if !wait_for_exit(&mut exit_rx, grace).await {
                warn!(
                    "Client for session {} did not exit within {:?}, killing",
                    self.id, grace
                );
                if let Some(kill) = handles.kill_tx.take() {
                    let _ = kill.send(());
                }
                if !wait_for_exit(&mut exit_rx, grace).await {
                    if let Some(pid) = handles.pid.filter(|&pid| signals::process_alive(pid)) {
                        error!("Client pid {} of session {} survived SIGKILL", pid, self.id);
                    }
                }
            }
        }

        // 4. Publish
        let exit_status = (*exit_rx.borrow()).flatten();
        let status_text = exit_status.map_or("unknown".to_string(), |c| c.to_string());
        let line = format!("[session terminated: exit status {}]", status_text);
        {
            let mut buffer = self.lock_buffer();
            if !buffer.is_empty() && !buffer.contents().ends_with('\n') {
                buffer.append("\n");
            }
            buffer.append(&line);
            buffer.append("\n");
        }

        let host = self.transport.host();
        if requested {
            info!("Session {} to {} disconnected {}", self.id, host, line);
        } else {
            warn!("Session {} to {} ended remotely {}", self.id, host, line);
        }
        security_audit::log_session_end(&host, exit_status, handles.started.elapsed().as_secs());

        self.status.set(SessionStatus {
            connected: false,
            ready: false,
            exit_status,
        });
        self.terminating.store(false, Ordering::SeqCst);
        true
    }
}

/// Read one client stream into the session buffer until EOF or detach
async fn pump_output<R>(
    inner: Arc<SessionInner>,
    mut reader: R,
    mut stop_rx: watch::Receiver<bool>,
    kind: StreamKind,
    generation: u64,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut normalizer = StreamNormalizer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                debug!("{:?} pump for session {} detached", kind, inner.id);
                return;
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    if !*stop_rx.borrow() {
                        inner.append_output(&normalizer.finish());
                    }
                    debug!("{:?} of session {} reached EOF", kind, inner.id);
                    break;
                }
                Ok(n) => {
                    if *stop_rx.borrow() {
                        return;
                    }
                    inner.append_output(&normalizer.feed(&chunk[..n]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("{:?} read error in session {}: {}", kind, inner.id, e);
                    break;
                }
            }
        }
    }

    if kind == StreamKind::Stdout && !inner.terminating.load(Ordering::SeqCst) {
        // Teardown aborts the pumps, so it cannot run on this task
        tokio::spawn(inner.on_stdout_closed(generation));
    }
}

/// Own the child until it exits (or is killed) and publish its status
async fn watch_exit(
    inner: Arc<SessionInner>,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<ExitState>,
    generation: u64,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill client of session {}: {}", inner.id, e);
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!("Waiting on client of session {} failed: {}", inner.id, e);
            None
        }
    };
    debug!("Client of session {} exited with {:?}", inner.id, code);
    exit_tx.send_replace(Some(code));

    if !inner.terminating.load(Ordering::SeqCst) {
        tokio::spawn(async move {
            inner.teardown(TeardownCause::RemoteExit(generation)).await;
        });
    }
}

/// Wait up to `limit` for the exit watcher to report. True if it did.
async fn wait_for_exit(rx: &mut watch::Receiver<ExitState>, limit: Duration) -> bool {
    timeout(limit, rx.wait_for(Option::is_some))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

#[async_trait]
impl ShellChannel for ShellSession {
    async fn send(&self, text: &str) -> Result<()> {
        ShellSession::send(self, text).await
    }

    fn output_mark(&self) -> u64 {
        self.inner.lock_buffer().mark()
    }

    fn output_since(&self, mark: u64) -> String {
        self.inner.lock_buffer().since(mark)
    }

    fn is_connected(&self) -> bool {
        self.inner.status.read(|s| s.connected) && !self.inner.terminating.load(Ordering::SeqCst)
    }

    fn exit_status(&self) -> Option<i32> {
        self.inner.status.read(|s| s.exit_status)
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        let Ok(mut guard) = self.inner.handles.try_lock() else {
            return;
        };
        if let Some(mut handles) = guard.take() {
            self.inner.terminating.store(true, Ordering::SeqCst);
            let _ = handles.stop_tx.send(true);
            for pump in handles.pumps.drain(..) {
                pump.abort();
            }
            if let Some(kill) = handles.kill_tx.take() {
                let _ = kill.send(());
            }
            debug!("Session {} dropped while connected, client killed", self.inner.id);
        }
    }
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.inner.id)
            .field("transport", &self.inner.transport)
            .field("status", &self.inner.status.get())
            .finish()
    }
}
