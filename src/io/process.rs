//! Process management layer
//!
//! Handles the language server process lifecycle, stderr forwarding and exit
//! notification, completely separate from transport concerns.

use crate::io::transport::{StreamTransport, Transport};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
// warn! is used in non-unix code blocks as well
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Constants
// ============================================================================

/// Time a process gets to exit after SIGTERM before it is killed outright
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long the exit notification waits for buffered stderr to be forwarded
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

// ============================================================================
// Process State Management
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Try graceful shutdown first (SIGTERM), then force kill if needed
    Graceful,
    /// Force kill immediately
    Force,
}

/// What the child's stdin/stdout are connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// stdin/stdout are piped and become the message channel
    Piped,
    /// stdin/stdout are detached; the channel is established out of band
    Detached,
}

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process has been stopped (either gracefully or forcefully) or exited
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

// ============================================================================
// Process Exit Events
// ============================================================================

/// Event fired when the process exits, for whatever reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExitEvent {
    pub pid: Option<u32>,
    /// Exit code, absent when the process was terminated by a signal
    pub code: Option<i32>,
    /// Terminating signal (unix only)
    pub signal: Option<i32>,
}

impl ProcessExitEvent {
    pub fn from_status(pid: Option<u32>, status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            pid,
            code: status.code(),
            signal,
        }
    }

    /// Only a clean zero exit counts as success
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human readable tail of the exit message, e.g. "with exit code 1"
    pub fn describe(&self) -> String {
        match (self.signal, self.code) {
            (Some(signal), _) => format!("from signal {}", signal_name(signal)),
            (None, Some(code)) => format!("with exit code {code}"),
            (None, None) => "with unknown status".to_string(),
        }
    }
}

fn signal_name(signal: i32) -> String {
    #[cfg(unix)]
    {
        let name = match signal {
            libc::SIGHUP => "SIGHUP",
            libc::SIGINT => "SIGINT",
            libc::SIGQUIT => "SIGQUIT",
            libc::SIGABRT => "SIGABRT",
            libc::SIGKILL => "SIGKILL",
            libc::SIGSEGV => "SIGSEGV",
            libc::SIGPIPE => "SIGPIPE",
            libc::SIGTERM => "SIGTERM",
            _ => return signal.to_string(),
        };
        name.to_string()
    }
    #[cfg(not(unix))]
    {
        signal.to_string()
    }
}

// ============================================================================
// Process Exit Handler Trait
// ============================================================================

/// Trait for handling process exit events
#[async_trait]
pub trait ProcessExitHandler: Send + Sync {
    /// Called once when the process exits
    async fn on_process_exit(&self, event: ProcessExitEvent);
}

// ============================================================================
// Stderr Monitoring Trait
// ============================================================================

/// Trait for monitoring stderr output from external processes
pub trait StderrMonitor: Send + Sync {
    /// Install a handler for stderr lines
    ///
    /// The handler is called for each line received from stderr, with the line
    /// terminator removed and nothing else altered. Installing a new handler
    /// replaces the previous one. Must be called before the process starts.
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static;
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,

    #[error("Process stdio is detached, no stdio transport available")]
    StdioDetached,
}

/// Trait for managing external process lifecycle
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the external process
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Stop the external process and wait for it to go away
    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    /// Check if the process is currently running
    fn is_running(&self) -> bool;

    /// Take the stdio transport for communicating with the process
    fn create_stdio_transport(&mut self) -> Result<StreamTransport, Self::Error>;

    /// Synchronous force kill for Drop trait implementations
    fn kill_sync(&mut self);
}

/// Manages a child process spawned via Command
pub struct ChildProcessManager {
    /// Command to execute
    command: String,

    /// Command arguments
    args: Vec<String>,

    /// Working directory for the process (optional)
    working_directory: Option<PathBuf>,

    /// Environment overrides on top of the inherited environment
    env: Vec<(String, String)>,

    /// Whether stdin/stdout are piped
    stdio_mode: StdioMode,

    /// Grace period between SIGTERM and kill
    grace_period: Duration,

    /// Thread-safe process state
    state: Arc<Mutex<ProcessState>>,

    /// Stdio transport (created when the process starts in piped mode)
    stdio_transport: Option<StreamTransport>,

    /// Stderr handler
    stderr_handler: Option<Box<dyn Fn(String) + Send + Sync>>,

    /// Stderr monitoring task handle
    stderr_task: Option<JoinHandle<()>>,

    /// Process wait task handle (waits for child to exit)
    wait_task: Option<JoinHandle<()>>,

    /// Process exit event handler
    exit_handler: Option<Arc<dyn ProcessExitHandler>>,

    /// Asks the wait task to kill the child
    kill_tx: Option<oneshot::Sender<()>>,

    /// Latest exit event, published by the wait task
    exit_rx: Option<watch::Receiver<Option<ProcessExitEvent>>>,
}

impl ChildProcessManager {
    /// Create a new child process manager
    ///
    /// # Arguments
    /// * `command` - The command to execute
    /// * `args` - Command line arguments
    /// * `working_dir` - Optional working directory for the process
    pub fn new(command: String, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_directory: working_dir,
            env: Vec::new(),
            stdio_mode: StdioMode::Piped,
            grace_period: DEFAULT_STOP_GRACE_PERIOD,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            stdio_transport: None,
            stderr_handler: None,
            stderr_task: None,
            wait_task: None,
            exit_handler: None,
            kill_tx: None,
            exit_rx: None,
        }
    }

    /// Override an environment variable for the child
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Choose whether stdin/stdout are piped
    pub fn with_stdio_mode(mut self, mode: StdioMode) -> Self {
        self.stdio_mode = mode;
        self
    }

    /// Change the SIGTERM grace period used by graceful stops
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Install the handler notified when the process exits
    pub fn on_process_exit(&mut self, handler: Arc<dyn ProcessExitHandler>) {
        self.exit_handler = Some(handler);
    }

    /// Get current process state (thread-safe)
    pub fn get_state(&self) -> ProcessState {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        self.state.lock().unwrap().clone()
    }

    /// PID of the running process
    pub fn pid(&self) -> Option<u32> {
        self.get_state().pid()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Wait until the process has exited, or the timeout elapses
    ///
    /// Returns the exit event when the process exited in time.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ProcessExitEvent> {
        let mut rx = self.exit_rx.clone()?;
        let event = match tokio::time::timeout(timeout, rx.wait_for(|event| event.is_some())).await
        {
            Ok(Ok(event)) => (*event).clone(),
            // Wait task is gone without publishing an exit
            Ok(Err(_)) => None,
            Err(_) => None,
        };
        event
    }

    fn request_kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }

    /// Spawn the stderr monitoring task
    ///
    /// Always drains stderr to prevent the child process from blocking.
    /// If a handler is installed, lines are forwarded to it.
    fn spawn_stderr_monitor(&mut self, stderr: ChildStderr, done: oneshot::Sender<()>) {
        let handler = self.stderr_handler.take();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buffer = Vec::new();

            trace!(
                "ChildProcessManager: Starting stderr monitoring (handler: {})",
                if handler.is_some() {
                    "installed"
                } else {
                    "draining only"
                }
            );

            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(0) => {
                        trace!("ChildProcessManager: stderr EOF reached");
                        break;
                    }
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        let line = line.trim_end_matches(['\r', '\n']).to_string();
                        if let Some(ref handler) = handler {
                            handler(line);
                        } else {
                            trace!("ChildProcessManager: stderr drained: {}", line);
                        }
                    }
                    Err(e) => {
                        error!("Failed to read from stderr: {}", e);
                        break;
                    }
                }
            }

            let _ = done.send(());
            trace!("ChildProcessManager: stderr monitoring finished");
        });

        self.stderr_task = Some(task);
    }

    /// Spawn the wait task that monitors child process exit
    fn spawn_wait_task(&mut self, mut child: Child, stderr_done: oneshot::Receiver<()>) {
        let pid = self.get_state().pid();
        let exit_handler = self.exit_handler.clone();
        let state = Arc::clone(&self.state);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            trace!("ChildProcessManager: Starting wait task for PID {:?}", pid);

            // A dropped kill sender also ends the child, like kill_on_drop
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = &mut kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    debug!("ChildProcessManager: killing PID {:?}", pid);
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill process {:?}: {}", pid, e);
                    }
                    child.wait().await
                }
            };

            let event = match status {
                Ok(exit_status) => ProcessExitEvent::from_status(pid, exit_status),
                Err(e) => {
                    error!("Error waiting for child process: {}", e);
                    ProcessExitEvent {
                        pid,
                        code: None,
                        signal: None,
                    }
                }
            };
            info!("Process PID {:?} exited {}", pid, event.describe());

            if let Ok(mut process_state) = state.lock() {
                *process_state = ProcessState::Stopped;
            }

            // Let buffered stderr reach its handler before reporting the exit
            let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_done).await;

            // Waiters observe the exit only after the handler has seen it
            if let Some(handler) = &exit_handler {
                handler.on_process_exit(event.clone()).await;
            }
            let _ = exit_tx.send(Some(event));

            trace!("ChildProcessManager: Wait task finished for PID {:?}", pid);
        });

        self.kill_tx = Some(kill_tx);
        self.exit_rx = Some(exit_rx);
        self.wait_task = Some(task);
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting process: {} {:?}", self.command, self.args);

        let mut command_builder = Command::new(&self.command);
        command_builder
            .args(&self.args)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match self.stdio_mode {
            StdioMode::Piped => {
                command_builder.stdin(Stdio::piped()).stdout(Stdio::piped());
            }
            StdioMode::Detached => {
                command_builder.stdin(Stdio::null()).stdout(Stdio::null());
            }
        }

        if let Some(working_dir) = &self.working_directory {
            command_builder.current_dir(working_dir);
        }

        for (key, value) in &self.env {
            command_builder.env(key, value);
        }

        let mut child = command_builder.spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Io(io::Error::other("Failed to get process ID")))?;
        info!("Process started with PID: {}", pid);

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.state.lock().unwrap() = ProcessState::Running { pid };

        if self.stdio_mode == StdioMode::Piped {
            let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
            let stdout = child
                .stdout
                .take()
                .ok_or(ProcessError::StdoutNotAvailable)?;
            self.stdio_transport = Some(StreamTransport::new(stdout, stdin));
        }

        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        let (stderr_done_tx, stderr_done_rx) = oneshot::channel();
        self.spawn_stderr_monitor(stderr, stderr_done_tx);
        self.spawn_wait_task(child, stderr_done_rx);

        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = match self.get_state().pid() {
            Some(pid) => pid,
            None => return Err(ProcessError::NotStarted),
        };

        match mode {
            StopMode::Graceful => info!("Gracefully stopping process with PID: {}", pid),
            StopMode::Force => info!("Force killing process with PID: {}", pid),
        }

        // Close stdio transport first, the server treats EOF as a hint to quit
        if let Some(mut transport) = self.stdio_transport.take() {
            let _ = transport.close().await;
        }

        let mut exited = false;
        if mode == StopMode::Graceful {
            #[cfg(unix)]
            {
                // SAFETY: plain signal delivery to a pid we spawned
                if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
                    info!("Sent SIGTERM to process {}", pid);
                }
                exited = self.wait_for_exit(self.grace_period).await.is_some();
                if !exited {
                    warn!(
                        "Process {} still running after {:?}, killing",
                        pid, self.grace_period
                    );
                }
            }
            #[cfg(not(unix))]
            {
                warn!("Graceful termination unsupported on this platform, killing process");
            }
        }

        if !exited {
            self.request_kill();
            if self.wait_for_exit(self.grace_period).await.is_none() {
                warn!("Process {} did not report exit after kill", pid);
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.state.lock().unwrap() = ProcessState::Stopped;

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    fn create_stdio_transport(&mut self) -> Result<StreamTransport, Self::Error> {
        match (self.stdio_mode, self.stdio_transport.take()) {
            (StdioMode::Detached, _) => Err(ProcessError::StdioDetached),
            (StdioMode::Piped, Some(transport)) => Ok(transport),
            (StdioMode::Piped, None) => Err(ProcessError::NotStarted),
        }
    }

    fn kill_sync(&mut self) {
        let pid = match self.get_state().pid() {
            Some(pid) => pid,
            None => return, // Already stopped
        };

        info!("Synchronously force killing process with PID: {}", pid);
        self.request_kill();

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.state.lock().unwrap() = ProcessState::Stopped;
    }
}

impl StderrMonitor for ChildProcessManager {
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }
}
