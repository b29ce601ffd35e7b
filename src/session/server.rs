//! Session backed by a real R language server process

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::io::{
    ChildProcessManager, OutputSink, ProcessExitEvent, ProcessExitHandler, ProcessManager,
    StopMode, StreamTransport,
};
use crate::launcher::{LaunchError, LaunchedServer, ServerCommand, TransportStrategy, spawn_server};
use crate::lsp::LanguageClient;
use crate::scope::{ScopeDescriptor, ScopeKey};
use crate::session::{ManagedSession, SessionError, SessionStatus, SharedStatus};

/// Time allowed for the shutdown/exit handshake before the process is signalled
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Marks the session stopped and drops its channel when the server exits
struct SessionExitHandler {
    key: ScopeKey,
    status: SharedStatus,
    channel: CancellationToken,
}

#[async_trait]
impl ProcessExitHandler for SessionExitHandler {
    async fn on_process_exit(&self, event: ProcessExitEvent) {
        if self.status.get() == SessionStatus::Stopping {
            debug!("R language server for {} exited while stopping", self.key);
        } else {
            warn!(
                "R language server for {} exited {}",
                self.key,
                event.describe()
            );
        }
        self.status.set(SessionStatus::Stopped);
        self.channel.cancel();
    }
}

/// One R language server process and the channel to it
pub struct ServerSession {
    scope: ScopeDescriptor,
    process: Mutex<ChildProcessManager>,
    client: Mutex<LanguageClient<StreamTransport>>,
    status: SharedStatus,
    /// Cancelled when the session is over; closes the transport
    channel: CancellationToken,
    strategy: TransportStrategy,
    port: Option<u16>,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("key", &self.scope.key)
            .field("pid", &self.pid)
            .field("strategy", &self.strategy)
            .field("status", &self.status.get())
            .finish()
    }
}

impl ServerSession {
    /// Start a server for `scope` and wait until its channel is live
    ///
    /// Inherits the launcher's behavior: this does not return when the
    /// server never connects.
    pub async fn launch(
        scope: ScopeDescriptor,
        command: &ServerCommand,
        strategy: TransportStrategy,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self, LaunchError> {
        let status = SharedStatus::new(SessionStatus::Starting);
        let channel = CancellationToken::new();
        let on_exit = Arc::new(SessionExitHandler {
            key: scope.key.clone(),
            status: status.clone(),
            channel: channel.clone(),
        });

        let launched = spawn_server(command, strategy, sink, Some(on_exit)).await?;
        Ok(Self::from_launched(scope, launched, status, channel))
    }

    fn from_launched(
        scope: ScopeDescriptor,
        launched: LaunchedServer,
        status: SharedStatus,
        channel: CancellationToken,
    ) -> Self {
        let LaunchedServer {
            process,
            transport,
            strategy,
            port,
        } = launched;

        let transport_token = transport.shutdown_token();
        let session_token = channel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = session_token.cancelled() => transport_token.cancel(),
                _ = transport_token.cancelled() => {}
            }
        });

        // A server that already died stays stopped
        if status.transition(SessionStatus::Starting, SessionStatus::Running) {
            info!("R language server for {} is running", scope.key);
        }

        Self {
            pid: process.pid(),
            scope,
            process: Mutex::new(process),
            client: Mutex::new(LanguageClient::new(transport)),
            status,
            channel,
            strategy,
            port,
            started_at: Utc::now(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn key(&self) -> &ScopeKey {
        &self.scope.key
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn strategy(&self) -> TransportStrategy {
        self.strategy
    }

    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> TimeDelta {
        Utc::now() - self.started_at
    }

    /// Forward a JSON-RPC message to the server
    pub async fn send(&self, message: &Value) -> Result<(), SessionError> {
        if !self.needs_stop() {
            return Err(SessionError::stopped(self.scope.key.as_str()));
        }
        self.client.lock().await.send_message(message).await?;
        Ok(())
    }

    /// Next JSON-RPC message from the server
    pub async fn receive(&self) -> Result<Value, SessionError> {
        Ok(self.client.lock().await.receive().await?)
    }
}

#[async_trait]
impl ManagedSession for ServerSession {
    fn scope(&self) -> &ScopeDescriptor {
        &self.scope
    }

    fn needs_stop(&self) -> bool {
        self.status.get().needs_stop()
    }

    async fn stop(&self) -> Result<(), SessionError> {
        if !self.status.begin_stop() {
            debug!("Session {} already stopped", self.scope.key);
            return Ok(());
        }
        info!("Stopping R language server for {}", self.scope.key);

        let handshake = tokio::time::timeout(self.shutdown_timeout, async {
            let mut client = self.client.lock().await;
            if client.is_connected() {
                client.shutdown().await?;
            }
            client.close().await
        })
        .await;
        match handshake {
            Ok(Ok(())) => debug!("Shutdown handshake completed for {}", self.scope.key),
            Ok(Err(e)) => warn!("Shutdown handshake failed for {}: {}", self.scope.key, e),
            Err(_) => warn!(
                "Shutdown handshake for {} timed out after {:?}",
                self.scope.key, self.shutdown_timeout
            ),
        }

        self.channel.cancel();

        let mut process = self.process.lock().await;
        let result = if process.is_running() {
            process.stop(StopMode::Graceful).await
        } else {
            Ok(())
        };
        self.status.set(SessionStatus::Stopped);
        info!(
            "R language server for {} stopped after {}s",
            self.scope.key,
            self.uptime().num_seconds()
        );

        result.map_err(SessionError::from)
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.channel.cancel();
        let process = self.process.get_mut();
        if process.is_running() {
            warn!(
                "Session {} dropped without stop() - force killing process",
                self.scope.key
            );
            process.kill_sync();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::MemoryOutputSink;
    use crate::session::testing::scope;
    use std::path::PathBuf;

    fn shell_command(script: &str) -> ServerCommand {
        ServerCommand {
            program: "sh".to_string(),
            base_args: vec!["-c".to_string(), script.to_string()],
            debug: false,
            lang: None,
            working_directory: PathBuf::from("/"),
        }
    }

    async fn wait_until_stopped(session: &ServerSession) {
        for _ in 0..100 {
            if !session.needs_stop() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("session did not stop");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let sink = Arc::new(MemoryOutputSink::new());
        let session = ServerSession::launch(
            scope("file:///tmp/a.r"),
            &shell_command("cat > /dev/null"),
            TransportStrategy::Stdio,
            sink.clone(),
        )
        .await
        .unwrap()
        .with_shutdown_timeout(Duration::from_millis(200));

        assert_eq!(session.status(), SessionStatus::Running);
        assert!(session.pid().is_some());
        assert!(session.needs_stop());
        assert!(session.uptime() >= TimeDelta::zero());
        assert!(session.started_at() <= Utc::now());

        session.stop().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(!session.needs_stop());

        session.stop().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(matches!(
            session.send(&serde_json::json!({})).await,
            Err(SessionError::Stopped { .. })
        ));
    }

    #[tokio::test]
    async fn test_crash_marks_session_stopped() {
        let sink = Arc::new(MemoryOutputSink::new());
        let session = ServerSession::launch(
            scope("untitled"),
            &shell_command("read line; echo 'fatal' >&2; exit 2"),
            TransportStrategy::Stdio,
            sink.clone(),
        )
        .await
        .unwrap();
        assert!(session.needs_stop());

        session.send(&serde_json::json!({"jsonrpc": "2.0"})).await.unwrap();
        wait_until_stopped(&session).await;

        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(sink.lines().contains(&"fatal".to_string()));
        assert_eq!(sink.show_count(), 1);

        // Nothing left to stop
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_handshake() {
        // Answers the first launcher request and exits on the exit notification
        let script = r#"
            printf 'Content-Length: 55\r\n\r\n{"jsonrpc":"2.0","id":"r-lsp-launcher/1","result":null}'
            cat > /dev/null
        "#;
        let sink = Arc::new(MemoryOutputSink::new());
        let session = ServerSession::launch(
            scope("file:///tmp/b.r"),
            &shell_command(script),
            TransportStrategy::Stdio,
            sink.clone(),
        )
        .await
        .unwrap();

        session.stop().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
    }
}
