//! Server launch and channel bootstrap
//!
//! Turns a [`ServerCommand`] into a running R process plus a live byte
//! channel to it. Two strategies exist:
//!
//! - **Stdio**: the child's stdin/stdout are the channel
//! - **Loopback**: listen on `127.0.0.1:0`, start R with the port, accept the
//!   first connection and stop listening
//!
//! The returned future only resolves once the channel is live. When R cannot
//! be started, or exits before connecting, it never resolves; callers wanting
//! a bound must add their own timeout.

pub mod command;
pub mod loopback;
pub mod resolver;
pub mod strategy;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::io::{
    ChildProcessManager, OutputSink, ProcessError, ProcessExitEvent, ProcessExitHandler,
    ProcessManager, StderrMonitor, StdioMode, StreamTransport,
};

pub use command::ServerCommand;
pub use loopback::LoopbackListener;
pub use resolver::{BinaryResolver, DefaultBinaryResolver};
pub use strategy::TransportStrategy;

/// Launch errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to listen on loopback: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to accept the server connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
}

/// A started server with its channel
pub struct LaunchedServer {
    pub process: ChildProcessManager,
    pub transport: StreamTransport,
    pub strategy: TransportStrategy,
    /// Port the server connected back on, for the loopback strategy
    pub port: Option<u16>,
}

impl std::fmt::Debug for LaunchedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedServer")
            .field("pid", &self.process.pid())
            .field("strategy", &self.strategy)
            .field("port", &self.port)
            .finish()
    }
}

/// Reports process exits to the output sink, then hands them on
struct ExitReporter {
    sink: Arc<dyn OutputSink>,
    next: Option<Arc<dyn ProcessExitHandler>>,
}

#[async_trait]
impl ProcessExitHandler for ExitReporter {
    async fn on_process_exit(&self, event: ProcessExitEvent) {
        let pid = event
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "?".to_string());
        self.sink
            .append_line(&format!("R Language Server ({pid}) exited {}", event.describe()));
        if !event.is_success() {
            self.sink.show();
        }
        if let Some(next) = &self.next {
            next.on_process_exit(event).await;
        }
    }
}

fn prepare(
    process: &mut ChildProcessManager,
    sink: &Arc<dyn OutputSink>,
    on_exit: Option<Arc<dyn ProcessExitHandler>>,
) {
    let stderr_sink = Arc::clone(sink);
    process.on_stderr_line(move |line| stderr_sink.append_line(&line));
    process.on_process_exit(Arc::new(ExitReporter {
        sink: Arc::clone(sink),
        next: on_exit,
    }));
}

/// Start the process; `false` when it could not be spawned
async fn start_reporting(process: &mut ChildProcessManager, sink: &Arc<dyn OutputSink>) -> bool {
    match process.start().await {
        Ok(()) => {
            let pid = process
                .pid()
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "?".to_string());
            sink.append_line(&format!("R Language Server ({pid}) started"));
            true
        }
        Err(e) => {
            error!("Failed to start {}: {}", process.command(), e);
            sink.append_line(&format!(
                "Failed to start R Language Server ({}): {}",
                process.command(),
                e
            ));
            sink.show();
            false
        }
    }
}

/// Start an R language server and connect to it
///
/// Server stderr goes to `sink` line by line. Exits are reported to `sink`
/// (shown unless the exit code is 0) before `on_exit` is called.
pub async fn spawn_server(
    command: &ServerCommand,
    strategy: TransportStrategy,
    sink: Arc<dyn OutputSink>,
    on_exit: Option<Arc<dyn ProcessExitHandler>>,
) -> Result<LaunchedServer, LaunchError> {
    info!(
        "Launching R language server in {} ({})",
        command.working_directory.display(),
        strategy
    );

    match strategy {
        TransportStrategy::Stdio => {
            let mut process = command.process_manager(None, StdioMode::Piped);
            prepare(&mut process, &sink, on_exit);
            if !start_reporting(&mut process, &sink).await {
                // There is no channel to wait for
                return std::future::pending().await;
            }
            let transport = process.create_stdio_transport()?;

            Ok(LaunchedServer {
                process,
                transport,
                strategy,
                port: None,
            })
        }
        TransportStrategy::Loopback => {
            let listener = LoopbackListener::bind().await.map_err(LaunchError::Bind)?;
            let port = listener.port();

            let mut process = command.process_manager(Some(port), StdioMode::Detached);
            prepare(&mut process, &sink, on_exit);
            // A failed spawn leaves the accept below waiting forever
            start_reporting(&mut process, &sink).await;

            let stream = listener.accept_one().await.map_err(LaunchError::Accept)?;
            info!("R language server connected on port {}", port);

            Ok(LaunchedServer {
                process,
                transport: StreamTransport::from_tcp(stream),
                strategy,
                port: Some(port),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::{MemoryOutputSink, Transport};
    use std::path::PathBuf;
    use std::time::Duration;

    /// Command running a shell script in place of R
    fn shell_command(script: &str) -> ServerCommand {
        ServerCommand {
            program: "sh".to_string(),
            base_args: vec!["-c".to_string(), script.to_string()],
            debug: false,
            lang: None,
            working_directory: PathBuf::from("/"),
        }
    }

    #[tokio::test]
    async fn test_stdio_channel_and_stderr() {
        // `sh -c script -e <expr>`: the trailing words become $0 and $1
        let command = shell_command("echo 'loading' >&2; echo; read line; echo \"got $line\"");
        let sink = Arc::new(MemoryOutputSink::new());

        let mut launched = spawn_server(&command, TransportStrategy::Stdio, sink.clone(), None)
            .await
            .unwrap();
        assert_eq!(launched.port, None);

        launched.transport.send("hello\n").await.unwrap();
        let mut received = String::new();
        while !received.contains("got hello") {
            received.push_str(&launched.transport.receive().await.unwrap());
        }

        let exit = launched
            .process
            .wait_for_exit(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(exit.is_success());

        let lines = sink.lines();
        let pid = exit.pid.unwrap();
        assert!(lines.contains(&format!("R Language Server ({pid}) started")));
        assert!(lines.contains(&"loading".to_string()));
        assert!(lines.contains(&format!("R Language Server ({pid}) exited with exit code 0")));
        assert_eq!(sink.show_count(), 0);
    }

    #[tokio::test]
    async fn test_stderr_forwarded_verbatim_including_blank_lines() {
        let command = shell_command("printf 'first\\n\\n  indented  \\n' >&2");
        let sink = Arc::new(MemoryOutputSink::new());

        let launched = spawn_server(&command, TransportStrategy::Stdio, sink.clone(), None)
            .await
            .unwrap();
        launched
            .process
            .wait_for_exit(Duration::from_secs(5))
            .await
            .unwrap();

        let server_lines: Vec<String> = sink
            .lines()
            .into_iter()
            .filter(|line| !line.starts_with("R Language Server ("))
            .collect();
        assert_eq!(server_lines, vec!["first", "", "  indented  "]);
    }

    #[tokio::test]
    async fn test_failed_exit_shows_sink() {
        let command = shell_command("echo 'Error: no package' >&2; exit 3");
        let sink = Arc::new(MemoryOutputSink::new());

        let launched = spawn_server(&command, TransportStrategy::Stdio, sink.clone(), None)
            .await
            .unwrap();
        let exit = launched
            .process
            .wait_for_exit(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(exit.code, Some(3));

        let pid = exit.pid.unwrap();
        let lines = sink.lines();
        assert!(lines.contains(&"Error: no package".to_string()));
        assert!(lines.contains(&format!("R Language Server ({pid}) exited with exit code 3")));
        assert_eq!(sink.show_count(), 1);
    }

    #[tokio::test]
    async fn test_loopback_handshake() {
        // The run expression arrives as $1; connect back to the port it names
        let script = r#"
            port=$(echo "$1" | sed 's/[^0-9]//g')
            exec python3 -c "import socket,sys; s=socket.create_connection(('127.0.0.1', int(sys.argv[1]))); s.sendall(b'hi'); s.recv(1)" "$port"
        "#;
        if std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_err()
        {
            return;
        }
        let command = shell_command(script);
        let sink = Arc::new(MemoryOutputSink::new());

        let mut launched = tokio::time::timeout(
            Duration::from_secs(10),
            spawn_server(&command, TransportStrategy::Loopback, sink.clone(), None),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(launched.port.is_some());
        assert_eq!(
            command.run_expression(launched.port),
            format!("languageserver::run(port={})", launched.port.unwrap())
        );
        assert_eq!(launched.transport.receive().await.unwrap(), "hi");

        launched.process.stop(crate::io::StopMode::Force).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_never_connects() {
        let command = ServerCommand {
            program: "/nonexistent/R".to_string(),
            base_args: Vec::new(),
            debug: false,
            lang: None,
            working_directory: PathBuf::from("/"),
        };
        let sink = Arc::new(MemoryOutputSink::new());

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            spawn_server(&command, TransportStrategy::Loopback, sink.clone(), None),
        )
        .await;
        assert!(result.is_err());

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Failed to start R Language Server (/nonexistent/R)"));
        assert_eq!(sink.show_count(), 1);
    }
}
