//! Host event bridge
//!
//! Reads editor events as newline-delimited JSON and feeds them to the
//! lifecycle controller:
//!
//! ```text
//! {"event":"didOpen","uri":"file:///home/u/proj/a.r","languageId":"r"}
//! {"event":"didClose","uri":"file:///home/u/proj/a.r"}
//! {"event":"workspaceFolders","added":[{"uri":"file:///x","name":"x"}],"removed":[]}
//! {"event":"deactivate"}
//! ```
//!
//! Documents already open when the run starts are replayed first. Workspace
//! bookkeeping happens as each event is read. Controller handlers run as
//! tasks so a server that never connects does not stall the stream; each task
//! gets to run up to its first suspension point before the next event is
//! read. End of input, `deactivate` or cancellation stops every session.

use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::controller::{LifecycleController, Release};
use crate::scope::{DocumentRef, WorkspaceFolder, WorkspaceState};
use crate::session::SessionFactory;

/// One editor event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    DidOpen {
        uri: Url,
        #[serde(rename = "languageId")]
        language_id: String,
    },
    DidClose {
        uri: Url,
    },
    WorkspaceFolders {
        #[serde(default)]
        added: Vec<WorkspaceFolder>,
        #[serde(default)]
        removed: Vec<WorkspaceFolder>,
    },
    Deactivate,
}

/// Host bridge errors
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Failed to read host events: {0}")]
    Io(#[from] std::io::Error),
}

/// Drives a controller from a stream of host events
pub struct HostBridge<F: SessionFactory + 'static> {
    controller: Arc<LifecycleController<F>>,
    workspace: Arc<WorkspaceState>,
}

impl<F: SessionFactory + 'static> HostBridge<F> {
    /// `workspace` must be the workspace the controller was built with
    pub fn new(controller: Arc<LifecycleController<F>>, workspace: Arc<WorkspaceState>) -> Self {
        Self {
            controller,
            workspace,
        }
    }

    pub fn controller(&self) -> &Arc<LifecycleController<F>> {
        &self.controller
    }

    /// Process events until end of input, `deactivate` or `shutdown`
    ///
    /// Always deactivates the controller before returning.
    pub async fn run<R>(&self, reader: R, shutdown: CancellationToken) -> Result<(), HostError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut handlers = JoinSet::new();
        self.controller.activate(&mut handlers);

        let result = loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Host event stream closed");
                    break Ok(());
                }
                Err(e) => break Err(HostError::from(e)),
            };
            if line.trim().is_empty() {
                continue;
            }

            let event: HostEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Ignoring malformed host event: {}", e);
                    continue;
                }
            };
            if event == HostEvent::Deactivate {
                break Ok(());
            }

            self.dispatch(event, &mut handlers);
            tokio::task::yield_now().await;
            while let Some(finished) = handlers.try_join_next() {
                if let Err(e) = finished {
                    warn!("Host event handler failed: {}", e);
                }
            }
        };

        // Unfinished activations are abandoned; their markers clear on drop
        handlers.shutdown().await;
        let stopped = self.controller.deactivate().await;
        info!("Deactivated, {} sessions stopped", stopped);

        result
    }

    /// Apply an event to the workspace and hand it to the controller
    pub fn dispatch(&self, event: HostEvent, handlers: &mut JoinSet<()>) {
        let controller = Arc::clone(&self.controller);
        match event {
            HostEvent::DidOpen { uri, language_id } => {
                let document = DocumentRef::new(uri, language_id);
                self.workspace.open_document(document.clone());
                handlers.spawn(async move { controller.open_and_report(document).await });
            }
            HostEvent::DidClose { uri } => {
                let document = self
                    .workspace
                    .close_document(&uri)
                    .unwrap_or_else(|| DocumentRef::new(uri, ""));
                handlers.spawn(async move {
                    match controller.did_close(&document).await {
                        Ok(Release::Stopped(key)) => info!("Session stopped for {}", key),
                        Ok(_) => {}
                        Err(e) => warn!("Failed to stop session for {}: {}", document.uri, e),
                    }
                });
            }
            HostEvent::WorkspaceFolders { added, removed } => {
                for folder in added {
                    self.workspace.add_folder(folder);
                }
                for folder in &removed {
                    self.workspace.remove_folder(&folder.uri);
                }
                if !removed.is_empty() {
                    handlers.spawn(async move {
                        controller.did_remove_workspace_folders(&removed).await;
                    });
                }
            }
            HostEvent::Deactivate => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeKey, ScopeResolver};
    use crate::session::testing::MockSessionFactory;
    use std::time::Duration;
    use tokio::io::BufReader;

    fn bridge() -> HostBridge<MockSessionFactory> {
        let workspace = Arc::new(WorkspaceState::new());
        let controller = Arc::new(LifecycleController::new(
            MockSessionFactory::new(),
            ScopeResolver::with_home_dir("/home/u"),
            workspace.clone(),
        ));
        HostBridge::new(controller, workspace)
    }

    #[test]
    fn test_parse_events() {
        let event: HostEvent = serde_json::from_str(
            r#"{"event":"didOpen","uri":"untitled:Untitled-1","languageId":"r"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            HostEvent::DidOpen {
                uri: Url::parse("untitled:Untitled-1").unwrap(),
                language_id: "r".to_string(),
            }
        );

        let event: HostEvent = serde_json::from_str(
            r#"{"event":"workspaceFolders","removed":[{"uri":"file:///home/u/proj"}]}"#,
        )
        .unwrap();
        let HostEvent::WorkspaceFolders { added, removed } = event else {
            panic!("unexpected event");
        };
        assert!(added.is_empty());
        assert_eq!(removed[0].uri.as_str(), "file:///home/u/proj");

        assert_eq!(
            serde_json::from_str::<HostEvent>(r#"{"event":"deactivate"}"#).unwrap(),
            HostEvent::Deactivate
        );
    }

    #[tokio::test]
    async fn test_run_processes_events_and_deactivates() {
        let bridge = bridge();
        let input = [
            r#"{"event":"workspaceFolders","added":[{"uri":"file:///home/u/proj","name":"proj"}]}"#,
            r#"{"event":"didOpen","uri":"file:///home/u/proj/a.r","languageId":"r"}"#,
            r#"{"event":"didOpen","uri":"untitled:Untitled-1","languageId":"r"}"#,
            r#"not json"#,
            "",
            r#"{"event":"didOpen","uri":"file:///tmp/scratch.r","languageId":"r"}"#,
            r#"{"event":"didClose","uri":"file:///tmp/scratch.r"}"#,
            r#"{"event":"workspaceFolders","removed":[{"uri":"file:///home/u/proj"}]}"#,
        ]
        .join("\n");

        bridge
            .run(BufReader::new(input.as_bytes()), CancellationToken::new())
            .await
            .unwrap();

        let factory = bridge.controller().factory();
        assert_eq!(
            factory.created_keys(),
            vec![
                ScopeKey::from("file:///home/u/proj"),
                ScopeKey::untitled(),
                ScopeKey::from("file:///tmp/scratch.r"),
            ]
        );
        for key in factory.created_keys() {
            for state in factory.states_for(key.as_str()) {
                assert!(!state.is_running());
                assert_eq!(state.stop_count(), 1);
            }
        }
        assert!(bridge.controller().registry().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_event_ends_run() {
        let bridge = bridge();
        let input = concat!(
            r#"{"event":"didOpen","uri":"untitled:Untitled-1","languageId":"r"}"#,
            "\n",
            r#"{"event":"deactivate"}"#,
            "\n",
            r#"{"event":"didOpen","uri":"file:///tmp/late.r","languageId":"r"}"#,
            "\n",
        );

        bridge
            .run(BufReader::new(input.as_bytes()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bridge.controller().factory().created_keys(), vec![ScopeKey::untitled()]);
        assert!(bridge.controller().registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_replays_open_documents_without_waiting() {
        let workspace = Arc::new(WorkspaceState::new());
        workspace.open_document(DocumentRef::new(
            Url::parse("file:///tmp/scratch.r").unwrap(),
            "r",
        ));
        let controller = Arc::new(LifecycleController::new(
            MockSessionFactory::new().with_delay(Duration::from_secs(3600)),
            ScopeResolver::with_home_dir("/home/u"),
            workspace.clone(),
        ));
        let bridge = HostBridge::new(controller, workspace);

        // The replayed server never connects, events are still read
        let input = r#"{"event":"didOpen","uri":"untitled:Untitled-1","languageId":"r"}"#;
        tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run(BufReader::new(input.as_bytes()), CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(bridge.controller().factory().attempts(), 2);
        assert!(bridge.controller().registry().is_empty());
        assert_eq!(bridge.controller().registry().initializing_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_deactivates() {
        let bridge = bridge();
        let (reader, _writer) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        bridge
            .run(BufReader::new(reader), shutdown)
            .await
            .unwrap();
        assert!(bridge.controller().registry().is_empty());
    }
}
