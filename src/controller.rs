//! Lifecycle controller
//!
//! Reacts to editor document and workspace events: starts the session a newly
//! opened document needs, and stops sessions once nothing refers to them.
//!
//! Handlers may interleave at await points. Duplicate starts are prevented by
//! the registry's check-and-mark; creations are never cancelled, so a session
//! whose last document closes while it is still starting stays registered
//! until a later close, folder removal or deactivation.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::registry::{ActivationCheck, SessionRegistry};
use crate::scope::{
    DocumentRef, ScopeKey, ScopeResolver, Workspace, WorkspaceFolder, selector_matches,
};
use crate::session::{ManagedSession, SessionError, SessionFactory};

/// What a document open did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// No session serves this document
    Ignored,
    /// The scope is already starting, running, or still marked from an
    /// earlier open
    AlreadyHandled,
    /// A new session was started for the scope
    Started(ScopeKey),
}

/// What a document close did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Other documents still need the session
    Retained,
    /// The session was removed and stopped
    Stopped(ScopeKey),
    /// There was no session for the document
    NoSession,
}

/// Routes editor events to sessions
pub struct LifecycleController<F: SessionFactory> {
    factory: F,
    registry: Arc<SessionRegistry<F::Session>>,
    resolver: ScopeResolver,
    workspace: Arc<dyn Workspace>,
}

impl<F> LifecycleController<F>
where
    F: SessionFactory + 'static,
{
    pub fn new(factory: F, resolver: ScopeResolver, workspace: Arc<dyn Workspace>) -> Self {
        Self {
            factory,
            registry: Arc::new(SessionRegistry::new()),
            resolver,
            workspace,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<F::Session>> {
        &self.registry
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    /// Start the session a newly opened document needs
    #[instrument(name = "did_open", skip_all, fields(uri = %document.uri, language = %document.language_id))]
    pub async fn did_open(&self, document: &DocumentRef) -> Result<Activation, SessionError> {
        let Some(scope) = self.resolver.resolve_in(document, self.workspace.as_ref()) else {
            return Ok(Activation::Ignored);
        };

        let guard = match self.registry.begin_activation(&scope.key) {
            ActivationCheck::Handled => {
                debug!("Session for {} already handled", scope.key);
                return Ok(Activation::AlreadyHandled);
            }
            ActivationCheck::Proceed(guard) => guard,
        };

        crate::log_session_event!(tracing::Level::INFO, scope.key, "starting");
        // On failure the guard is dropped here, clearing the marker
        let session = self.factory.create(&scope).await?;
        guard.complete(session);
        crate::log_session_event!(tracing::Level::INFO, scope.key, "running");

        Ok(Activation::Started(scope.key))
    }

    /// Stop the session of a closed document unless it is still needed
    #[instrument(name = "did_close", skip_all, fields(uri = %document.uri))]
    pub async fn did_close(&self, document: &DocumentRef) -> Result<Release, SessionError> {
        let still_needed = if document.is_untitled() {
            self.any_other_open(document, |open| open.is_untitled())
        } else if document.is_notebook_cell() {
            self.any_other_open(document, |open| open.same_notebook(document))
        } else {
            false
        };
        if still_needed {
            debug!("Session still used by other open documents");
            return Ok(Release::Retained);
        }

        let key = ScopeKey::for_closed_document(document);
        match self.registry.remove(&key) {
            Some(session) => {
                crate::log_session_event!(tracing::Level::INFO, key, "stopping");
                session.stop().await?;
                Ok(Release::Stopped(key))
            }
            None => Ok(Release::NoSession),
        }
    }

    fn any_other_open(
        &self,
        closing: &DocumentRef,
        matches: impl Fn(&DocumentRef) -> bool,
    ) -> bool {
        self.workspace
            .open_documents()
            .iter()
            .filter(|open| open.uri != closing.uri)
            .any(matches)
    }

    /// Stop the sessions of removed workspace folders
    ///
    /// Returns the keys of the sessions that were stopped.
    #[instrument(name = "did_remove_workspace_folders", skip_all, fields(count = folders.len()))]
    pub async fn did_remove_workspace_folders(
        &self,
        folders: &[WorkspaceFolder],
    ) -> Vec<ScopeKey> {
        let mut stopped = Vec::new();
        for folder in folders {
            let key = ScopeKey::for_folder(folder);
            let Some(session) = self.registry.remove(&key) else {
                debug!("No session for removed folder {}", key);
                continue;
            };
            crate::log_session_event!(tracing::Level::INFO, key, "folder removed");
            if let Err(e) = session.stop().await {
                warn!("Failed to stop session for {}: {}", key, e);
            }
            stopped.push(key);
        }
        stopped
    }

    /// [`Self::did_open`] with the outcome logged instead of returned
    pub async fn open_and_report(&self, document: DocumentRef) {
        match self.did_open(&document).await {
            Ok(Activation::Started(key)) => info!("Session started for {}", key),
            Ok(_) => {}
            Err(e) => warn!("Failed to start session for {}: {}", document.uri, e),
        }
    }

    /// Replay every document the workspace already has open
    ///
    /// Each replayed open becomes a task in `activations`; a server that never
    /// connects holds only its own task. Returns the number of documents
    /// replayed.
    #[instrument(name = "activate", skip_all)]
    pub fn activate(self: &Arc<Self>, activations: &mut JoinSet<()>) -> usize {
        let documents = self.workspace.open_documents();
        info!("Activating with {} open documents", documents.len());

        let replayed = documents.len();
        for document in documents {
            let controller = Arc::clone(self);
            activations.spawn(async move { controller.open_and_report(document).await });
        }
        replayed
    }

    /// Stop every session, concurrently, and empty the registry
    ///
    /// Returns the number of sessions stopped.
    #[instrument(name = "deactivate", skip_all)]
    pub async fn deactivate(&self) -> usize {
        let sessions = self.registry.drain();
        info!("Deactivating, stopping {} sessions", sessions.len());

        let mut stops = JoinSet::new();
        for (key, session) in sessions {
            stops.spawn(async move {
                let result = session.stop().await;
                (key, result)
            });
        }

        let mut stopped = 0;
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((_, Ok(()))) => stopped += 1,
                Ok((key, Err(e))) => warn!("Failed to stop session for {}: {}", key, e),
                Err(e) => warn!("Stop task failed: {}", e),
            }
        }
        stopped
    }

    /// The running session serving a document
    ///
    /// Looks at the session of the document's own scope first, then at any
    /// session whose document selector matches it.
    pub fn session_for(&self, document: &DocumentRef) -> Option<Arc<F::Session>> {
        if let Some(scope) = self.resolver.resolve_in(document, self.workspace.as_ref()) {
            if let Some(session) = self.registry.get(&scope.key) {
                if session.needs_stop() {
                    return Some(session);
                }
            }
        }

        self.registry.sessions().into_iter().find(|session| {
            session.needs_stop() && selector_matches(&session.scope().document_selector, document)
        })
    }
}
