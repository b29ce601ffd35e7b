//! Mock sessions for controller and registry tests

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::scope::{ScopeDescriptor, ScopeKey, ScopeKind};
use crate::session::{ManagedSession, SessionError, SessionFactory};

/// Minimal descriptor for a key
pub fn scope(key: &str) -> ScopeDescriptor {
    ScopeDescriptor {
        key: ScopeKey::from(key),
        kind: ScopeKind::StrayFile,
        document_selector: Vec::new(),
        working_directory: PathBuf::from("/tmp"),
        workspace_folder: None,
    }
}

/// State shared between a mock session and the test inspecting it
#[derive(Debug, Default)]
pub struct MockSessionState {
    running: AtomicBool,
    stops: AtomicUsize,
}

impl MockSessionState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// How many times `stop` actually stopped the session
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Pretend the server process died
    pub fn crash(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Session that only records what happens to it
#[derive(Debug)]
pub struct MockSession {
    scope: ScopeDescriptor,
    state: Arc<MockSessionState>,
}

impl MockSession {
    pub fn new(scope: ScopeDescriptor) -> Self {
        let state = MockSessionState::default();
        state.running.store(true, Ordering::SeqCst);
        Self {
            scope,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<MockSessionState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl ManagedSession for MockSession {
    fn scope(&self) -> &ScopeDescriptor {
        &self.scope
    }

    fn needs_stop(&self) -> bool {
        self.state.is_running()
    }

    async fn stop(&self) -> Result<(), SessionError> {
        if self.state.running.swap(false, Ordering::SeqCst) {
            self.state.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Factory producing [`MockSession`]s
#[derive(Debug, Default)]
pub struct MockSessionFactory {
    created: Mutex<Vec<(ScopeKey, Arc<MockSessionState>)>>,
    attempts: AtomicUsize,
    delay: Option<Duration>,
    fail: AtomicBool,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every creation take this long, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make creations fail until switched off again
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of `create` calls, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of sessions created
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// Keys of created sessions, in creation order
    pub fn created_keys(&self) -> Vec<ScopeKey> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// State of every session created for `key`, oldest first
    pub fn states_for(&self, key: &str) -> Vec<Arc<MockSessionState>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(created, _)| created.as_str() == key)
            .map(|(_, state)| Arc::clone(state))
            .collect()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn create(&self, scope: &ScopeDescriptor) -> Result<Self::Session, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::startup_failed("mock factory failure"));
        }

        let session = MockSession::new(scope.clone());
        self.created
            .lock()
            .unwrap()
            .push((scope.key.clone(), session.state()));
        Ok(session)
    }
}
