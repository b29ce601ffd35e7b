//! Session registry
//!
//! Maps scope keys to sessions and tracks which keys are being activated. Both
//! collections live behind one mutex, so deciding whether to start a session
//! and marking the key as initializing happen in a single step.
//!
//! The marker is speculative: every check that finds the key unmarked sets
//! it, including a check answered by a running session. Only storing a new
//! session, removal or a drain clears it again, so once a key was reopened
//! while running, a crash of its server does not lead to a new process until
//! the key is closed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::scope::ScopeKey;
use crate::session::ManagedSession;

#[derive(Debug)]
struct RegistryInner<S> {
    sessions: HashMap<ScopeKey, Arc<S>>,
    initializing: HashSet<ScopeKey>,
}

/// Owned mapping from scope keys to sessions
#[derive(Debug)]
pub struct SessionRegistry<S> {
    inner: Mutex<RegistryInner<S>>,
}

/// Result of [`SessionRegistry::begin_activation`]
#[derive(Debug)]
pub enum ActivationCheck<S: ManagedSession> {
    /// The key is already starting or served by a live session
    Handled,
    /// The caller must create the session and hand it to the guard
    Proceed(ActivationGuard<S>),
}

/// Holds the initializing marker of one key
///
/// Dropping the guard without [`ActivationGuard::complete`] clears the
/// marker, so a failed activation can be retried.
#[derive(Debug)]
pub struct ActivationGuard<S: ManagedSession> {
    registry: Arc<SessionRegistry<S>>,
    key: ScopeKey,
    completed: bool,
}

impl<S: ManagedSession> ActivationGuard<S> {
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// Store the new session and clear the marker
    ///
    /// A stopped session previously stored under the key is replaced.
    pub fn complete(mut self, session: S) -> Arc<S> {
        let session = Arc::new(session);
        {
            // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
            let mut inner = self.registry.inner.lock().unwrap();
            inner.sessions.insert(self.key.clone(), Arc::clone(&session));
            inner.initializing.remove(&self.key);
        }
        debug!("Session stored for {}", self.key);
        self.completed = true;
        session
    }
}

impl<S: ManagedSession> Drop for ActivationGuard<S> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Ok(mut inner) = self.registry.inner.lock() {
            inner.initializing.remove(&self.key);
        }
        debug!("Activation of {} abandoned", self.key);
    }
}

impl<S: ManagedSession> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                initializing: HashSet::new(),
            }),
        }
    }
}

impl<S: ManagedSession> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `key` needs a new session, marking it initializing
    pub fn begin_activation(self: &Arc<Self>, key: &ScopeKey) -> ActivationCheck<S> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.initializing.insert(key.clone()) {
            trace!("Activation of {} already in progress", key);
            return ActivationCheck::Handled;
        }
        if inner
            .sessions
            .get(key)
            .is_some_and(|session| session.needs_stop())
        {
            trace!("Session for {} already running, key stays marked", key);
            return ActivationCheck::Handled;
        }

        ActivationCheck::Proceed(ActivationGuard {
            registry: Arc::clone(self),
            key: key.clone(),
            completed: false,
        })
    }

    pub fn get(&self, key: &ScopeKey) -> Option<Arc<S>> {
        self.inner.lock().unwrap().sessions.get(key).cloned()
    }

    /// Take the session for `key` out of the registry and clear its marker
    pub fn remove(&self, key: &ScopeKey) -> Option<Arc<S>> {
        let mut inner = self.inner.lock().unwrap();
        inner.initializing.remove(key);
        inner.sessions.remove(key)
    }

    /// Empty the registry, returning every stored session
    pub fn drain(&self) -> Vec<(ScopeKey, Arc<S>)> {
        let mut inner = self.inner.lock().unwrap();
        inner.initializing.clear();
        inner.sessions.drain().collect()
    }

    pub fn is_initializing(&self, key: &ScopeKey) -> bool {
        self.inner.lock().unwrap().initializing.contains(key)
    }

    pub fn initializing_count(&self) -> usize {
        self.inner.lock().unwrap().initializing.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted keys of stored sessions
    pub fn keys(&self) -> Vec<ScopeKey> {
        let mut keys: Vec<ScopeKey> = self
            .inner
            .lock()
            .unwrap()
            .sessions
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Snapshot of stored sessions
    pub fn sessions(&self) -> Vec<Arc<S>> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{MockSession, scope};

    fn registry() -> Arc<SessionRegistry<MockSession>> {
        Arc::new(SessionRegistry::new())
    }

    fn proceed(check: ActivationCheck<MockSession>) -> ActivationGuard<MockSession> {
        match check {
            ActivationCheck::Proceed(guard) => guard,
            ActivationCheck::Handled => panic!("expected to proceed"),
        }
    }

    #[test]
    fn test_second_activation_is_handled_while_initializing() {
        let registry = registry();
        let key = ScopeKey::from("untitled");

        let guard = proceed(registry.begin_activation(&key));
        assert!(registry.is_initializing(&key));
        assert!(matches!(
            registry.begin_activation(&key),
            ActivationCheck::Handled
        ));

        guard.complete(MockSession::new(scope("untitled")));
        assert!(!registry.is_initializing(&key));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_running_session_check_leaves_key_marked() {
        let registry = registry();
        let key = ScopeKey::from("file:///tmp/a.r");
        let session = proceed(registry.begin_activation(&key))
            .complete(MockSession::new(scope(key.as_str())));
        assert!(!registry.is_initializing(&key));

        assert!(matches!(
            registry.begin_activation(&key),
            ActivationCheck::Handled
        ));
        assert!(registry.is_initializing(&key));

        // The marker outlives a crash of the running session
        session.state().crash();
        assert!(matches!(
            registry.begin_activation(&key),
            ActivationCheck::Handled
        ));

        // Removal clears it
        registry.remove(&key);
        let _guard = proceed(registry.begin_activation(&key));
    }

    #[test]
    fn test_dropped_guard_clears_marker() {
        let registry = registry();
        let key = ScopeKey::from("untitled");

        drop(proceed(registry.begin_activation(&key)));
        assert!(!registry.is_initializing(&key));
        assert!(registry.is_empty());

        // Retry is possible
        let _guard = proceed(registry.begin_activation(&key));
    }

    #[test]
    fn test_stopped_session_is_replaced() {
        let registry = registry();
        let key = ScopeKey::from("untitled");
        let first =
            proceed(registry.begin_activation(&key)).complete(MockSession::new(scope("untitled")));
        first.state().crash();

        let guard = proceed(registry.begin_activation(&key));
        let second = guard.complete(MockSession::new(scope("untitled")));

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(&key).unwrap(), &second));
    }

    #[test]
    fn test_remove_and_drain() {
        let registry = registry();
        let a = ScopeKey::from("a");
        let b = ScopeKey::from("b");
        proceed(registry.begin_activation(&a)).complete(MockSession::new(scope("a")));
        let pending = proceed(registry.begin_activation(&b));

        assert!(registry.remove(&a).is_some());
        assert!(registry.remove(&a).is_none());

        assert_eq!(registry.initializing_count(), 1);
        assert!(registry.drain().is_empty());
        assert_eq!(registry.initializing_count(), 0);

        // A creation finishing after the drain still lands in the registry
        pending.complete(MockSession::new(scope("b")));
        assert_eq!(registry.keys(), vec![b]);
    }
}
