//! Language server sessions
//!
//! A session is one R language server process together with its channel,
//! serving every document of one scope.
//!
//! - **ManagedSession**: what the registry and controller need from a session
//! - **ServerSession**: the real thing, built by [`ServerSessionFactory`]
//! - **SessionStatus**: shared lifecycle state, also updated on process exit

pub mod error;
pub mod factory;
pub mod server;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::scope::ScopeDescriptor;

pub use error::SessionError;
pub use factory::{ServerSessionFactory, SessionFactory};
pub use server::ServerSession;

/// A running (or finished) language server session
#[async_trait]
pub trait ManagedSession: Send + Sync + 'static {
    /// The scope this session serves
    fn scope(&self) -> &ScopeDescriptor;

    /// Whether the session still holds a live server that must be stopped
    fn needs_stop(&self) -> bool;

    /// Stop the server; stopping an already stopped session does nothing
    async fn stop(&self) -> Result<(), SessionError>;
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl SessionStatus {
    pub fn needs_stop(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Status shared between a session and its process exit handler
#[derive(Debug, Clone)]
pub struct SharedStatus(Arc<Mutex<SessionStatus>>);

impl SharedStatus {
    pub fn new(status: SessionStatus) -> Self {
        Self(Arc::new(Mutex::new(status)))
    }

    pub fn get(&self) -> SessionStatus {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.0.lock().unwrap()
    }

    pub fn set(&self, status: SessionStatus) {
        *self.0.lock().unwrap() = status;
    }

    /// Move from `from` to `to`; returns whether the status was `from`
    pub fn transition(&self, from: SessionStatus, to: SessionStatus) -> bool {
        let mut status = self.0.lock().unwrap();
        if *status == from {
            *status = to;
            true
        } else {
            false
        }
    }

    /// Enter `Stopping` unless the session already stops or stopped
    pub fn begin_stop(&self) -> bool {
        let mut status = self.0.lock().unwrap();
        if status.needs_stop() {
            *status = SessionStatus::Stopping;
            true
        } else {
            false
        }
    }
}
