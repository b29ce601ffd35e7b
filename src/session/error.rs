//! Error types for language server sessions

use std::time::Duration;

use crate::config::SettingsError;
use crate::io::ProcessError;
use crate::launcher::LaunchError;
use crate::lsp::LspClientError;

/// Session creation and shutdown errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Settings could not be read or are invalid
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Spawning or connecting to the server failed
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// Process management errors
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Channel errors while talking to the server
    #[error("Client error: {0}")]
    Client(#[from] LspClientError),

    /// The server did not connect in time
    #[error("R language server for {scope} did not connect within {timeout:?}")]
    ConnectTimeout { scope: String, timeout: Duration },

    /// The session is no longer running
    #[error("Session for {scope} is stopped")]
    Stopped { scope: String },

    #[error("Session startup failed: {reason}")]
    StartupFailed { reason: String },
}

impl SessionError {
    pub fn connect_timeout(scope: impl Into<String>, timeout: Duration) -> Self {
        Self::ConnectTimeout {
            scope: scope.into(),
            timeout,
        }
    }

    pub fn stopped(scope: impl Into<String>) -> Self {
        Self::Stopped {
            scope: scope.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }
}
