//! Channel strategy selection

use serde::Serialize;
use std::fmt;

/// How the launcher talks to the server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStrategy {
    /// The child's stdin/stdout
    Stdio,
    /// One accepted TCP connection on 127.0.0.1
    Loopback,
}

impl TransportStrategy {
    /// Pick the strategy for the configured `use_stdio` flag
    ///
    /// Stdio is unreliable for the R server on Windows, so loopback is forced
    /// there.
    pub fn select(use_stdio: bool) -> Self {
        Self::select_for(use_stdio, cfg!(windows))
    }

    fn select_for(use_stdio: bool, windows: bool) -> Self {
        if use_stdio && !windows {
            Self::Stdio
        } else {
            Self::Loopback
        }
    }
}

impl fmt::Display for TransportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Loopback => f.write_str("loopback"),
        }
    }
}
