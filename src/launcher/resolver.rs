//! R binary lookup

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::LspSettings;

/// Fallback when nothing better is known; spawning it relies on `PATH`
pub const DEFAULT_R_BINARY: &str = "R";

/// Supplies the R binary to run
pub trait BinaryResolver: Send + Sync {
    fn resolve(&self, settings: &LspSettings) -> String;
}

/// Settings path, then `$R_HOME/bin/R`, then plain `R`
#[derive(Debug, Clone, Default)]
pub struct DefaultBinaryResolver {
    r_home: Option<PathBuf>,
}

impl DefaultBinaryResolver {
    /// Resolver reading `R_HOME` from the environment
    pub fn new() -> Self {
        Self {
            r_home: std::env::var_os("R_HOME").map(PathBuf::from),
        }
    }

    pub fn with_r_home(r_home: Option<PathBuf>) -> Self {
        Self { r_home }
    }

    fn r_home_binary(&self) -> Option<PathBuf> {
        let home = self.r_home.as_deref()?;
        let binary = home.join("bin").join(binary_name());
        binary.is_file().then_some(binary)
    }
}

fn binary_name() -> &'static Path {
    if cfg!(windows) {
        Path::new("R.exe")
    } else {
        Path::new("R")
    }
}

impl BinaryResolver for DefaultBinaryResolver {
    fn resolve(&self, settings: &LspSettings) -> String {
        if let Some(path) = settings.path.as_deref().filter(|path| !path.trim().is_empty()) {
            debug!("R binary from settings: {}", path);
            return path.to_string();
        }
        if let Some(binary) = self.r_home_binary() {
            debug!("R binary from R_HOME: {}", binary.display());
            return binary.to_string_lossy().into_owned();
        }
        debug!("R binary not configured, using {}", DEFAULT_R_BINARY);
        DEFAULT_R_BINARY.to_string()
    }
}
