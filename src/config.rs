//! Language server settings
//!
//! Mirrors the `r.lsp` configuration section consumed by the launcher. The
//! editor's configuration mechanism is external; settings arrive either as a
//! deserialised JSON object or through [`LspSettingsBuilder`].

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Locale forced on the server when neither the settings nor the host set one
pub const DEFAULT_LANG: &str = "en_US.UTF-8";

/// Flags always passed to R after the user arguments
pub const FIXED_R_FLAGS: [&str; 2] = ["--quiet", "--slave"];

// ============================================================================
// Settings
// ============================================================================

/// Settings for launching the R language server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LspSettings {
    /// Start the server with `debug=TRUE`
    pub debug: bool,

    /// Talk to the server over stdin/stdout instead of a loopback socket
    #[serde(alias = "useStdio")]
    pub use_stdio: bool,

    /// Extra arguments placed before the fixed R flags
    pub args: Vec<String>,

    /// Locale override for `LANG`; empty means "keep or default"
    pub lang: String,

    /// Explicit path to the R binary
    #[serde(alias = "rpath")]
    pub path: Option<String>,
}

impl Default for LspSettings {
    fn default() -> Self {
        Self {
            debug: false,
            use_stdio: false,
            args: Vec::new(),
            lang: String::new(),
            path: None,
        }
    }
}

/// Settings validation and loading errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid R path: {reason}")]
    InvalidPath { reason: String },

    #[error("Invalid argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },
}

impl LspSettings {
    /// Parse settings from a JSON value
    ///
    /// Accepts either the `lsp` object itself or a wrapper of the form
    /// `{"r": {"lsp": {...}}}` / `{"lsp": {...}}`.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SettingsError> {
        let section = value
            .pointer("/r/lsp")
            .or_else(|| value.get("lsp"))
            .cloned()
            .unwrap_or(value);
        let settings: LspSettings = serde_json::from_value(section)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        debug!("Loading settings from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(serde_json::from_str(&contents)?)
    }

    /// Check the settings for values the server cannot be started with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(path) = &self.path {
            if path.trim().is_empty() {
                return Err(SettingsError::InvalidPath {
                    reason: "path override is empty".to_string(),
                });
            }
        }

        for (index, arg) in self.args.iter().enumerate() {
            if arg.contains('\0') {
                return Err(SettingsError::InvalidArgument {
                    index,
                    reason: "contains a NUL byte".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Locale to force on the server
    ///
    /// The configured `lang` wins; otherwise the inherited `LANG` is kept, and
    /// only when that is unset the UTF-8 default is applied. `None` means the
    /// environment is left untouched.
    pub fn effective_lang(&self, inherited: Option<&str>) -> Option<String> {
        if !self.lang.is_empty() {
            Some(self.lang.clone())
        } else if inherited.is_none() {
            Some(DEFAULT_LANG.to_string())
        } else {
            None
        }
    }
}

// ============================================================================
// Settings Source
// ============================================================================

/// Supplies settings each time a session is created
pub trait SettingsSource: Send + Sync {
    fn lsp_settings(&self) -> LspSettings;
}

impl SettingsSource for LspSettings {
    fn lsp_settings(&self) -> LspSettings {
        self.clone()
    }
}

// ============================================================================
// Settings Builder
// ============================================================================

/// Builder for LspSettings with validation
#[derive(Debug, Default)]
pub struct LspSettingsBuilder {
    settings: LspSettings,
}

impl LspSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.settings.debug = debug;
        self
    }

    pub fn use_stdio(mut self, use_stdio: bool) -> Self {
        self.settings.use_stdio = use_stdio;
        self
    }

    pub fn add_arg(mut self, arg: impl Into<String>) -> Self {
        self.settings.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.settings.lang = lang.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.settings.path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<LspSettings, SettingsError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
