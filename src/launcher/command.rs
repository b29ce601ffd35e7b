//! R command line construction

use std::path::PathBuf;

use crate::config::{FIXED_R_FLAGS, LspSettings};
use crate::io::{ChildProcessManager, StdioMode};

/// Environment variable carrying the locale
pub const LANG_VAR: &str = "LANG";

/// Everything needed to start one R language server process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    /// R binary
    pub program: String,

    /// User arguments followed by the fixed R flags
    pub base_args: Vec<String>,

    /// Start the server in debug mode
    pub debug: bool,

    /// `LANG` to force on the child; `None` keeps the inherited value
    pub lang: Option<String>,

    pub working_directory: PathBuf,
}

impl ServerCommand {
    /// Build the command for a session
    ///
    /// `inherited_lang` is the launcher's own `LANG`, if set.
    pub fn new(
        program: impl Into<String>,
        settings: &LspSettings,
        working_directory: impl Into<PathBuf>,
        inherited_lang: Option<&str>,
    ) -> Self {
        let mut base_args = settings.args.clone();
        base_args.extend(FIXED_R_FLAGS.iter().map(|flag| flag.to_string()));

        Self {
            program: program.into(),
            base_args,
            debug: settings.debug,
            lang: settings.effective_lang(inherited_lang),
            working_directory: working_directory.into(),
        }
    }

    /// R expression starting the server, on a port or on stdio
    pub fn run_expression(&self, port: Option<u16>) -> String {
        match (port, self.debug) {
            (Some(port), false) => format!("languageserver::run(port={port})"),
            (Some(port), true) => format!("languageserver::run(port={port},debug=TRUE)"),
            (None, false) => "languageserver::run()".to_string(),
            (None, true) => "languageserver::run(debug=TRUE)".to_string(),
        }
    }

    /// Full argument list for R
    pub fn arguments(&self, port: Option<u16>) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("-e".to_string());
        args.push(self.run_expression(port));
        args
    }

    /// Process manager ready to start this command
    pub fn process_manager(&self, port: Option<u16>, stdio_mode: StdioMode) -> ChildProcessManager {
        let manager = ChildProcessManager::new(
            self.program.clone(),
            self.arguments(port),
            Some(self.working_directory.clone()),
        )
        .with_stdio_mode(stdio_mode);

        match &self.lang {
            Some(lang) => manager.with_env(LANG_VAR, lang),
            None => manager,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_LANG, LspSettingsBuilder};

    #[test]
    fn test_loopback_arguments() {
        let settings = LspSettingsBuilder::new()
            .args(["--vanilla"])
            .build()
            .unwrap();
        let command = ServerCommand::new("R", &settings, "/tmp", Some("C"));

        assert_eq!(
            command.arguments(Some(40123)),
            vec![
                "--vanilla",
                "--quiet",
                "--slave",
                "-e",
                "languageserver::run(port=40123)"
            ]
        );
        assert_eq!(command.lang, None);
    }

    #[test]
    fn test_run_expressions() {
        let plain = ServerCommand::new("R", &LspSettings::default(), "/tmp", None);
        assert_eq!(plain.run_expression(None), "languageserver::run()");
        assert_eq!(plain.lang.as_deref(), Some(DEFAULT_LANG));

        let debug_settings = LspSettingsBuilder::new().debug(true).build().unwrap();
        let debug = ServerCommand::new("R", &debug_settings, "/tmp", None);
        assert_eq!(debug.run_expression(None), "languageserver::run(debug=TRUE)");
        assert_eq!(
            debug.run_expression(Some(5000)),
            "languageserver::run(port=5000,debug=TRUE)"
        );
    }

    #[test]
    fn test_process_manager_uses_command() {
        let settings = LspSettingsBuilder::new().lang("fr_FR.UTF-8").build().unwrap();
        let command = ServerCommand::new("/opt/R/bin/R", &settings, "/srv/proj", Some("C"));
        let manager = command.process_manager(None, StdioMode::Piped);

        assert_eq!(manager.command(), "/opt/R/bin/R");
        assert_eq!(manager.args().last().map(String::as_str), Some("languageserver::run()"));
        assert_eq!(command.lang.as_deref(), Some("fr_FR.UTF-8"));
    }
}
