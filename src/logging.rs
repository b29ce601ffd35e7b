use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

/// Insert the process id before the extension: `launcher.log` -> `launcher.<pid>.log`
fn unique_log_path(mut path: PathBuf, pid: u32) -> PathBuf {
    if let Some(stem) = path.file_stem() {
        let stem = stem.to_string_lossy().into_owned();
        let unique = match path.extension().and_then(|ext| ext.to_str()) {
            Some(extension) if !extension.is_empty() => format!("{stem}.{pid}.{extension}"),
            _ => format!("{stem}.{pid}"),
        };
        path.set_file_name(unique);
    }
    path
}

impl LogConfig {
    /// Create LogConfig from `RUST_LOG`, `R_LSP_LOG_FILE`, `R_LSP_LOG_UNIQUE`
    /// and `R_LSP_LOG_JSON`
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let level = var("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let file_path = var("R_LSP_LOG_FILE").map(|path| {
            let path = PathBuf::from(path);
            if var("R_LSP_LOG_UNIQUE").as_deref() == Some("true") {
                unique_log_path(path, std::process::id())
            } else {
                path
            }
        });

        let json_format = var("R_LSP_LOG_JSON").as_deref() == Some("true");

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// Initialize the logging system based on configuration
///
/// Logs always go to stderr or a file; stdout may carry a server channel.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        (Some(file_path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);

            subscriber.with(file_layer).init();
        }
        (Some(file_path), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true);

            subscriber.with(file_layer).init();
        }
        (None, true) => {
            let stderr_layer = fmt::layer().json().with_writer(io::stderr).with_ansi(false);

            subscriber.with(stderr_layer).init();
        }
        (None, false) => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(true);

            subscriber.with(stderr_layer).init();
        }
    }

    Ok(())
}

/// Log one session lifecycle transition as a structured event
#[macro_export]
macro_rules! log_session_event {
    ($level:expr, $key:expr, $transition:expr) => {
        tracing::event!(
            $level,
            scope = %$key,
            transition = $transition,
            pid = std::process::id(),
            "Session lifecycle"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        assert_eq!(LogConfig::from_vars(vars(&[])), LogConfig::default());
    }

    #[test]
    fn test_env_values() {
        let config = LogConfig::from_vars(vars(&[
            ("RUST_LOG", "debug"),
            ("R_LSP_LOG_FILE", "/tmp/launcher.log"),
            ("R_LSP_LOG_JSON", "true"),
        ]));
        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/launcher.log")));
        assert!(config.json_format);
    }

    #[test]
    fn test_unique_log_path() {
        assert_eq!(
            unique_log_path(PathBuf::from("/tmp/launcher.log"), 42),
            PathBuf::from("/tmp/launcher.42.log")
        );
        assert_eq!(
            unique_log_path(PathBuf::from("/tmp/launcher"), 42),
            PathBuf::from("/tmp/launcher.42")
        );
    }

    #[test]
    fn test_overrides() {
        let config = LogConfig::default()
            .with_overrides(Some("trace".to_string()), Some(PathBuf::from("/tmp/x.log")));
        assert_eq!(config.level, "trace");
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/x.log")));
    }
}
