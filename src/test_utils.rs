//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and other test helpers.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// For automatic initialization in a test module:
    /// ```rust
    /// #[cfg(feature = "test-logging")]
    /// #[ctor::ctor]
    /// fn init_test_logging() {
    ///     crate::test_utils::logging::init();
    /// }
    /// ```
    ///
    /// `RUST_LOG` controls the level (default: "debug,tokio=info").
    ///
    /// ```bash
    /// RUST_LOG=r_lsp_launcher::registry=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer() // Ensures logs don't interfere with test output
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Ignore errors if already initialized by another test
        });
    }
}

/// Get the R binary for integration tests
///
/// Checks the R_PATH environment variable and falls back to "R" if not set.
#[cfg(all(test, feature = "r-integration-tests"))]
pub fn get_test_r_path() -> String {
    std::env::var("R_PATH").unwrap_or_else(|_| "R".to_string())
}

/// Scratch directories shaped like editor workspaces
#[cfg(test)]
pub mod workspace {
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A temporary folder holding R scripts
    pub struct TestWorkspace {
        _temp_dir: TempDir,
        root: PathBuf,
    }

    impl TestWorkspace {
        pub fn new() -> std::io::Result<Self> {
            let temp_dir = TempDir::new()?;
            // Canonical root so file URIs compare equal to ones built from it
            let root = fs::canonicalize(temp_dir.path())?;
            Ok(Self {
                _temp_dir: temp_dir,
                root,
            })
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        /// Write `contents` to `relative`, creating parent directories
        pub fn write_script(&self, relative: &str, contents: &str) -> std::io::Result<PathBuf> {
            let path = self.root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
            Ok(path)
        }
    }
}
