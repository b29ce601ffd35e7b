use clap::Parser;
use r_lsp_launcher::config::{LspSettings, SettingsSource};
use r_lsp_launcher::controller::LifecycleController;
use r_lsp_launcher::host::HostBridge;
use r_lsp_launcher::io::TracingOutputSink;
use r_lsp_launcher::launcher::DefaultBinaryResolver;
use r_lsp_launcher::logging::{LogConfig, init_logging};
use r_lsp_launcher::scope::{ScopeResolver, WorkspaceFolder, WorkspaceState};
use r_lsp_launcher::session::ServerSessionFactory;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{BufReader, stdin};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the R language server launcher
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON settings file holding the `r.lsp` section
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Path to the R binary (overrides the settings file)
    #[arg(long, value_name = "PATH")]
    r_path: Option<String>,

    /// Workspace folder known at startup (repeatable)
    #[arg(long, value_name = "DIR")]
    workspace_folder: Vec<PathBuf>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides R_LSP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Give up on a server that has not connected after this many seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout_secs: Option<u64>,
}

/// Load settings from the CLI arguments
fn load_settings(args: &Args) -> Result<LspSettings, Box<dyn std::error::Error>> {
    let mut settings = match &args.settings {
        Some(path) => LspSettings::from_file(path)?,
        None => LspSettings::default(),
    };
    if let Some(r_path) = &args.r_path {
        settings.path = Some(r_path.clone());
    }
    settings.validate()?;
    Ok(settings)
}

/// Workspace seeded with the folders given on the command line
fn initial_workspace(folders: &[PathBuf]) -> WorkspaceState {
    let workspace = WorkspaceState::new();
    for dir in folders {
        let absolute = std::path::absolute(dir).unwrap_or_else(|_| dir.clone());
        match WorkspaceFolder::from_path(&absolute) {
            Some(folder) => {
                info!("Workspace folder: {}", folder.uri);
                workspace.add_folder(folder);
            }
            None => warn!("Ignoring workspace folder {}", dir.display()),
        }
    }
    workspace
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging with configuration from env vars and CLI args
    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Settings: debug={}, use_stdio={}, args={:?}",
        settings.debug, settings.use_stdio, settings.args
    );

    let workspace = Arc::new(initial_workspace(&args.workspace_folder));

    let settings: Arc<dyn SettingsSource> = Arc::new(settings);
    let factory = ServerSessionFactory::new(settings, Arc::new(TracingOutputSink))
        .with_resolver(Arc::new(DefaultBinaryResolver::new()))
        .with_connect_timeout(args.connect_timeout_secs.map(Duration::from_secs));

    let controller = Arc::new(LifecycleController::new(
        factory,
        ScopeResolver::new(),
        workspace.clone(),
    ));

    let shutdown = CancellationToken::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_shutdown.cancel();
        }
    });

    info!("R language server launcher ready, reading host events from stdin");

    let bridge = HostBridge::new(controller, workspace);
    bridge.run(BufReader::new(stdin()), shutdown).await?;

    info!("R language server launcher finished");
    Ok(())
}
