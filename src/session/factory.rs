//! Session factory
//!
//! The controller never builds sessions itself; it asks a [`SessionFactory`]
//! so tests can substitute sessions that do not spawn R.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SettingsSource;
use crate::io::OutputSink;
use crate::launcher::command::LANG_VAR;
use crate::launcher::{BinaryResolver, DefaultBinaryResolver, ServerCommand, TransportStrategy};
use crate::scope::ScopeDescriptor;
use crate::session::server::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::session::{ManagedSession, ServerSession, SessionError};

// ============================================================================
// Session Factory Trait
// ============================================================================

/// Creates the session serving a scope
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: ManagedSession;

    /// Start a session; resolves once the session is usable
    async fn create(&self, scope: &ScopeDescriptor) -> Result<Self::Session, SessionError>;
}

// ============================================================================
// Server Session Factory
// ============================================================================

/// Factory starting real R language server processes
pub struct ServerSessionFactory {
    /// Read again for every session
    settings: Arc<dyn SettingsSource>,

    resolver: Arc<dyn BinaryResolver>,

    /// Receives server output and lifecycle messages of every session
    sink: Arc<dyn OutputSink>,

    /// Bound on waiting for the server to connect; `None` waits forever
    connect_timeout: Option<Duration>,

    shutdown_timeout: Duration,
}

impl ServerSessionFactory {
    pub fn new(settings: Arc<dyn SettingsSource>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            settings,
            resolver: Arc::new(DefaultBinaryResolver::new()),
            sink,
            connect_timeout: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn BinaryResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Command that would start the server for `scope` with current settings
    pub fn command_for(
        &self,
        scope: &ScopeDescriptor,
    ) -> Result<(ServerCommand, TransportStrategy), SessionError> {
        let settings = self.settings.lsp_settings();
        settings.validate()?;

        let program = self.resolver.resolve(&settings);
        let inherited_lang = std::env::var(LANG_VAR).ok();
        let command = ServerCommand::new(
            program,
            &settings,
            scope.working_directory.clone(),
            inherited_lang.as_deref(),
        );
        if settings.debug {
            debug!("R binary: {}", command.program);
            debug!("LANG: {:?}", command.lang.as_deref().or(inherited_lang.as_deref()));
        }

        Ok((command, TransportStrategy::select(settings.use_stdio)))
    }
}

#[async_trait]
impl SessionFactory for ServerSessionFactory {
    type Session = ServerSession;

    async fn create(&self, scope: &ScopeDescriptor) -> Result<Self::Session, SessionError> {
        let (command, strategy) = self.command_for(scope)?;
        info!(
            "Creating session for {} ({:?}) in {}",
            scope.key,
            scope.kind,
            scope.working_directory.display()
        );

        let launch =
            ServerSession::launch(scope.clone(), &command, strategy, Arc::clone(&self.sink));
        let session = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, launch)
                .await
                .map_err(|_| SessionError::connect_timeout(scope.key.as_str(), timeout))??,
            None => launch.await?,
        };

        Ok(session.with_shutdown_timeout(self.shutdown_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LspSettings, LspSettingsBuilder};
    use crate::io::MemoryOutputSink;
    use crate::session::testing::scope;

    struct FixedResolver(&'static str);

    impl BinaryResolver for FixedResolver {
        fn resolve(&self, _settings: &LspSettings) -> String {
            self.0.to_string()
        }
    }

    fn factory(settings: LspSettings) -> (ServerSessionFactory, Arc<MemoryOutputSink>) {
        let sink = Arc::new(MemoryOutputSink::new());
        let factory = ServerSessionFactory::new(Arc::new(settings), sink.clone())
            .with_resolver(Arc::new(FixedResolver("/nonexistent/R")));
        (factory, sink)
    }

    #[test]
    fn test_command_for_scope() {
        let settings = LspSettingsBuilder::new()
            .use_stdio(true)
            .args(["--no-init-file"])
            .build()
            .unwrap();
        let (factory, _) = factory(settings);

        let (command, strategy) = factory.command_for(&scope("untitled")).unwrap();
        assert_eq!(command.program, "/nonexistent/R");
        assert_eq!(command.base_args, vec!["--no-init-file", "--quiet", "--slave"]);
        assert_eq!(command.working_directory, scope("untitled").working_directory);
        if cfg!(windows) {
            assert_eq!(strategy, TransportStrategy::Loopback);
        } else {
            assert_eq!(strategy, TransportStrategy::Stdio);
        }
    }

    #[tokio::test]
    async fn test_connect_timeout_on_missing_binary() {
        let (factory, sink) = factory(LspSettings::default());
        let factory = factory.with_connect_timeout(Some(Duration::from_millis(200)));

        let result = factory.create(&scope("file:///tmp/a.r")).await;
        assert!(matches!(result, Err(SessionError::ConnectTimeout { .. })));
        assert_eq!(sink.show_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let settings = LspSettings {
            path: Some(" ".to_string()),
            ..LspSettings::default()
        };
        let (factory, _) = factory(settings);

        let result = factory.create(&scope("untitled")).await;
        assert!(matches!(result, Err(SessionError::Settings(_))));
    }

    #[cfg(feature = "r-integration-tests")]
    #[tokio::test]
    async fn test_real_r_language_server_starts_and_stops() {
        use crate::test_utils::get_test_r_path;

        let settings = LspSettingsBuilder::new()
            .path(get_test_r_path())
            .use_stdio(true)
            .build()
            .unwrap();
        let sink = Arc::new(MemoryOutputSink::new());
        let factory = ServerSessionFactory::new(Arc::new(settings), sink.clone())
            .with_connect_timeout(Some(Duration::from_secs(60)));

        let session = factory.create(&scope("untitled")).await.unwrap();
        assert!(session.needs_stop());
        assert!(session.pid().is_some());

        session.stop().await.unwrap();
        assert!(!session.needs_stop());
        assert!(sink.lines().iter().any(|line| line.contains("started")));
    }
}
