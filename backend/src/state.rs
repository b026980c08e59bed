//! Application state management.

use chrono::{DateTime, SecondsFormat, Utc};
use relay_types::RunData;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditSink, JsonlAuditSink, NoopAuditSink};
use crate::config::Config;
use crate::error::GatewayError;
use crate::mcp::{
    DispatcherFactory, McpHandlerFactory, RegistryError, SessionRegistry, SessionStream,
    SseTransport,
};

/// Path clients POST their messages to.
pub const MESSAGE_PATH: &str = "/message";

/// Informational metadata about this run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_id: String,
    pub actor_id: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Base URL clients use to reach this server
    pub public_url: String,
}

impl RunInfo {
    pub fn new(run_id: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            actor_id: None,
            started_at: Utc::now(),
            public_url: public_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            actor_id: config.actor_id.clone(),
            ..Self::new(config.run_id.clone(), config.public_url.clone())
        }
    }

    pub fn to_run_data(&self) -> RunData {
        RunData {
            actor_id: self.actor_id.clone(),
            run_id: self.run_id.clone(),
            started_at: self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl Default for RunInfo {
    fn default() -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            format!("http://localhost:{}", relay_types::DEFAULT_PORT),
        )
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Live sessions, indexed by ID
    registry: SessionRegistry,
    /// Creates one dispatcher per session
    dispatchers: Arc<dyn DispatcherFactory>,
    /// Records every outbound message
    audit: Arc<dyn AuditSink>,
    run: RunInfo,
}

impl AppState {
    /// Create new application state with the given collaborators.
    pub fn new(
        run: RunInfo,
        dispatchers: Arc<dyn DispatcherFactory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry: SessionRegistry::new(),
                dispatchers,
                audit,
                run,
            }),
        }
    }

    /// Create state for a configured server using the built-in dispatcher.
    pub fn from_config(config: &Config) -> Self {
        let audit: Arc<dyn AuditSink> = match config.audit_path {
            Some(ref path) => Arc::new(JsonlAuditSink::new(path)),
            None => {
                info!("Audit trail disabled");
                Arc::new(NoopAuditSink)
            }
        };
        Self::new(
            RunInfo::from_config(config),
            Arc::new(McpHandlerFactory::default()),
            audit,
        )
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn run(&self) -> &RunInfo {
        &self.inner.run
    }

    /// Open a new session and register it.
    ///
    /// Returns the stream to serve as the SSE response body. Dropping the
    /// stream closes the session.
    pub fn open_session(&self) -> Result<SessionStream, GatewayError> {
        let session_id = Uuid::new_v4().to_string();
        let (transport, stream) = SseTransport::open(
            session_id.clone(),
            MESSAGE_PATH,
            self.inner.registry.clone(),
            self.inner.dispatchers.as_ref(),
            self.inner.audit.clone(),
        );
        match self.inner.registry.register(session_id, transport) {
            Ok(()) => Ok(stream),
            Err(RegistryError::Closed) => Err(GatewayError::ShuttingDown),
            Err(e) => Err(GatewayError::Internal(e.into())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            RunInfo::default(),
            Arc::new(McpHandlerFactory::default()),
            Arc::new(NoopAuditSink),
        )
    }
}
