//! Session registry.
//!
//! Maps session IDs to their live [`SseTransport`]. The registry is the
//! only shared mutable structure across sessions; every operation holds the
//! lock for a single map access and never performs I/O.
//!
//! Once shutdown begins the registry stops accepting new sessions, so a
//! stream opened while draining is refused instead of outliving the drain.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::transport::SseTransport;

/// Errors returned by the session registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session already registered: {0}")]
    Duplicate(String),
    #[error("Registry is closed to new sessions")]
    Closed,
}

/// Snapshot of a live session, used for usage accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub age_secs: u64,
}

#[derive(Default)]
struct Sessions {
    live: HashMap<String, Arc<SseTransport>>,
    /// Set when shutdown begins; never cleared.
    closed: bool,
}

/// Registry of live sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<Sessions>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under the given ID.
    ///
    /// Fails if the ID is already taken, leaving the existing entry
    /// untouched, or if the registry has been closed.
    pub fn register(
        &self,
        id: impl Into<String>,
        transport: Arc<SseTransport>,
    ) -> Result<(), RegistryError> {
        let id = id.into();
        let mut sessions = self.sessions.lock();
        if sessions.closed {
            return Err(RegistryError::Closed);
        }
        if sessions.live.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        sessions.live.insert(id.clone(), transport);
        info!("Registered session {} (live: {})", id, sessions.live.len());
        Ok(())
    }

    /// Look up the transport of a live session.
    pub fn lookup(&self, id: &str) -> Option<Arc<SseTransport>> {
        self.sessions.lock().live.get(id).cloned()
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().live.contains_key(id)
    }

    /// Remove a session. Removing an unknown ID is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.sessions.lock().live.remove(id).is_some();
        if removed {
            info!("Deregistered session {}", id);
        }
        removed
    }

    /// Remove the entry for `transport`, but only if that exact transport is
    /// still the one registered under its ID.
    pub(crate) fn deregister_transport(&self, transport: &SseTransport) -> bool {
        let id = transport.session_id();
        let mut sessions = self.sessions.lock();
        let owned = sessions
            .live
            .get(id)
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), transport));
        if owned {
            sessions.live.remove(id);
            debug!("Deregistered session {} on close", id);
        }
        owned
    }

    /// Refuse every later registration. Live sessions are kept.
    pub fn close(&self) {
        let mut sessions = self.sessions.lock();
        if !sessions.closed {
            sessions.closed = true;
            info!("Registry closed to new sessions");
        }
    }

    /// Whether new registrations are refused.
    pub fn is_closed(&self) -> bool {
        self.sessions.lock().closed
    }

    /// Close the registry, then remove and return every registered transport.
    ///
    /// The caller is responsible for closing them.
    pub fn drain_all(&self) -> Vec<Arc<SseTransport>> {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.lock();
            sessions.closed = true;
            sessions.live.drain().map(|(_, t)| t).collect()
        };
        info!("Drained {} session(s) from registry", drained.len());
        drained
    }

    /// Get the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().live.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().live.is_empty()
    }

    /// Summaries of all live sessions.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .lock()
            .live
            .values()
            .map(|t| SessionSummary {
                id: t.session_id().to_string(),
                age_secs: t.age_secs(),
            })
            .collect()
    }
}
