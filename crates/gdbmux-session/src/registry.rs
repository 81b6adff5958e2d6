//! Session registry: id-to-session map, idle sweep, bulk shutdown.
//!
//! The map lock guards membership only and is never held across subprocess
//! I/O — lookups clone the `Arc<Session>` and release the lock before the
//! potentially slow send or teardown runs, so one stuck session never
//! blocks the rest.

use crate::config::Config;
use crate::session::{CommandOutcome, Session};
use gdbmux_core::{MuxError, MuxResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Information returned when listing sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at_secs: u64,
}

type SessionMap = Arc<RwLock<HashMap<String, Arc<Session>>>>;

/// Owns all active sessions and the periodic idle sweep.
pub struct SessionRegistry {
    sessions: SessionMap,
    config: Config,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    /// Create a new registry. Call [`start`](Self::start) to launch the
    /// idle sweep.
    pub fn new(config: Config) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            sweeper: Mutex::new(None),
        }
    }

    /// Launch the background idle sweep.
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }
        let sessions = self.sessions.clone();
        let interval = self.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            sweep_loop(sessions, interval).await;
        }));
    }

    /// Spawn a new session and register it. Returns the fresh id.
    pub async fn open(&self, idle_timeout: Option<Duration>) -> MuxResult<String> {
        let idle_timeout = idle_timeout.unwrap_or(self.config.default_idle_timeout);
        let session = Arc::new(Session::spawn(&self.config, idle_timeout).await?);
        let id = session.id.clone();

        self.sessions.write().await.insert(id.clone(), session);
        info!(session_id = %id, "session registered");
        Ok(id)
    }

    /// Send a command to a session. The map lock is released before the
    /// send itself runs.
    pub async fn send(&self, id: &str, command: &str) -> MuxResult<CommandOutcome> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(id)
                .cloned()
                .ok_or_else(|| MuxError::SessionNotFound(id.to_string()))?
        };
        session.send(command).await
    }

    /// Unregister a session, then tear it down outside the map lock.
    pub async fn close(&self, id: &str) -> MuxResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| MuxError::SessionNotFound(id.to_string()))?;

        session.close().await;
        info!(session_id = %id, "session closed and removed");
        Ok(())
    }

    /// Snapshot of current sessions: stable id/creation-time pairs, no
    /// liveness probing.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|s| SessionInfo {
                id: s.id.clone(),
                created_at_secs: s.created_at_secs(),
            })
            .collect()
    }

    /// Number of active sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop the sweep, then close every remaining session. Individual
    /// teardown failures are isolated and logged.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let remaining: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in remaining {
            let id = session.id.clone();
            session.close().await;
            debug!(session_id = %id, "session closed during shutdown");
        }

        info!("registry shut down");
    }
}

/// Periodic sweep: collect expired ids under the read lock, then evict each
/// through the normal close path outside the lock. One stuck session must
/// not halt the sweep over the rest.
async fn sweep_loop(sessions: SessionMap, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately; skip it so the first real sweep
    // happens one full interval after start.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let expired: Vec<String> = {
            let map = sessions.read().await;
            let mut ids = Vec::new();
            for (id, session) in map.iter() {
                if session.is_expired().await {
                    ids.push(id.clone());
                }
            }
            ids
        };

        if expired.is_empty() {
            continue;
        }
        debug!(count = expired.len(), "sweeping idle sessions");

        for id in expired {
            let removed = sessions.write().await.remove(&id);
            match removed {
                Some(session) => {
                    warn!(session_id = %id, "evicting idle session");
                    session.close().await;
                }
                // Closed explicitly between collection and eviction.
                None => debug!(session_id = %id, "session already gone"),
            }
        }
    }
}
