//! Session manager for tracking live terminal sessions.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use podterm_core::{ExecTarget, Executor, SessionId};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Lifecycle, LifecycleState, SessionConfig, TerminationReason};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Manager is shutting down")]
    ShuttingDown,
}

/// Handle returned when a session is registered.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub lifecycle: Lifecycle,
}

/// Snapshot of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub target: ExecTarget,
    /// Registration timestamp (Unix epoch seconds).
    pub started_at: i64,
    pub terminated: bool,
}

struct ActiveSession {
    target: ExecTarget,
    lifecycle: Lifecycle,
    started_at: i64,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().try_into().unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Registry of live sessions plus the capabilities every session needs.
///
/// The executor is injected here once; nothing downstream reaches for
/// process-wide state.
pub struct SessionManager {
    executor: Arc<dyn Executor>,
    config: SessionConfig,
    shutdown: CancellationToken,
    sessions: RwLock<HashMap<SessionId, ActiveSession>>,
}

impl SessionManager {
    /// Create a new session manager.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, config: SessionConfig) -> Self {
        Self {
            executor,
            config,
            shutdown: CancellationToken::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a new session for `target`.
    ///
    /// The session's lifecycle is a child of the manager's shutdown token.
    ///
    /// # Errors
    /// Returns error if the manager is shutting down.
    pub async fn register(&self, target: ExecTarget) -> Result<SessionHandle, ManagerError> {
        if self.shutdown.is_cancelled() {
            return Err(ManagerError::ShuttingDown);
        }

        let id = Uuid::new_v4();
        let lifecycle = Lifecycle::child_of(&self.shutdown);
        let active = ActiveSession {
            target,
            lifecycle: lifecycle.clone(),
            started_at: now(),
        };
        self.sessions.write().await.insert(id, active);

        tracing::debug!(session_id = %id, "session registered");
        Ok(SessionHandle { id, lifecycle })
    }

    /// Drop a session from the registry, returning its final reason.
    pub async fn unregister(&self, id: SessionId) -> Option<TerminationReason> {
        let session = self.sessions.write().await.remove(&id)?;
        tracing::debug!(session_id = %id, "session unregistered");
        match session.lifecycle.state() {
            LifecycleState::Terminated(reason) => Some(reason),
            LifecycleState::Active => None,
        }
    }

    /// Cancel a running session from outside.
    ///
    /// Returns `false` if the session had already terminated.
    ///
    /// # Errors
    /// Returns error if the session is not registered.
    pub async fn terminate(&self, id: SessionId) -> Result<bool, ManagerError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(ManagerError::NotFound(id))?;
        Ok(session.lifecycle.terminate(TerminationReason::Cancelled))
    }

    /// Snapshot of every registered session, oldest first.
    pub async fn active(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| SessionInfo {
                id: *id,
                target: s.target.clone(),
                started_at: s.started_at,
                terminated: s.lifecycle.is_terminated(),
            })
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Terminate every session and refuse new ones.
    pub fn shutdown(&self) {
        tracing::info!("shutting down all terminal sessions");
        self.shutdown.cancel();
    }

    /// Token cancelled by [`Self::shutdown`].
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
