//! Session lifecycle controller.
//!
//! A session is `Active` until the first [`Lifecycle::terminate`] call moves
//! it to `Terminated`; the transition is single and irreversible. Everything
//! that can block on behalf of a session (network receive, output send, size
//! poll, resize hand-off, the executor) races [`Lifecycle::cancelled`], so one
//! `terminate` call unblocks all of them.

use std::{fmt, sync::Arc, sync::OnceLock};

use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// `close()` was called on the session transport.
    Closed,
    /// The client closed the connection.
    ClientGone,
    /// Network read or write failed.
    Transport,
    /// A protocol error under the terminate-on-protocol-error policy.
    Protocol,
    /// The execution transport reported a failure.
    Execution,
    /// The remote process exited.
    Completed,
    /// Cancelled from outside (manager, server shutdown).
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::ClientGone => "client gone",
            Self::Transport => "transport error",
            Self::Protocol => "protocol error",
            Self::Execution => "execution error",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Terminated(TerminationReason),
}

struct Inner {
    token: CancellationToken,
    reason: OnceLock<TerminationReason>,
}

/// Shared, cloneable handle on one session's termination signal.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .finish()
    }
}

impl Lifecycle {
    /// Create an active lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create an active lifecycle that also terminates when `parent` is
    /// cancelled (owning request, server shutdown).
    #[must_use]
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                token,
                reason: OnceLock::new(),
            }),
        }
    }

    /// Terminate the session.
    ///
    /// Returns `true` for the call that performed the transition; every later
    /// call returns `false` and has no effect.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        if self.inner.token.is_cancelled() {
            // Parent cancellation already fired the signal.
            let _ = self.inner.reason.set(TerminationReason::Cancelled);
            return false;
        }
        if self.inner.reason.set(reason).is_err() {
            tracing::trace!(%reason, "session already terminated");
            return false;
        }
        tracing::debug!(%reason, "terminating session");
        self.inner.token.cancel();
        true
    }

    /// Current state.
    ///
    /// A lifecycle cancelled through its parent token reports
    /// [`TerminationReason::Cancelled`].
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        match self.reason() {
            Some(reason) => LifecycleState::Terminated(reason),
            None => LifecycleState::Active,
        }
    }

    /// The termination reason, once terminated.
    #[must_use]
    pub fn reason(&self) -> Option<TerminationReason> {
        if let Some(reason) = self.inner.reason.get() {
            return Some(*reason);
        }
        self.inner
            .token
            .is_cancelled()
            .then_some(TerminationReason::Cancelled)
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the session has terminated.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// The underlying termination token, for handing to an executor.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}
