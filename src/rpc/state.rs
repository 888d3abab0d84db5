use std::{fmt, sync::Arc};
use tokio::sync::watch;

use crate::error::ClientError;

/// Lifecycle of a session. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    NotStarted,
    Running,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, observable session state.
#[derive(Clone)]
pub(crate) struct StateCell {
    tx: Arc<watch::Sender<SessionState>>,
}

impl StateCell {
    pub(crate) fn new(initial: SessionState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Move to `next` if it is ahead of the current state. Returns whether
    /// the state changed.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// The error a call gets when the session is not running.
    pub(crate) fn refusal(&self) -> ClientError {
        match self.get() {
            SessionState::NotStarted => ClientError::NotStarted,
            state => ClientError::SessionClosed(state),
        }
    }

    pub(crate) fn ensure_running(&self) -> Result<(), ClientError> {
        if self.get() == SessionState::Running {
            Ok(())
        } else {
            Err(self.refusal())
        }
    }

    pub(crate) async fn wait_for(&self, target: SessionState) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot fail while we wait.
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}
