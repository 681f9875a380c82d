use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Ready,
    Reconnecting,
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Ready => "ready",
            SessionStatus::Reconnecting => "reconnecting",
            SessionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One live connection to the gateway. Mutated only by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Issued by the gateway in READY; `None` until the first handshake.
    pub session_id: Option<String>,
    /// Identity the gateway authenticated us as.
    pub user_id: Option<String>,
    /// Last event sequence seen, sent back on RESUME.
    pub sequence: u64,
    pub status: SessionStatus,
    pub resumed: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: None,
            user_id: None,
            sequence: 0,
            status: SessionStatus::Connecting,
            resumed: false,
            connected_at: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SessionStatus::Ready
    }

    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the session for everything outside the connection manager.
#[derive(Debug, Clone)]
pub struct SessionWatch {
    rx: watch::Receiver<Session>,
}

impl SessionWatch {
    pub(crate) fn new(rx: watch::Receiver<Session>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> Session {
        self.rx.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.rx.borrow().status
    }

    /// Wait until `pred` holds. Returns `None` once the manager is gone.
    pub async fn wait_for(&mut self, pred: impl Fn(&Session) -> bool) -> Option<Session> {
        loop {
            {
                let session = self.rx.borrow_and_update();
                if pred(&session) {
                    return Some(session.clone());
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Resolves `true` when READY, `false` when the session closed for good.
    pub async fn wait_ready(&mut self) -> bool {
        self.wait_for(|s| matches!(s.status, SessionStatus::Ready | SessionStatus::Closed))
            .await
            .is_some_and(|s| s.is_ready())
    }
}
