//! Live session set and event broadcast
//!
//! Sessions register a bounded sink on connect and remove it on close. The
//! broadcaster iterates a snapshot of the sinks and never waits on any of
//! them: a full or closed sink loses the event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use iota_core::protocol::ServerMessage;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Channel feeding a session's writer task
pub type SessionSink = mpsc::Sender<ServerMessage>;

/// A connected session
pub struct SessionHandle {
    pub session_id: Uuid,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
    pub sink: SessionSink,
}

impl SessionHandle {
    pub fn new(peer: impl Into<String>, sink: SessionSink) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            peer: peer.into(),
            connected_at: Utc::now(),
            sink,
        }
    }
}

/// Summary returned by list endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe set of open sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: SessionHandle) {
        tracing::info!(session_id = %handle.session_id, peer = %handle.peer, "session opened");
        self.sessions.write().insert(handle.session_id, handle);
    }

    pub fn remove(&self, session_id: &Uuid) {
        if self.sessions.write().remove(session_id).is_some() {
            tracing::info!(session_id = %session_id, "session closed");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .values()
            .map(|s| SessionInfo {
                session_id: s.session_id,
                peer: s.peer.clone(),
                connected_at: s.connected_at,
            })
            .collect()
    }

    fn sinks(&self) -> Vec<(Uuid, SessionSink)> {
        self.sessions
            .read()
            .values()
            .map(|s| (s.session_id, s.sink.clone()))
            .collect()
    }
}

/// Fire-and-forget fan-out to every open session
#[derive(Clone)]
pub struct EventBroadcaster {
    sessions: Arc<SessionRegistry>,
}

impl EventBroadcaster {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// Queue `message` on every session. Returns how many accepted it.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let sinks = self.sessions.sinks();
        if sinks.is_empty() {
            tracing::debug!("No sessions to broadcast to");
            return 0;
        }

        let mut delivered = 0;
        for (session_id, sink) in sinks {
            match sink.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(session_id = %session_id, "session queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(session_id = %session_id, "session gone, dropping event");
                }
            }
        }
        tracing::debug!(delivered, "Broadcast event");
        delivered
    }
}
