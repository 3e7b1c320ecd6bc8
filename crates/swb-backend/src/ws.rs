// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket event envelope and connection registry.
//!
//! The registry maps channel keys to live connections. Session
//! channels use `str(session_uuid)`, user channels `user:<user_id>`.
//! Each connection is represented by an unbounded sender feeding its
//! socket writer task; a failed send means the client is gone and the
//! connection is pruned. Broadcasts snapshot the member set under the
//! lock and send outside it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// WebSocket event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Full on-connect snapshot.
    #[serde(rename = "session.snapshot")]
    SessionSnapshot,
    /// Status/progress update.
    #[serde(rename = "session.status")]
    SessionStatus,
    /// State-patch replacement.
    #[serde(rename = "session.patch")]
    SessionPatch,
    /// Pending user-input request list.
    #[serde(rename = "user_input.update")]
    UserInputUpdate,
    /// Newly persisted message.
    #[serde(rename = "message.new")]
    MessageNew,
    /// Workspace export status change.
    #[serde(rename = "workspace.export")]
    WorkspaceExport,
    /// Rebuilt workspace file tree.
    #[serde(rename = "workspace.files")]
    WorkspaceFiles,
    /// Single-file presigned URL.
    #[serde(rename = "workspace.file.url")]
    WorkspaceFileUrl,
    /// Skill-import job update (user channel).
    #[serde(rename = "skill_import.job")]
    SkillImportJob,
}

/// The wire envelope: `{type, session_id, data, timestamp}` with an
/// ISO-8601 UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    /// Event type literal.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Channel key the event belongs to.
    pub session_id: String,
    /// Event payload.
    pub data: Value,
    /// Emission time.
    pub timestamp: String,
}

impl WsEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: EventType, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Serialize for the socket.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Channel key for a user-level channel.
#[must_use]
pub fn user_channel(user_id: &str) -> String {
    format!("user:{user_id}")
}

type Members = HashMap<u64, UnboundedSender<String>>;

/// Connection registry keyed by channel.
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: Mutex<HashMap<String, Members>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection on `key`. Returns the connection id and
    /// the receiver its socket writer drains.
    pub async fn connect(&self, key: &str) -> (u64, UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().await;
        let members = channels.entry(key.to_string()).or_default();
        members.insert(id, tx);
        info!(key, connection_count = members.len(), "websocket connected");
        (id, rx)
    }

    /// Remove a connection from `key`.
    pub async fn disconnect(&self, key: &str, connection_id: u64) {
        let mut channels = self.channels.lock().await;
        if let Some(members) = channels.get_mut(key) {
            members.remove(&connection_id);
            let remaining = members.len();
            if remaining == 0 {
                channels.remove(key);
            }
            info!(key, remaining_connections = remaining, "websocket disconnected");
        }
    }

    /// Whether `key` has any live connections.
    pub async fn has_connections(&self, key: &str) -> bool {
        self.channels
            .lock()
            .await
            .get(key)
            .is_some_and(|m| !m.is_empty())
    }

    /// Number of live connections on `key`.
    pub async fn connection_count(&self, key: &str) -> usize {
        self.channels.lock().await.get(key).map_or(0, Members::len)
    }

    /// Broadcast `event` to every connection on `key`. Dead connections
    /// are pruned; returns the number of successful sends.
    pub async fn broadcast(&self, key: &str, event: &WsEvent) -> usize {
        let members: Vec<(u64, UnboundedSender<String>)> = {
            let channels = self.channels.lock().await;
            match channels.get(key) {
                Some(members) => members.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return 0,
            }
        };

        let payload = event.to_json();
        let mut sent = 0usize;
        let mut dead = Vec::new();
        for (id, tx) in members {
            if tx.send(payload.clone()).is_ok() {
                sent += 1;
            } else {
                warn!(key, connection_id = id, "websocket send failed");
                dead.push(id);
            }
        }
        for id in dead {
            self.disconnect(key, id).await;
        }
        debug!(key, sent_count = sent, event = ?event.event_type, "ws broadcast");
        sent
    }
}

/// Schedule `future` on the current runtime; when no runtime is
/// available (late shutdown), the work is dropped with a warning.
pub fn schedule_ws<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!("no runtime available, websocket broadcast dropped"),
    }
}
