//! Per-client MCP sessions over the streamable HTTP transport (spec §4.6).
//! A session is minted on `initialize` and identified to the client by an
//! opaque `Mcp-Session-Id` header on every subsequent request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A server-pushed notification delivered over a session's `GET /mcp` SSE
/// stream. The router currently has no source of unsolicited child→client
/// notifications (capability discovery is a one-shot startup step), so in
/// practice this stream only carries keep-alives; the channel exists so a
/// future extension (e.g. `notifications/tools/list_changed` on child
/// restart) does not need a transport rework.
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub payload: serde_json::Value,
}

pub struct Session {
    pub id: String,
    #[allow(dead_code)]
    pub created_at: Instant,
    tx: broadcast::Sender<ServerEvent>,
}

impl Session {
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Arc<Session> {
        let (tx, _rx) = broadcast::channel(64);
        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            created_at: Instant::now(),
            tx,
        });
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }
}
