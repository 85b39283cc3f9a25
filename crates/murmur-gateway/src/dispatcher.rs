use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::events::ServerEvent;
use murmur_types::models::{ActiveUser, GroupSummary, UnreadCounts};

use crate::error::HandlerError;
use crate::registry::Registry;
use crate::typing::TypingTracker;
use crate::unread;

/// Tunables for the event handlers.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum messages replayed by a history request.
    pub history_limit: u32,
    /// How long a typing indicator survives without a new `typing_start`.
    pub typing_idle: Duration,
    /// When set, `authenticate` must carry a JWT signed with this secret.
    pub token_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            typing_idle: Duration::from_secs(2),
            token_secret: None,
        }
    }
}

/// Owns every connected client and all in-memory chat state, and routes
/// events between them.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) inner: Arc<DispatcherInner>,
}

pub(crate) struct DispatcherInner {
    pub(crate) db: Arc<Database>,
    pub(crate) config: GatewayConfig,

    /// Presence and group membership. Never held across a store call.
    pub(crate) registry: RwLock<Registry>,

    /// Per-connection outbound queues: conn_id -> sender
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>,

    pub(crate) typing: Mutex<TypingTracker>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>, config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                config,
                registry: RwLock::new(Registry::default()),
                connections: RwLock::new(HashMap::new()),
                typing: Mutex::new(TypingTracker::default()),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Open an outbound queue for a new connection. Returns (conn_id, receiver).
    pub async fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drop a connection's outbound queue. Registry cleanup happens in
    /// [`Dispatcher::disconnect`].
    pub(crate) async fn close_queue(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Send an event to one connection. Unknown connections are ignored.
    pub async fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(tx) = connections.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Send the same event to several connections.
    pub async fn send_to_many(&self, conn_ids: &[Uuid], event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        for conn_id in conn_ids {
            if let Some(tx) = connections.get(conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Send an event to every open connection, authenticated or not.
    pub async fn broadcast(&self, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        for tx in connections.values() {
            let _ = tx.send(event.clone());
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    pub async fn active_users(&self) -> Vec<ActiveUser> {
        self.inner.registry.read().await.presence.list()
    }

    pub async fn group_list(&self) -> Vec<GroupSummary> {
        let registry = self.inner.registry.read().await;
        registry.groups.list(&registry.presence)
    }

    pub async fn group_count(&self) -> usize {
        self.inner.registry.read().await.groups.len()
    }

    pub(crate) async fn broadcast_user_list(&self) {
        let users = self.active_users().await;
        self.broadcast(ServerEvent::UpdateUserList(users)).await;
    }

    pub(crate) async fn broadcast_group_list(&self) {
        let groups = self.group_list().await;
        self.broadcast(ServerEvent::UpdateGroupList(groups)).await;
    }

    /// Run a store operation on the blocking pool.
    pub(crate) async fn with_db<F, T>(&self, f: F) -> Result<T, HandlerError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db)).await?;
        Ok(result?)
    }

    /// Unread counts for a user. Store failures are logged and reported as
    /// "nothing unread" so the client still gets an answer.
    pub async fn unread_counts(&self, user_id: Uuid) -> UnreadCounts {
        match self.with_db(move |db| unread::count_for(db, user_id)).await {
            Ok(counts) => {
                tracing::debug!(
                    "Unread counts for {}: {} private senders, {} groups",
                    user_id,
                    counts.private.len(),
                    counts.group.len()
                );
                counts
            }
            Err(e) => {
                tracing::error!("Getting unread counts for {}: {}", user_id, e);
                UnreadCounts::default()
            }
        }
    }
}
