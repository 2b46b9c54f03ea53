// The connection registry. Owns every live `ConnectionHandle`, serializes
// register/unregister against that map, and is the single place a message
// gets routed from a decoded envelope to a use-case.
//
// Register/unregister serialization is achieved the idiomatic-Rust way: every
// mutator takes the same `RwLock::write`, so the lock itself is the
// serialization point instead of a dedicated actor task consuming a channel
// (see DESIGN.md). Dispatch never touches the lock and always runs in the
// caller's task (the read pump), so slow game logic never blocks another
// connection's register/unregister.

use crate::domain::game::IdentityKey;
use crate::interface_adapters::protocol::ServerMessage;
use crate::use_cases::connection_limiter::ConnectionLimiter;
use crate::use_cases::game_registry::GameRegistry;
use crate::use_cases::lifecycle;
use crate::use_cases::lobby::LobbyBatcher;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Everything the Hub and lifecycle use-cases need to know about one live
/// socket. Cheaply cloned by `Arc`; the read and write pumps each hold one.
pub struct ConnectionHandle {
    pub id: u64,
    pub ip: IpAddr,
    pub user_id: Option<u64>,
    pub display_name: String,
    outbox: mpsc::Sender<String>,
    closed: AtomicBool,
    pub current_game_id: Mutex<Option<String>>,
    pub last_game_created_at: Mutex<Option<Instant>>,
}

impl ConnectionHandle {
    pub fn new(
        id: u64,
        ip: IpAddr,
        user_id: Option<u64>,
        display_name: String,
        outbox: mpsc::Sender<String>,
    ) -> Self {
        Self {
            id,
            ip,
            user_id,
            display_name,
            outbox,
            closed: AtomicBool::new(false),
            current_game_id: Mutex::new(None),
            last_game_created_at: Mutex::new(None),
        }
    }

    /// Non-blocking enqueue. Drops the frame (with a warning) if the bounded
    /// send buffer is full or the connection is already closed.
    pub fn send(&self, frame: String) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.outbox.try_send(frame).is_err() {
            tracing::warn!(connection_id = self.id, "dropping frame: buffer full or closed");
        }
    }

    /// One-shot close. Returns `true` the first time it is called for this
    /// connection, so callers can run cleanup exactly once.
    pub fn close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Encodes and enqueues `msg`. Encoding failures are a bug, not a
    /// connection fault, so this logs and drops rather than propagating.
    pub fn send_message(&self, msg: &ServerMessage) {
        match msg.encode() {
            Ok(frame) => self.send(frame),
            Err(err) => tracing::error!(connection_id = self.id, %err, "failed to encode outbound message"),
        }
    }

    pub async fn game_id(&self) -> Option<String> {
        self.current_game_id.lock().await.clone()
    }

    pub async fn set_game_id(&self, id: Option<String>) {
        *self.current_game_id.lock().await = id;
    }

    /// Identity used for per-identity bookkeeping (active-game cap, cooldown):
    /// authenticated users are keyed by user id, anonymous connections by IP.
    pub fn identity_key(&self) -> IdentityKey {
        match self.user_id {
            Some(uid) => IdentityKey::User(uid),
            None => IdentityKey::Ip(self.ip),
        }
    }
}

/// Shared state every use-case needs: the connection registry plus the other
/// top-level collaborators dispatch routes into.
pub struct Hub {
    clients: RwLock<HashMap<u64, Arc<ConnectionHandle>>>,
    pub games: Arc<GameRegistry>,
    pub lobby: Arc<LobbyBatcher>,
    pub limiter: Arc<ConnectionLimiter>,
    pub datastore: Arc<dyn crate::domain::ports::Datastore>,
}

impl Hub {
    pub fn new(
        games: Arc<GameRegistry>,
        lobby: Arc<LobbyBatcher>,
        limiter: Arc<ConnectionLimiter>,
        datastore: Arc<dyn crate::domain::ports::Datastore>,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            games,
            lobby,
            limiter,
            datastore,
        }
    }

    pub async fn register(&self, handle: Arc<ConnectionHandle>) {
        let id = handle.id;
        self.clients.write().await.insert(id, handle);
        tracing::debug!(connection_id = id, "connection registered");
    }

    /// Per §4.4: drop the lobby subscription before closing the send channel
    /// (a concurrent batcher flush must never write to a connection that is
    /// being torn down), then close, then run disconnect forfeiture, then
    /// free the connection-limiter slot.
    pub async fn unregister(&self, id: u64) {
        let handle = {
            let mut clients = self.clients.write().await;
            clients.remove(&id)
        };
        let Some(handle) = handle else {
            return;
        };
        if !handle.close() {
            // Already unregistered by another path (e.g. a racing read/write
            // pump exit); nothing left to do.
            return;
        }

        self.lobby.unsubscribe(id).await;

        if let Some(game_id) = handle.game_id().await {
            lifecycle::handle_disconnect(self, &game_id, id).await;
        }

        self.limiter.on_disconnect(handle.ip).await;
        tracing::debug!(connection_id = id, "connection unregistered");
    }

    pub async fn get(&self, id: u64) -> Option<Arc<ConnectionHandle>> {
        self.clients.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}
