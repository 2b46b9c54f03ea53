// Lobby pub-sub: a coalescing batcher over a bounded update channel plus the
// subscriber set it fans out to. An `RwLock<HashMap<..>>` guards membership,
// with a single background task owning the batching window instead of a
// dedicated actor consuming every mutation one at a time.

use crate::interface_adapters::protocol::{
    LobbyAction, LobbyGameDto, LobbyListDto, LobbyUpdateDto, ServerMessage, TimeControlDto,
};
use crate::use_cases::game_registry::GameRegistry;
use crate::use_cases::hub::ConnectionHandle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

const UPDATE_CHANNEL_CAPACITY: usize = 100;
const BATCH_WINDOW: Duration = Duration::from_millis(250);

struct Update {
    game_id: String,
    action: LobbyAction,
}

pub struct LobbyBatcher {
    subscribers: RwLock<HashMap<u64, Arc<ConnectionHandle>>>,
    tx: mpsc::Sender<Update>,
}

impl LobbyBatcher {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Update>) {
        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        (
            Arc::new(Self {
                subscribers: RwLock::new(HashMap::new()),
                tx,
            }),
            rx,
        )
    }

    /// Adds `conn` to the subscriber set and immediately sends a `LOBBY_LIST`
    /// snapshot. Subsequent lobby changes arrive as `LOBBY_UPDATE`s.
    pub async fn subscribe(&self, conn: Arc<ConnectionHandle>, registry: &GameRegistry) {
        self.subscribers.write().await.insert(conn.id, conn.clone());
        let games = registry.waiting_snapshot().await;
        let mut dtos = Vec::with_capacity(games.len());
        for handle in games {
            let g = handle.lock().await;
            dtos.push(LobbyGameDto {
                game_id: g.id.clone(),
                creator_name: g.white.display_name.clone(),
                creator_rating: g.white.rating,
                time_control: g.time_control.map(|tc| TimeControlDto {
                    initial_time: tc.initial_secs,
                    increment: tc.increment_secs,
                }),
                rated: g.rated,
            });
        }
        conn.send_message(&ServerMessage::LobbyList(LobbyListDto { games: dtos }));
    }

    pub async fn unsubscribe(&self, connection_id: u64) {
        self.subscribers.write().await.remove(&connection_id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn enqueue_added(&self, game_id: String) {
        self.enqueue(game_id, LobbyAction::Added).await;
    }

    pub async fn enqueue_removed(&self, game_id: String) {
        self.enqueue(game_id, LobbyAction::Removed).await;
    }

    async fn enqueue(&self, game_id: String, action: LobbyAction) {
        if self.tx.send(Update { game_id, action }).await.is_err() {
            tracing::warn!("lobby batcher task gone; dropping update");
        }
    }

    async fn broadcast(&self, msg: &ServerMessage) {
        let subs = self.subscribers.read().await;
        for conn in subs.values() {
            conn.send_message(msg);
        }
    }
}

/// Merges `update` into `pending`: an opposite-action entry cancels out
/// (added-then-removed, or vice versa, within one window is a no-op); the
/// same action just replaces the prior entry.
fn dedupe_insert(pending: &mut HashMap<String, LobbyAction>, update: Update) {
    use std::collections::hash_map::Entry;
    match pending.entry(update.game_id) {
        Entry::Occupied(entry) => {
            if *entry.get() == update.action {
                *entry.into_mut() = update.action;
            } else {
                entry.remove();
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(update.action);
        }
    }
}

/// The single task that owns the batching window. Consumes `rx`, coalesces
/// into `pending`, and flushes every `BATCH_WINDOW` when there is at least
/// one subscriber and at least one pending change.
pub fn spawn_batcher(batcher: Arc<LobbyBatcher>, mut rx: mpsc::Receiver<Update>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: HashMap<String, LobbyAction> = HashMap::new();
        let mut interval = tokio::time::interval(BATCH_WINDOW);
        loop {
            tokio::select! {
                update = rx.recv() => {
                    match update {
                        Some(update) => dedupe_insert(&mut pending, update),
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    if batcher.subscriber_count().await == 0 {
                        // No one to tell; leave pending for the next tick. A
                        // freshly subscribing connection gets a full
                        // LOBBY_LIST regardless, so nothing is lost.
                        continue;
                    }
                    for (game_id, action) in pending.drain() {
                        batcher
                            .broadcast(&ServerMessage::LobbyUpdate(LobbyUpdateDto { game_id, action }))
                            .await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_actions_cancel() {
        let mut pending = HashMap::new();
        dedupe_insert(&mut pending, Update { game_id: "g".into(), action: LobbyAction::Added });
        dedupe_insert(&mut pending, Update { game_id: "g".into(), action: LobbyAction::Removed });
        assert!(pending.is_empty());
    }

    #[test]
    fn same_action_replaces() {
        let mut pending = HashMap::new();
        dedupe_insert(&mut pending, Update { game_id: "g".into(), action: LobbyAction::Added });
        dedupe_insert(&mut pending, Update { game_id: "g".into(), action: LobbyAction::Added });
        assert_eq!(pending.get("g"), Some(&LobbyAction::Added));
    }
}
