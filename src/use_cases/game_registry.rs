// Lookup-by-id registry for games, with a hard capacity cap and a periodic GC
// sweep for stale waiting/ended games. Mirrors `LobbyRegistry` in shape: an
// `RwLock<HashMap<..>>`, read-locked for lookups, write-locked for structural
// changes, with a pessimistic re-check under the write lock to close the
// TOCTOU window on capacity.

use crate::domain::game::{Game, GameStatus, IdentityKey};
use crate::use_cases::lobby::LobbyBatcher;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

pub const MAX_GAMES: usize = 1000;
const WAITING_TTL: Duration = Duration::from_secs(5 * 60);
const ENDED_TTL: Duration = Duration::from_secs(5 * 60);
pub const GC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct CapacityError;

#[derive(Debug)]
pub enum CreateError {
    Capacity,
    IdentityLimitReached,
}

pub struct GameRegistry {
    games: RwLock<HashMap<String, Arc<Mutex<Game>>>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.games.read().await.len()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Game>>> {
        self.games.read().await.get(id).cloned()
    }

    /// Optimistic capacity check (read lock) before the caller does the
    /// (potentially slow) work of building a new `Game`. Still re-checked
    /// pessimistically in `insert`.
    pub async fn has_capacity(&self) -> bool {
        self.games.read().await.len() < MAX_GAMES
    }

    /// Inserts `game` iff capacity allows, re-verified under the write lock.
    pub async fn insert(&self, game: Game) -> Result<Arc<Mutex<Game>>, CapacityError> {
        let mut games = self.games.write().await;
        if games.len() >= MAX_GAMES {
            return Err(CapacityError);
        }
        let id = game.id.clone();
        let handle = Arc::new(Mutex::new(game));
        games.insert(id, handle.clone());
        Ok(handle)
    }

    /// Inserts `game` iff capacity allows and `identity` does not already
    /// participate in `max_per_identity` waiting/active games, both re-checked
    /// under the same write lock that performs the insert (closes the
    /// creation-side TOCTOU window on both limits at once).
    pub async fn insert_checked(
        &self,
        game: Game,
        identity: IdentityKey,
        max_per_identity: usize,
    ) -> Result<Arc<Mutex<Game>>, CreateError> {
        let mut games = self.games.write().await;
        if games.len() >= MAX_GAMES {
            return Err(CreateError::Capacity);
        }
        let mut active_for_identity = 0usize;
        for handle in games.values() {
            let g = handle.lock().await;
            if matches!(g.status, GameStatus::Waiting | GameStatus::Active) && g.participates(identity) {
                active_for_identity += 1;
            }
        }
        if active_for_identity >= max_per_identity {
            return Err(CreateError::IdentityLimitReached);
        }
        let id = game.id.clone();
        let handle = Arc::new(Mutex::new(game));
        games.insert(id, handle.clone());
        Ok(handle)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Mutex<Game>>> {
        self.games.write().await.remove(id)
    }

    /// Snapshot of every `status=waiting` game, for `LOBBY_LIST`.
    pub async fn waiting_snapshot(&self) -> Vec<Arc<Mutex<Game>>> {
        let games = self.games.read().await;
        let mut out = Vec::new();
        for handle in games.values() {
            if handle.lock().await.status == GameStatus::Waiting {
                out.push(handle.clone());
            }
        }
        out
    }

    /// Two-phase GC per §4.6: list candidates under the read lock, re-verify
    /// and delete under the write lock. Returns the ids of waiting games that
    /// were removed, so the caller can emit lobby `removed` updates.
    pub async fn collect_garbage(&self, lobby: &LobbyBatcher) {
        let now = Instant::now();
        let candidates: Vec<String> = {
            let games = self.games.read().await;
            let mut ids = Vec::new();
            for (id, handle) in games.iter() {
                let g = handle.lock().await;
                if is_stale(&g, now) {
                    ids.push(id.clone());
                }
            }
            ids
        };
        if candidates.is_empty() {
            return;
        }

        let mut removed_waiting = Vec::new();
        {
            let mut games = self.games.write().await;
            for id in candidates {
                let Some(handle) = games.get(&id) else {
                    continue;
                };
                let is_waiting = {
                    let g = handle.lock().await;
                    if !is_stale(&g, now) {
                        continue;
                    }
                    g.status == GameStatus::Waiting
                };
                games.remove(&id);
                if is_waiting {
                    removed_waiting.push(id);
                }
            }
        }

        for id in removed_waiting {
            info!(game_id = %id, "gc: removed stale waiting game");
            lobby.enqueue_removed(id).await;
        }
    }
}

fn is_stale(game: &Game, now: Instant) -> bool {
    match game.status {
        GameStatus::Ended => now.saturating_duration_since(game.last_move_at) > ENDED_TTL,
        GameStatus::Waiting => now.saturating_duration_since(game.created_at) > WAITING_TTL,
        GameStatus::Active => false,
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the periodic GC sweeper. Returns its `JoinHandle` so shutdown can
/// abort it.
pub fn spawn_gc(registry: Arc<GameRegistry>, lobby: Arc<LobbyBatcher>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GC_INTERVAL);
        loop {
            interval.tick().await;
            registry.collect_garbage(&lobby).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::Player;

    fn player(id: u64) -> Player {
        Player {
            connection_id: id,
            user_id: None,
            display_name: format!("p{id}"),
            rating: None,
            identity: IdentityKey::User(id),
        }
    }

    #[tokio::test]
    async fn capacity_is_enforced_at_insert() {
        let registry = GameRegistry::new();
        for i in 0..MAX_GAMES {
            let game = Game::new(format!("g{i}"), player(i as u64), None, false);
            registry.insert(game).await.expect("room for this game");
        }
        let overflow = Game::new("overflow".to_string(), player(9999), None, false);
        assert!(registry.insert(overflow).await.is_err());
        assert_eq!(registry.len().await, MAX_GAMES);
    }

    #[tokio::test]
    async fn waiting_snapshot_excludes_active_and_ended() {
        let registry = GameRegistry::new();
        let waiting = Game::new("w".to_string(), player(1), None, false);
        let mut active = Game::new("a".to_string(), player(2), None, false);
        active.status = GameStatus::Active;
        registry.insert(waiting).await.unwrap();
        registry.insert(active).await.unwrap();
        let snapshot = registry.waiting_snapshot().await;
        assert_eq!(snapshot.len(), 1);
    }
}
