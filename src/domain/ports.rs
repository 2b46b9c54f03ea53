// Datastore port. The realtime core never issues SQL directly; it only ever
// talks to this trait, so the Finalizer (use_cases::finalizer) is storage-agnostic
// and testable against the in-memory implementation.

use async_trait::async_trait;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct FinalizeGameInput {
    pub pgn: String,
    pub white_user_id: u64,
    pub black_user_id: u64,
    pub white_start_rating: i32,
    pub black_start_rating: i32,
    pub white_new_rating: i32,
    pub black_new_rating: i32,
    pub result_pgn: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerRating {
    pub rating: i32,
    pub games_played: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("datastore operation timed out")]
    Timeout,
    #[error("datastore error: {0}")]
    Backend(String),
}

/// Async port over player ratings, game persistence, rating history and
/// achievement state. Implemented by an in-memory double (tests, local runs)
/// and a `sqlx`-backed Postgres store (production), see
/// `interface_adapters::datastore`.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn player_rating(&self, user_id: u64) -> Result<PlayerRating, DatastoreError>;

    /// Persists the game row, both updated ratings and two rating-history rows
    /// in a single transaction.
    async fn finalize_game(&self, input: FinalizeGameInput) -> Result<(), DatastoreError>;

    async fn user_achievement_ids(&self, user_id: u64) -> Result<HashSet<String>, DatastoreError>;

    /// Grants the achievement if not already held. Returns `true` if this call
    /// was the one that granted it.
    async fn grant_achievement(
        &self,
        user_id: u64,
        achievement_id: &str,
        points: u32,
    ) -> Result<bool, DatastoreError>;

    /// Updates the user's current-result win streak and returns the new value.
    async fn update_win_streak(&self, user_id: u64, won: bool) -> Result<u32, DatastoreError>;

    async fn games_played_count(&self, user_id: u64) -> Result<u32, DatastoreError>;
}
