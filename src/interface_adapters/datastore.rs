// Datastore implementations behind `domain::ports::Datastore`. An in-memory
// double backs tests and local runs without Postgres; the `sqlx`-backed store
// is what production wires up. The Finalizer (use_cases::finalizer) only ever
// sees the trait object, so it cannot tell the two apart.

use crate::domain::ports::{Datastore, DatastoreError, FinalizeGameInput, PlayerRating};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

const DEFAULT_RATING: i32 = 1200;

#[derive(Debug, Clone, Default)]
struct PlayerRow {
    rating: i32,
    games_played: u32,
    achievements: HashSet<String>,
    win_streak: u32,
}

impl PlayerRow {
    fn new() -> Self {
        Self {
            rating: DEFAULT_RATING,
            games_played: 0,
            achievements: HashSet::new(),
            win_streak: 0,
        }
    }
}

/// `HashMap`-backed `Datastore` for tests and local runs without Postgres.
/// Everything lives behind one mutex; contention is a non-issue at test scale.
#[derive(Default)]
pub struct InMemoryDatastore {
    players: Mutex<HashMap<u64, PlayerRow>>,
    games: Mutex<Vec<FinalizeGameInput>>,
    rating_history: Mutex<Vec<(u64, i32)>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seed helper: stand up a player at a known rating and games-played
    /// count instead of the default, so tests can exercise K-factor tiers.
    pub async fn seed_player(&self, user_id: u64, rating: i32, games_played: u32) {
        let mut players = self.players.lock().await;
        let row = players.entry(user_id).or_insert_with(PlayerRow::new);
        row.rating = rating;
        row.games_played = games_played;
    }

    pub async fn games_persisted(&self) -> usize {
        self.games.lock().await.len()
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn player_rating(&self, user_id: u64) -> Result<PlayerRating, DatastoreError> {
        let mut players = self.players.lock().await;
        let row = players.entry(user_id).or_insert_with(PlayerRow::new);
        Ok(PlayerRating {
            rating: row.rating,
            games_played: row.games_played,
        })
    }

    async fn finalize_game(&self, input: FinalizeGameInput) -> Result<(), DatastoreError> {
        {
            let mut players = self.players.lock().await;
            let white = players.entry(input.white_user_id).or_insert_with(PlayerRow::new);
            white.rating = input.white_new_rating;
            white.games_played += 1;
            let black = players.entry(input.black_user_id).or_insert_with(PlayerRow::new);
            black.rating = input.black_new_rating;
            black.games_played += 1;
        }
        self.rating_history
            .lock()
            .await
            .extend([(input.white_user_id, input.white_new_rating), (input.black_user_id, input.black_new_rating)]);
        self.games.lock().await.push(input);
        Ok(())
    }

    async fn user_achievement_ids(&self, user_id: u64) -> Result<HashSet<String>, DatastoreError> {
        let mut players = self.players.lock().await;
        let row = players.entry(user_id).or_insert_with(PlayerRow::new);
        Ok(row.achievements.clone())
    }

    async fn grant_achievement(
        &self,
        user_id: u64,
        achievement_id: &str,
        _points: u32,
    ) -> Result<bool, DatastoreError> {
        let mut players = self.players.lock().await;
        let row = players.entry(user_id).or_insert_with(PlayerRow::new);
        Ok(row.achievements.insert(achievement_id.to_string()))
    }

    async fn update_win_streak(&self, user_id: u64, won: bool) -> Result<u32, DatastoreError> {
        let mut players = self.players.lock().await;
        let row = players.entry(user_id).or_insert_with(PlayerRow::new);
        row.win_streak = if won { row.win_streak + 1 } else { 0 };
        Ok(row.win_streak)
    }

    async fn games_played_count(&self, user_id: u64) -> Result<u32, DatastoreError> {
        let mut players = self.players.lock().await;
        Ok(players.entry(user_id).or_insert_with(PlayerRow::new).games_played)
    }
}

/// Production `Datastore`: a `sqlx` Postgres pool. `users` is owned by the
/// wider service (profiles, auth); `games`, `rating_history`, `achievements`
/// and `win_streaks` belong to the realtime core.
pub struct PostgresDatastore {
    pool: sqlx::PgPool,
}

impl PostgresDatastore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Datastore for PostgresDatastore {
    async fn player_rating(&self, user_id: u64) -> Result<PlayerRating, DatastoreError> {
        let row = sqlx::query_as::<_, (i32, i32)>(
            "SELECT rating, games_played FROM users WHERE id = $1",
        )
        .bind(user_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatastoreError::Backend(e.to_string()))?;

        match row {
            Some((rating, games_played)) => Ok(PlayerRating {
                rating,
                games_played: games_played as u32,
            }),
            None => Ok(PlayerRating {
                rating: DEFAULT_RATING,
                games_played: 0,
            }),
        }
    }

    async fn finalize_game(&self, input: FinalizeGameInput) -> Result<(), DatastoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT INTO games (pgn, white_user_id, black_user_id, white_start_rating, black_start_rating, result) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&input.pgn)
        .bind(input.white_user_id as i64)
        .bind(input.black_user_id as i64)
        .bind(input.white_start_rating)
        .bind(input.black_start_rating)
        .bind(input.result_pgn)
        .execute(&mut *tx)
        .await
        .map_err(|e| DatastoreError::Backend(e.to_string()))?;

        sqlx::query("UPDATE users SET rating = $2, games_played = games_played + 1 WHERE id = $1")
            .bind(input.white_user_id as i64)
            .bind(input.white_new_rating)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))?;

        sqlx::query("UPDATE users SET rating = $2, games_played = games_played + 1 WHERE id = $1")
            .bind(input.black_user_id as i64)
            .bind(input.black_new_rating)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))?;

        for (user_id, rating) in [
            (input.white_user_id, input.white_new_rating),
            (input.black_user_id, input.black_new_rating),
        ] {
            sqlx::query("INSERT INTO rating_history (user_id, rating, created_at) VALUES ($1, $2, now())")
                .bind(user_id as i64)
                .bind(rating)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatastoreError::Backend(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| DatastoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn user_achievement_ids(&self, user_id: u64) -> Result<HashSet<String>, DatastoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT achievement_id FROM achievements WHERE user_id = $1")
            .bind(user_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn grant_achievement(
        &self,
        user_id: u64,
        achievement_id: &str,
        points: u32,
    ) -> Result<bool, DatastoreError> {
        let result = sqlx::query(
            "INSERT INTO achievements (user_id, achievement_id, points, granted_at) VALUES ($1, $2, $3, now()) \
             ON CONFLICT (user_id, achievement_id) DO NOTHING",
        )
        .bind(user_id as i64)
        .bind(achievement_id)
        .bind(points as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| DatastoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_win_streak(&self, user_id: u64, won: bool) -> Result<u32, DatastoreError> {
        let new_streak: (i32,) = if won {
            sqlx::query_as(
                "INSERT INTO win_streaks (user_id, streak) VALUES ($1, 1) \
                 ON CONFLICT (user_id) DO UPDATE SET streak = win_streaks.streak + 1 \
                 RETURNING streak",
            )
            .bind(user_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))?
        } else {
            sqlx::query_as(
                "INSERT INTO win_streaks (user_id, streak) VALUES ($1, 0) \
                 ON CONFLICT (user_id) DO UPDATE SET streak = 0 \
                 RETURNING streak",
            )
            .bind(user_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))?
        };
        Ok(new_streak.0 as u32)
    }

    async fn games_played_count(&self, user_id: u64) -> Result<u32, DatastoreError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT games_played FROM users WHERE id = $1")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatastoreError::Backend(e.to_string()))?;
        Ok(row.map(|(n,)| n as u32).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_player_gets_default_rating() {
        let store = InMemoryDatastore::new();
        let rating = store.player_rating(1).await.unwrap();
        assert_eq!(rating.rating, DEFAULT_RATING);
        assert_eq!(rating.games_played, 0);
    }

    #[tokio::test]
    async fn finalize_game_updates_both_players_and_persists_one_row() {
        let store = InMemoryDatastore::new();
        store.seed_player(1, 1500, 5).await;
        store.seed_player(2, 1500, 5).await;

        store
            .finalize_game(FinalizeGameInput {
                pgn: "e4 e5".to_string(),
                white_user_id: 1,
                black_user_id: 2,
                white_start_rating: 1500,
                black_start_rating: 1500,
                white_new_rating: 1520,
                black_new_rating: 1480,
                result_pgn: "1-0",
            })
            .await
            .unwrap();

        assert_eq!(store.player_rating(1).await.unwrap().rating, 1520);
        assert_eq!(store.player_rating(2).await.unwrap().rating, 1480);
        assert_eq!(store.player_rating(1).await.unwrap().games_played, 6);
        assert_eq!(store.games_persisted().await, 1);
    }

    #[tokio::test]
    async fn achievements_are_granted_once() {
        let store = InMemoryDatastore::new();
        assert!(store.grant_achievement(1, "first_win", 10).await.unwrap());
        assert!(!store.grant_achievement(1, "first_win", 10).await.unwrap());
        assert_eq!(store.user_achievement_ids(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn win_streak_resets_on_loss() {
        let store = InMemoryDatastore::new();
        assert_eq!(store.update_win_streak(1, true).await.unwrap(), 1);
        assert_eq!(store.update_win_streak(1, true).await.unwrap(), 2);
        assert_eq!(store.update_win_streak(1, false).await.unwrap(), 0);
    }
}
