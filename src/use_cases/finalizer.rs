// Off-lock game finalization: rating computation, persistence, achievement
// grants. Always runs after the game lock has been released; every datastore
// call gets its own timeout so a slow backend degrades gracefully instead of
// stalling the realtime core (§4.9).

use crate::domain::achievements::{self, AchievementContext, GameFlags};
use crate::domain::elo::{self, ResultScore};
use crate::domain::game::{EndReason, Game, GameOutcome};
use crate::domain::ports::{DatastoreError, FinalizeGameInput};
use crate::interface_adapters::protocol::{GameEndedDto, ServerMessage};
use crate::use_cases::hub::Hub;

use std::time::Duration;

const DATASTORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ParticipantSnapshot {
    pub connection_id: u64,
    pub user_id: Option<u64>,
}

/// Everything the finalizer needs, captured while the game lock was still
/// held. No reference into `Game` survives past `snapshot`.
#[derive(Debug, Clone)]
pub struct FinalizationSnapshot {
    pub game_id: String,
    pub result: GameOutcome,
    pub reason: EndReason,
    pub rated: bool,
    pub white: ParticipantSnapshot,
    pub black: Option<ParticipantSnapshot>,
    pub pgn: String,
    pub flags: GameFlags,
}

/// Call at the moment of transition to `Ended`, before releasing the game lock.
pub fn snapshot(game: &Game) -> FinalizationSnapshot {
    FinalizationSnapshot {
        game_id: game.id.clone(),
        result: game.result.expect("snapshot taken after result is set"),
        reason: game.reason.expect("snapshot taken after reason is set"),
        rated: game.rated,
        white: ParticipantSnapshot {
            connection_id: game.white.connection_id,
            user_id: game.white.user_id,
        },
        black: game.black.as_ref().map(|b| ParticipantSnapshot {
            connection_id: b.connection_id,
            user_id: b.user_id,
        }),
        pgn: game.moves.join(" "),
        flags: game.flags,
    }
}

/// Runs the finalizer and sends `GAME_ENDED` to whichever participants are
/// still connected. Never panics or propagates a datastore error; on failure
/// it degrades to the minimal `GAME_ENDED` and logs.
pub async fn finalize_and_notify(hub: &Hub, snap: FinalizationSnapshot) {
    let ended = build_game_ended(hub, &snap).await;
    let msg = ServerMessage::GameEnded(ended);
    if let Some(conn) = hub.get(snap.white.connection_id).await {
        conn.send_message(&msg);
    }
    if let Some(black) = &snap.black {
        if let Some(conn) = hub.get(black.connection_id).await {
            conn.send_message(&msg);
        }
    }
}

async fn build_game_ended(hub: &Hub, snap: &FinalizationSnapshot) -> GameEndedDto {
    let minimal = || GameEndedDto {
        game_id: snap.game_id.clone(),
        result: snap.result,
        reason: snap.reason.as_str(),
        white_rating: None,
        black_rating: None,
        white_rating_delta: None,
        black_rating_delta: None,
        white_new_achievements: None,
        black_new_achievements: None,
    };

    if !snap.rated {
        return minimal();
    }
    let Some(white_uid) = snap.white.user_id else {
        return minimal();
    };
    let Some(black_uid) = snap.black.as_ref().and_then(|b| b.user_id) else {
        return minimal();
    };

    match finalize_rated(hub, snap, white_uid, black_uid).await {
        Ok(dto) => dto,
        Err(err) => {
            tracing::error!(
                game_id = %snap.game_id,
                %err,
                "finalizer datastore error; degrading to minimal GAME_ENDED"
            );
            minimal()
        }
    }
}

async fn finalize_rated(
    hub: &Hub,
    snap: &FinalizationSnapshot,
    white_uid: u64,
    black_uid: u64,
) -> Result<GameEndedDto, DatastoreError> {
    let datastore = &hub.datastore;

    let white_before = with_timeout(datastore.player_rating(white_uid)).await?;
    let black_before = with_timeout(datastore.player_rating(black_uid)).await?;

    let change = elo::calculate(
        white_before.rating,
        black_before.rating,
        ResultScore::from(snap.result),
        white_before.games_played,
        black_before.games_played,
    );

    with_timeout(datastore.finalize_game(FinalizeGameInput {
        pgn: snap.pgn.clone(),
        white_user_id: white_uid,
        black_user_id: black_uid,
        white_start_rating: white_before.rating,
        black_start_rating: black_before.rating,
        white_new_rating: change.white_new,
        black_new_rating: change.black_new,
        result_pgn: ResultScore::from(snap.result).to_pgn(),
    }))
    .await?;

    let white_won = snap.result == GameOutcome::White;
    let black_won = snap.result == GameOutcome::Black;

    let white_achievements = grant_achievements(hub, white_uid, white_won, change.white_new, snap).await?;
    let black_achievements = grant_achievements(hub, black_uid, black_won, change.black_new, snap).await?;

    Ok(GameEndedDto {
        game_id: snap.game_id.clone(),
        result: snap.result,
        reason: snap.reason.as_str(),
        white_rating: Some(change.white_new),
        black_rating: Some(change.black_new),
        white_rating_delta: Some(change.white_delta),
        black_rating_delta: Some(change.black_delta),
        white_new_achievements: none_if_empty(white_achievements),
        black_new_achievements: none_if_empty(black_achievements),
    })
}

/// Per §6, achievement flags (promotion/en-passant/etc.) are tracked at game
/// granularity rather than attributed to whichever side performed the move;
/// both participants are evaluated against the same finished-game flags.
async fn grant_achievements(
    hub: &Hub,
    user_id: u64,
    won: bool,
    new_rating: i32,
    snap: &FinalizationSnapshot,
) -> Result<Vec<&'static str>, DatastoreError> {
    let datastore = &hub.datastore;
    let win_streak = with_timeout(datastore.update_win_streak(user_id, won)).await?;
    let games_played = with_timeout(datastore.games_played_count(user_id)).await?;
    let existing = with_timeout(datastore.user_achievement_ids(user_id)).await?;

    let ctx = AchievementContext {
        won,
        new_rating,
        win_streak,
        games_played,
        flags: snap.flags,
    };
    let unlocked = achievements::check_game_achievements(&ctx, &existing);

    let mut granted = Vec::with_capacity(unlocked.len());
    for achievement in unlocked {
        if with_timeout(datastore.grant_achievement(user_id, achievement.id, achievement.points)).await? {
            granted.push(achievement.id);
        }
    }
    Ok(granted)
}

fn none_if_empty(v: Vec<&'static str>) -> Option<Vec<&'static str>> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, DatastoreError>>,
) -> Result<T, DatastoreError> {
    match tokio::time::timeout(DATASTORE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(DatastoreError::Timeout),
    }
}
