// Game lifecycle state machine: Create, Join, Move, Resign, Leave, Disconnect.
// Every operation follows the same discipline (§4.7): acquire the registry
// only long enough to look up or insert a game handle, acquire the game lock,
// mutate, capture a plain-value snapshot of whatever needs to be sent or
// persisted, release the game lock, and only then touch the network or the
// datastore.
//
// Every function takes the `Hub` because completing a transition needs the
// registry, the lobby batcher, and outbound connections, all reachable only
// through it. `handle_join` additionally takes an owned `Arc<Hub>` handle
// because it spawns the clock task, which must outlive this call.

use crate::domain::achievements;
use crate::domain::game::{EndReason, Game, GameOutcome, GameStatus, Player, TimeControl};
use crate::domain::rules::{self, GameOverReason};
use crate::interface_adapters::protocol::{
    codes, Color, GameCreateData, GameCreatedDto, GameFullDto, GameJoinData, GameJoinedDto,
    GameNotFoundDto, GameStartedDto, MoveAcceptedDto, MoveData, MoveRejectedDto, OpponentLeftDto,
    OpponentMoveDto, PlayerDto, ResignData, ServerMessage, TimeControlDto,
};
use crate::use_cases::clock;
use crate::use_cases::finalizer::{self, FinalizationSnapshot};
use crate::use_cases::game_registry::CreateError;
use crate::use_cases::hub::{ConnectionHandle, Hub};

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;

const CREATE_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(10);
const MAX_ACTIVE_GAMES_PER_IDENTITY: usize = 2;
const TIME_INITIAL_RANGE: RangeInclusive<u32> = 60..=10_800;
const TIME_INCREMENT_RANGE: RangeInclusive<u32> = 0..=300;

pub async fn handle_create(hub: &Hub, conn: &Arc<ConnectionHandle>, data: GameCreateData) {
    let now = Instant::now();

    if let Some(last) = *conn.last_game_created_at.lock().await {
        if now.saturating_duration_since(last) < CREATE_COOLDOWN {
            conn.send_message(&ServerMessage::error(codes::GAME_CREATE_COOLDOWN, None::<String>));
            return;
        }
    }

    let time_control = match data.time_control {
        Some(tc) if TIME_INITIAL_RANGE.contains(&tc.initial_time) && TIME_INCREMENT_RANGE.contains(&tc.increment) => {
            Some(TimeControl {
                initial_secs: tc.initial_time,
                increment_secs: tc.increment,
            })
        }
        Some(_) => {
            conn.send_message(&ServerMessage::error(codes::INVALID_TIME_CONTROL, None::<String>));
            return;
        }
        None => None,
    };

    if !hub.games.has_capacity().await {
        conn.send_message(&ServerMessage::error(codes::SERVER_FULL, None::<String>));
        return;
    }

    let rated = data.rated.unwrap_or(false) && conn.user_id.is_some();
    let rating = fetch_rating(hub, conn.user_id).await;

    let identity = conn.identity_key();
    let white = Player {
        connection_id: conn.id,
        user_id: conn.user_id,
        display_name: conn.display_name.clone(),
        rating,
        identity,
    };

    let id = generate_game_id();
    let game = Game::new(id.clone(), white, time_control, rated);

    match hub.games.insert_checked(game, identity, MAX_ACTIVE_GAMES_PER_IDENTITY).await {
        Ok(_handle) => {
            *conn.last_game_created_at.lock().await = Some(now);
            conn.set_game_id(Some(id.clone())).await;
            conn.send_message(&ServerMessage::GameCreated(GameCreatedDto {
                game_id: id.clone(),
                color: Color::White,
            }));
            hub.lobby.enqueue_added(id).await;
        }
        Err(CreateError::Capacity) => {
            conn.send_message(&ServerMessage::error(codes::SERVER_FULL, None::<String>));
        }
        Err(CreateError::IdentityLimitReached) => {
            conn.send_message(&ServerMessage::error(codes::GAME_LIMIT_REACHED, None::<String>));
        }
    }
}

struct JoinStart {
    white: Player,
    black: Player,
    fen: String,
    time_control: Option<TimeControl>,
    white_time_ms: i64,
    black_time_ms: i64,
    stop: Option<Arc<tokio::sync::Notify>>,
}

pub async fn handle_join(hub: &Arc<Hub>, conn: &Arc<ConnectionHandle>, data: GameJoinData) {
    let Some(handle) = hub.games.get(&data.game_id).await else {
        conn.send_message(&ServerMessage::GameNotFound(GameNotFoundDto { game_id: data.game_id }));
        return;
    };

    let joiner_identity = conn.identity_key();
    let joiner_rating = fetch_rating(hub, conn.user_id).await;

    let start = {
        let mut g = handle.lock().await;
        if g.status != GameStatus::Waiting {
            conn.send_message(&ServerMessage::GameFull(GameFullDto { game_id: data.game_id.clone() }));
            return;
        }
        let same_player = match (g.white.user_id, conn.user_id) {
            (Some(a), Some(b)) => a == b,
            _ => g.white.connection_id == conn.id,
        };
        if same_player {
            conn.send_message(&ServerMessage::error(codes::SAME_PLAYER, None::<String>));
            return;
        }

        if g.rated && conn.user_id.is_none() {
            conn.send_message(&ServerMessage::error(
                codes::NOT_RATED_ELIGIBLE,
                "opponent is not authenticated; game continues unrated".to_string(),
            ));
            g.rated = false;
        }

        let black = Player {
            connection_id: conn.id,
            user_id: conn.user_id,
            display_name: conn.display_name.clone(),
            rating: joiner_rating,
            identity: joiner_identity,
        };
        g.black = Some(black.clone());
        g.status = GameStatus::Active;
        g.last_move_at = Instant::now();
        let stop = g.start_clock();

        JoinStart {
            white: g.white.clone(),
            black,
            fen: g.rules.fen(),
            time_control: g.time_control,
            white_time_ms: g.white_time_ms,
            black_time_ms: g.black_time_ms,
            stop,
        }
    };

    conn.set_game_id(Some(data.game_id.clone())).await;
    if let Some(white_conn) = hub.get(start.white.connection_id).await {
        white_conn.set_game_id(Some(data.game_id.clone())).await;
    }

    if let Some(stop) = start.stop {
        clock::spawn(hub.clone(), handle.clone(), stop);
    }

    conn.send_message(&ServerMessage::GameJoined(GameJoinedDto {
        game_id: data.game_id.clone(),
        color: Color::Black,
    }));

    let started = ServerMessage::GameStarted(GameStartedDto {
        game_id: data.game_id.clone(),
        fen: start.fen,
        white_player: PlayerDto {
            id: start.white.user_id.unwrap_or(start.white.connection_id),
            username: Some(start.white.display_name.clone()),
            rating: start.white.rating,
        },
        black_player: PlayerDto {
            id: start.black.user_id.unwrap_or(start.black.connection_id),
            username: Some(start.black.display_name.clone()),
            rating: start.black.rating,
        },
        time_control: start.time_control.map(|tc| TimeControlDto {
            initial_time: tc.initial_secs,
            increment: tc.increment_secs,
        }),
        white_time_ms: start.white_time_ms,
        black_time_ms: start.black_time_ms,
    });
    conn.send_message(&started);
    if let Some(white_conn) = hub.get(start.white.connection_id).await {
        white_conn.send_message(&started);
    }
}

pub async fn handle_move(hub: &Hub, conn: &Arc<ConnectionHandle>, data: MoveData) {
    let Some(handle) = hub.games.get(&data.game_id).await else {
        conn.send_message(&ServerMessage::GameNotFound(GameNotFoundDto { game_id: data.game_id }));
        return;
    };

    struct Accepted {
        mover_msg: ServerMessage,
        opponent: Option<(u64, ServerMessage)>,
        ended: Option<FinalizationSnapshot>,
    }
    enum Outcome {
        Accepted(Accepted),
        Rejected(ServerMessage),
    }

    let outcome = {
        let mut g = handle.lock().await;
        if g.status != GameStatus::Active {
            Outcome::Rejected(ServerMessage::MoveRejected(MoveRejectedDto {
                game_id: data.game_id.clone(),
                reason: "Game is not active".to_string(),
                fen: g.rules.fen(),
                move_num: g.move_num,
            }))
        } else {
            let side = g.rules.side_to_move();
            let caller_is_mover = match side {
                chess::Color::White => g.white.connection_id == conn.id,
                chess::Color::Black => g.black.as_ref().is_some_and(|b| b.connection_id == conn.id),
            };
            if !caller_is_mover {
                Outcome::Rejected(ServerMessage::MoveRejected(MoveRejectedDto {
                    game_id: data.game_id.clone(),
                    reason: "Not your turn".to_string(),
                    fen: g.rules.fen(),
                    move_num: g.move_num,
                }))
            } else {
                let promotion = data.promotion.as_ref().and_then(|s| s.chars().next());
                match g.rules.try_move(&data.from, &data.to, promotion) {
                    Err(err) => Outcome::Rejected(ServerMessage::MoveRejected(MoveRejectedDto {
                        game_id: data.game_id.clone(),
                        reason: err.to_string(),
                        fen: g.rules.fen(),
                        move_num: g.move_num,
                    })),
                    Ok(move_outcome) => {
                        let mut uci = format!("{}{}", data.from, data.to);
                        if let Some(p) = &data.promotion {
                            uci.push_str(p);
                        }
                        g.moves.push(uci);
                        // Report the move number this move completed, then advance to the
                        // next one; a reject before any move therefore still reports 1.
                        let completed_move_num = g.move_num;
                        g.move_num += 1;
                        g.last_move_at = Instant::now();

                        let is_pawn_move =
                            !matches!(move_outcome.san.chars().next(), Some('N' | 'B' | 'R' | 'Q' | 'K' | 'O'));
                        if is_pawn_move || move_outcome.is_capture {
                            g.halfmove_clock = 0;
                        } else {
                            g.halfmove_clock += 1;
                        }

                        if let Some(promo) = move_outcome.promotion {
                            g.flags.has_promotion = true;
                            if promo != chess::Piece::Queen {
                                g.flags.has_underpromotion = true;
                            }
                        }
                        if move_outcome.is_en_passant {
                            g.flags.has_en_passant = true;
                        }
                        if let Some(tc) = g.time_control {
                            if tc.increment_secs > 0 {
                                g.adjust_remaining_ms(side, tc.increment_secs as i64 * 1000);
                            }
                        }
                        let is_threefold = g.record_position(&move_outcome.fen);

                        let mover_msg = ServerMessage::MoveAccepted(MoveAcceptedDto {
                            game_id: data.game_id.clone(),
                            from: data.from.clone(),
                            to: data.to.clone(),
                            san: move_outcome.san.clone(),
                            fen: move_outcome.fen.clone(),
                            move_num: completed_move_num,
                            is_check: move_outcome.is_check,
                            white_time_ms: g.white_time_ms,
                            black_time_ms: g.black_time_ms,
                        });
                        let opponent_conn_id = match side {
                            chess::Color::White => g.black.as_ref().map(|b| b.connection_id),
                            chess::Color::Black => Some(g.white.connection_id),
                        };
                        let opponent_msg = ServerMessage::OpponentMove(OpponentMoveDto {
                            game_id: data.game_id.clone(),
                            from: data.from.clone(),
                            to: data.to.clone(),
                            san: move_outcome.san.clone(),
                            fen: move_outcome.fen,
                            move_num: completed_move_num,
                            is_check: move_outcome.is_check,
                            white_time_ms: g.white_time_ms,
                            black_time_ms: g.black_time_ms,
                        });

                        let end = move_outcome
                            .game_over
                            .map(|(winner, reason)| {
                                (
                                    GameOutcome::from(winner),
                                    match reason {
                                        GameOverReason::Checkmate => EndReason::Checkmate,
                                        GameOverReason::Stalemate => EndReason::Stalemate,
                                    },
                                )
                            })
                            .or_else(|| is_threefold.then_some((GameOutcome::Draw, EndReason::ThreefoldRepetition)))
                            .or_else(|| (g.halfmove_clock >= 100).then_some((GameOutcome::Draw, EndReason::FiftyMoveRule)))
                            .or_else(|| g.rules.has_insufficient_material().then_some((GameOutcome::Draw, EndReason::InsufficientMaterial)));

                        let ended = end.map(|(outcome, reason)| {
                            let move_count = g.moves.len();
                            let is_checkmate = reason == EndReason::Checkmate;
                            let is_scholars_mate = is_checkmate && achievements::is_scholars_mate_shape(move_count);
                            let is_back_rank_mate = is_checkmate
                                && outcome
                                    .loser()
                                    .is_some_and(|loser| rules::is_back_rank_mate(g.rules.board(), loser));

                            g.status = GameStatus::Ended;
                            g.result = Some(outcome);
                            g.reason = Some(reason);
                            g.flags.move_count = move_count;
                            g.flags.is_scholars_mate = is_scholars_mate;
                            g.flags.is_back_rank_mate = is_back_rank_mate;
                            g.stop_clock();
                            finalizer::snapshot(&g)
                        });

                        Outcome::Accepted(Accepted {
                            mover_msg,
                            opponent: opponent_conn_id.map(|id| (id, opponent_msg)),
                            ended,
                        })
                    }
                }
            }
        }
    };

    match outcome {
        Outcome::Rejected(msg) => conn.send_message(&msg),
        Outcome::Accepted(accepted) => {
            conn.send_message(&accepted.mover_msg);
            if let Some((opponent_id, msg)) = accepted.opponent {
                if let Some(opponent) = hub.get(opponent_id).await {
                    opponent.send_message(&msg);
                }
            }
            if let Some(snap) = accepted.ended {
                finalizer::finalize_and_notify(hub, snap).await;
            }
        }
    }
}

pub async fn handle_resign(hub: &Hub, conn: &Arc<ConnectionHandle>, data: ResignData) {
    let Some(handle) = hub.games.get(&data.game_id).await else {
        conn.send_message(&ServerMessage::GameNotFound(GameNotFoundDto { game_id: data.game_id }));
        return;
    };

    let snap = {
        let mut g = handle.lock().await;
        if g.status != GameStatus::Active {
            return;
        }
        let is_white = g.white.connection_id == conn.id;
        let is_black = g.black.as_ref().is_some_and(|b| b.connection_id == conn.id);
        if !is_white && !is_black {
            return;
        }
        g.status = GameStatus::Ended;
        g.result = Some(if is_white { GameOutcome::Black } else { GameOutcome::White });
        g.reason = Some(EndReason::Resignation);
        g.flags.move_count = g.moves.len();
        g.stop_clock();
        finalizer::snapshot(&g)
    };

    finalizer::finalize_and_notify(hub, snap).await;
}

pub async fn handle_leave(hub: &Hub, conn: &Arc<ConnectionHandle>) {
    let Some(game_id) = conn.game_id().await else {
        return;
    };
    let Some(handle) = hub.games.get(&game_id).await else {
        conn.set_game_id(None).await;
        return;
    };

    enum Action {
        RemovedWaiting,
        Forfeit(FinalizationSnapshot),
        NoOp,
    }

    let action = {
        let mut g = handle.lock().await;
        match g.status {
            GameStatus::Waiting => Action::RemovedWaiting,
            GameStatus::Active => {
                let leaver_is_white = g.white.connection_id == conn.id;
                g.status = GameStatus::Ended;
                g.result = Some(if leaver_is_white { GameOutcome::Black } else { GameOutcome::White });
                g.reason = Some(EndReason::Abandonment);
                g.flags.move_count = g.moves.len();
                g.stop_clock();
                Action::Forfeit(finalizer::snapshot(&g))
            }
            GameStatus::Ended => Action::NoOp,
        }
    };

    conn.set_game_id(None).await;

    match action {
        Action::RemovedWaiting => {
            hub.games.remove(&game_id).await;
            hub.lobby.enqueue_removed(game_id).await;
        }
        Action::Forfeit(snap) => finalizer::finalize_and_notify(hub, snap).await,
        Action::NoOp => {}
    }
}

/// Invoked from `Hub::unregister`; `game_id` is the connection's current game
/// at the moment it disconnected.
pub async fn handle_disconnect(hub: &Hub, game_id: &str, connection_id: u64) {
    let Some(handle) = hub.games.get(game_id).await else {
        return;
    };

    enum Action {
        RemovedWaiting,
        Forfeit(FinalizationSnapshot, Option<u64>),
    }

    let action = {
        let mut g = handle.lock().await;
        match g.status {
            GameStatus::Waiting => Action::RemovedWaiting,
            GameStatus::Active => {
                let left_is_white = g.white.connection_id == connection_id;
                let opponent_conn_id = if left_is_white {
                    g.black.as_ref().map(|b| b.connection_id)
                } else {
                    Some(g.white.connection_id)
                };
                g.status = GameStatus::Ended;
                g.result = Some(if left_is_white { GameOutcome::Black } else { GameOutcome::White });
                g.reason = Some(EndReason::Disconnection);
                g.flags.move_count = g.moves.len();
                g.stop_clock();
                Action::Forfeit(finalizer::snapshot(&g), opponent_conn_id)
            }
            GameStatus::Ended => return,
        }
    };

    match action {
        Action::RemovedWaiting => {
            hub.games.remove(game_id).await;
            hub.lobby.enqueue_removed(game_id.to_string()).await;
        }
        Action::Forfeit(snap, opponent_conn_id) => {
            if let Some(opponent_id) = opponent_conn_id {
                if let Some(opponent) = hub.get(opponent_id).await {
                    opponent.send_message(&ServerMessage::OpponentLeft(OpponentLeftDto {
                        game_id: game_id.to_string(),
                    }));
                }
            }
            finalizer::finalize_and_notify(hub, snap).await;
        }
    }
}

async fn fetch_rating(hub: &Hub, user_id: Option<u64>) -> Option<i32> {
    let uid = user_id?;
    hub.datastore.player_rating(uid).await.ok().map(|r| r.rating)
}

fn generate_game_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
