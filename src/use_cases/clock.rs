// Per-game clock ticker: one dedicated task per active timed game. Owns only
// a stop signal (§9 "Clock task lifecycle"); every state transition,
// including flag-fall, goes through the same `Game` fields Move/Resign/Leave/
// Disconnect mutate, never as a side-effect specific to the ticker.

use crate::domain::game::{EndReason, Game, GameOutcome, GameStatus};
use crate::interface_adapters::protocol::{ServerMessage, TimeUpdateDto};
use crate::use_cases::finalizer;
use crate::use_cases::hub::Hub;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

const TICK: Duration = Duration::from_millis(100);
const BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

/// Spawned on the waiting→active transition when the game has a time control.
/// Exits on flag-fall, on `stop` being notified, or if it observes the game
/// is no longer active (defensive: some other path already ended it).
pub fn spawn(hub: Arc<Hub>, game: Arc<Mutex<Game>>, stop: Arc<Notify>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        let mut last_tick = Instant::now();
        let mut last_broadcast = Instant::now();

        loop {
            tokio::select! {
                _ = stop.notified() => return,
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            let elapsed_ms = now.saturating_duration_since(last_tick).as_millis() as i64;
            last_tick = now;

            let ended = {
                let mut g = game.lock().await;
                if g.status != GameStatus::Active {
                    return;
                }
                let side = g.rules.side_to_move();
                g.adjust_remaining_ms(side, -elapsed_ms);
                if g.remaining_ms(side) <= 0 {
                    g.status = GameStatus::Ended;
                    g.result = Some(match side {
                        chess::Color::White => GameOutcome::Black,
                        chess::Color::Black => GameOutcome::White,
                    });
                    g.reason = Some(EndReason::Timeout);
                    g.stop_clock();
                    Some(finalizer::snapshot(&g))
                } else {
                    None
                }
            };

            if let Some(snap) = ended {
                finalizer::finalize_and_notify(&hub, snap).await;
                return;
            }

            if now.saturating_duration_since(last_broadcast) >= BROADCAST_INTERVAL {
                last_broadcast = now;
                broadcast_time_update(&hub, &game).await;
            }
        }
    })
}

async fn broadcast_time_update(hub: &Hub, game: &Arc<Mutex<Game>>) {
    let (game_id, white_time, black_time, white_conn, black_conn) = {
        let g = game.lock().await;
        if g.status != GameStatus::Active {
            return;
        }
        (
            g.id.clone(),
            g.white_time_ms,
            g.black_time_ms,
            g.white.connection_id,
            g.black.as_ref().map(|b| b.connection_id),
        )
    };
    let msg = ServerMessage::TimeUpdate(TimeUpdateDto {
        game_id,
        white_time,
        black_time,
    });
    if let Some(conn) = hub.get(white_conn).await {
        conn.send_message(&msg);
    }
    if let Some(black_conn) = black_conn {
        if let Some(conn) = hub.get(black_conn).await {
            conn.send_message(&msg);
        }
    }
}
