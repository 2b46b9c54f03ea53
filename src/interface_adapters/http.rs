// Plain HTTP surface alongside the websocket endpoint: a liveness probe and
// an internal lobby snapshot for ops tooling. Neither touches game state
// under a lock for longer than a single snapshot read.

use crate::interface_adapters::protocol::{LobbyGameDto, TimeControlDto};
use crate::interface_adapters::state::AppState;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub games: usize,
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.len().await,
        games: state.hub.games.len().await,
    })
}

#[derive(Debug, Serialize)]
pub struct LobbySnapshotResponse {
    pub games: Vec<LobbyGameDto>,
}

/// Internal snapshot of the open lobby, independent of any websocket
/// subscription, used by ops tooling rather than game clients.
pub async fn lobby_snapshot(State(state): State<Arc<AppState>>) -> Json<LobbySnapshotResponse> {
    let handles = state.hub.games.waiting_snapshot().await;
    let mut games = Vec::with_capacity(handles.len());
    for handle in handles {
        let g = handle.lock().await;
        games.push(LobbyGameDto {
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
    Json(LobbySnapshotResponse { games })
}
