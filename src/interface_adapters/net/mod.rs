// Socket endpoint: upgrade admission (origin, connection limiter, optional
// session resolution), then per-connection read pump / write pump / heartbeat
// (§4.2). Dispatch from the read pump calls straight into `lifecycle` and
// `Hub::lobby`, the pump itself holds no locks and runs no game logic.

use crate::interface_adapters::clients::auth::VerifyTokenError;
use crate::interface_adapters::protocol::{codes, decode_client_message, ClientMessage, DecodeError, ServerMessage};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::rng;
use crate::use_cases::hub::ConnectionHandle;
use crate::use_cases::lifecycle;
use crate::use_cases::rate_limiter::{Decision, RateLimiter};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const MAX_FRAME_SIZE: usize = 4096;
const PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const SEND_BUFFER: usize = 256;

fn origin_allowed(origin: &str, state: &AppState) -> bool {
    if origin == state.frontend_origin {
        return true;
    }
    if state.is_production {
        return false;
    }
    origin.starts_with("http://localhost:")
        || origin == "http://localhost"
        || origin.starts_with("http://127.0.0.1:")
        || origin == "http://127.0.0.1"
}

/// Upgrade entrypoint: `GET /ws`. Runs every admission check that must
/// complete before the socket is handed to the per-connection pumps.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) {
        if !origin_allowed(origin, &state) {
            tracing::warn!(%origin, "rejected websocket upgrade: origin not allowed");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    if !state.hub.limiter.try_admit(addr.ip(), Instant::now()).await {
        tracing::debug!(ip = %addr.ip(), "rejected websocket upgrade: connection limit");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let (user_id, display_name) = match jar.get("session_token") {
        Some(cookie) => match state.auth_client.verify_token(cookie.value()).await {
            Ok(identity) => (Some(identity.user_id), identity.display_name),
            Err(VerifyTokenError::InvalidToken | VerifyTokenError::SessionExpired) => {
                (None, format!("Guest{}", rng::rand_id() % 100_000))
            }
            Err(VerifyTokenError::UpstreamUnavailable) => {
                tracing::warn!("auth service unavailable; continuing as anonymous");
                (None, format!("Guest{}", rng::rand_id() % 100_000))
            }
        },
        None => (None, format!("Guest{}", rng::rand_id() % 100_000)),
    };

    ws.max_frame_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, addr.ip(), user_id, display_name))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    ip: std::net::IpAddr,
    user_id: Option<u64>,
    display_name: String,
) {
    let hub = state.hub.clone();
    let (outbox_tx, outbox_rx) = mpsc::channel::<String>(SEND_BUFFER);
    let id = rng::rand_id();
    let conn = Arc::new(ConnectionHandle::new(id, ip, user_id, display_name, outbox_tx));
    hub.register(conn.clone()).await;

    let (sink, stream) = socket.split();
    let write_task = tokio::spawn(write_pump(sink, outbox_rx));

    read_pump(stream, &hub, &conn).await;

    write_task.abort();
    hub.unregister(id).await;
    tracing::debug!(connection_id = id, "connection closed");
}

async fn write_pump(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = outbox_rx.recv() => {
                let Some(frame) = frame else { return };
                if tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(frame.into()))).await.is_err() {
                    return;
                }
            }
            _ = ping_interval.tick() => {
                if tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Ping(Vec::new().into()))).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn read_pump(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    hub: &Arc<crate::use_cases::hub::Hub>,
    conn: &Arc<ConnectionHandle>,
) {
    let mut limiter = RateLimiter::new(Instant::now());

    loop {
        let next = match tokio::time::timeout(PONG_WAIT, stream.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(err))) => {
                tracing::debug!(connection_id = conn.id, %err, "websocket read error");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                tracing::debug!(connection_id = conn.id, "pong deadline exceeded");
                return;
            }
        };

        match next {
            Message::Text(text) => {
                let now = Instant::now();
                match limiter.check(now) {
                    Decision::Allowed => {}
                    Decision::Denied => {
                        conn.send_message(&ServerMessage::error(codes::RATE_LIMITED, None::<String>));
                        continue;
                    }
                    Decision::Blocked => {
                        conn.send_message(&ServerMessage::error(codes::RATE_LIMITED, None::<String>));
                        return;
                    }
                }

                match decode_client_message(&text) {
                    Ok(msg) => dispatch(hub, conn, msg).await,
                    Err(DecodeError::InvalidFormat) => {
                        conn.send_message(&ServerMessage::error(codes::INVALID_FORMAT, None::<String>));
                    }
                    Err(DecodeError::UnknownType(_)) => {
                        conn.send_message(&ServerMessage::error(codes::UNKNOWN_TYPE, None::<String>));
                    }
                    Err(DecodeError::InvalidData(detail)) => {
                        conn.send_message(&ServerMessage::error(codes::INVALID_DATA, detail));
                    }
                }
            }
            Message::Close(_) => return,
            // Pong extends the read deadline simply by the loop coming back
            // around to another `timeout(PONG_WAIT, ...)` call.
            Message::Pong(_) | Message::Ping(_) | Message::Binary(_) => {}
        }
    }
}

async fn dispatch(hub: &Arc<crate::use_cases::hub::Hub>, conn: &Arc<ConnectionHandle>, msg: ClientMessage) {
    match msg {
        ClientMessage::Ping => conn.send_message(&ServerMessage::Pong),
        ClientMessage::GameCreate(data) => lifecycle::handle_create(hub, conn, data).await,
        ClientMessage::GameJoin(data) => lifecycle::handle_join(hub, conn, data).await,
        ClientMessage::GameLeave => lifecycle::handle_leave(hub, conn).await,
        ClientMessage::Move(data) => lifecycle::handle_move(hub, conn, data).await,
        ClientMessage::Resign(data) => lifecycle::handle_resign(hub, conn, data).await,
        ClientMessage::LobbySubscribe => hub.lobby.subscribe(conn.clone(), &hub.games).await,
        ClientMessage::LobbyUnsubscribe => hub.lobby.unsubscribe(conn.id).await,
    }
}
