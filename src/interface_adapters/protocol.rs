// Wire protocol: the `{type, data}` envelope, typed client/server messages,
// and the codes carried in `ERROR`/`MOVE_REJECTED` payloads. No I/O here:
// `decode_client_message` and `ServerMessage::encode` are pure functions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod codes {
    pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
    pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
    pub const INVALID_DATA: &str = "INVALID_DATA";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const SAME_PLAYER: &str = "SAME_PLAYER";
    pub const GAME_CREATE_COOLDOWN: &str = "GAME_CREATE_COOLDOWN";
    pub const GAME_LIMIT_REACHED: &str = "GAME_LIMIT_REACHED";
    pub const INVALID_TIME_CONTROL: &str = "INVALID_TIME_CONTROL";
    pub const SERVER_FULL: &str = "SERVER_FULL";
    pub const NOT_RATED_ELIGIBLE: &str = "NOT_RATED_ELIGIBLE";
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug)]
pub enum DecodeError {
    InvalidFormat,
    UnknownType(String),
    InvalidData(String),
}

#[derive(Debug, Clone)]
pub enum ClientMessage {
    Ping,
    GameCreate(GameCreateData),
    GameJoin(GameJoinData),
    GameLeave,
    Move(MoveData),
    Resign(ResignData),
    LobbySubscribe,
    LobbyUnsubscribe,
}

/// Decodes one inbound text frame. A malformed envelope is
/// `DecodeError::InvalidFormat`; a well-formed envelope with an unrecognized
/// `type` is `UnknownType`; a recognized type whose `data` doesn't match the
/// expected payload shape is `InvalidData`. Callers treat all three as
/// non-fatal (§4.1, §7).
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|_| DecodeError::InvalidFormat)?;
    match envelope.kind.as_str() {
        "PING" => Ok(ClientMessage::Ping),
        "GAME_CREATE" => from_value(envelope.data).map(ClientMessage::GameCreate),
        "GAME_JOIN" => from_value(envelope.data).map(ClientMessage::GameJoin),
        "GAME_LEAVE" => Ok(ClientMessage::GameLeave),
        "MOVE" => from_value(envelope.data).map(ClientMessage::Move),
        "RESIGN" => from_value(envelope.data).map(ClientMessage::Resign),
        "LOBBY_SUBSCRIBE" => Ok(ClientMessage::LobbySubscribe),
        "LOBBY_UNSUBSCRIBE" => Ok(ClientMessage::LobbyUnsubscribe),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidData(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeControlDto {
    pub initial_time: u32,
    pub increment: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCreateData {
    #[serde(default)]
    pub time_control: Option<TimeControlDto>,
    #[serde(default)]
    pub rated: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameJoinData {
    pub game_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveData {
    pub game_id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub promotion: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResignData {
    pub game_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDto {
    pub id: u64,
    pub username: Option<String>,
    pub rating: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDto {
    pub code: &'static str,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCreatedDto {
    pub game_id: String,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameJoinedDto {
    pub game_id: String,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedDto {
    pub game_id: String,
    pub fen: String,
    pub white_player: PlayerDto,
    pub black_player: PlayerDto,
    pub time_control: Option<TimeControlDto>,
    pub white_time_ms: i64,
    pub black_time_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameNotFoundDto {
    pub game_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFullDto {
    pub game_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveAcceptedDto {
    pub game_id: String,
    pub from: String,
    pub to: String,
    pub san: String,
    pub fen: String,
    pub move_num: u32,
    pub is_check: bool,
    pub white_time_ms: i64,
    pub black_time_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRejectedDto {
    pub game_id: String,
    pub reason: String,
    pub fen: String,
    pub move_num: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentMoveDto {
    pub game_id: String,
    pub from: String,
    pub to: String,
    pub san: String,
    pub fen: String,
    pub move_num: u32,
    pub is_check: bool,
    pub white_time_ms: i64,
    pub black_time_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentLeftDto {
    pub game_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeUpdateDto {
    pub game_id: String,
    pub white_time: i64,
    pub black_time: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedDto {
    pub game_id: String,
    pub result: crate::domain::game::GameOutcome,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black_rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_rating_delta: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black_rating_delta: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_new_achievements: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black_new_achievements: Option<Vec<&'static str>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyGameDto {
    pub game_id: String,
    pub creator_name: String,
    pub creator_rating: Option<i32>,
    pub time_control: Option<TimeControlDto>,
    pub rated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyListDto {
    pub games: Vec<LobbyGameDto>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyUpdateDto {
    pub game_id: String,
    pub action: LobbyAction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Pong,
    Error(ErrorDto),
    GameCreated(GameCreatedDto),
    GameJoined(GameJoinedDto),
    GameStarted(GameStartedDto),
    GameNotFound(GameNotFoundDto),
    GameFull(GameFullDto),
    GameEnded(GameEndedDto),
    MoveAccepted(MoveAcceptedDto),
    MoveRejected(MoveRejectedDto),
    OpponentMove(OpponentMoveDto),
    OpponentLeft(OpponentLeftDto),
    TimeUpdate(TimeUpdateDto),
    LobbyList(LobbyListDto),
    LobbyUpdate(LobbyUpdateDto),
}

impl ServerMessage {
    pub fn error(code: &'static str, message: impl Into<Option<String>>) -> Self {
        ServerMessage::Error(ErrorDto {
            code,
            message: message.into(),
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ping() {
        let msg = decode_client_message(r#"{"type":"PING"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn decodes_move_payload() {
        let msg =
            decode_client_message(r#"{"type":"MOVE","data":{"gameId":"abc","from":"e2","to":"e4"}}"#)
                .unwrap();
        match msg {
            ClientMessage::Move(m) => {
                assert_eq!(m.game_id, "abc");
                assert_eq!(m.from, "e2");
                assert_eq!(m.to, "e4");
                assert!(m.promotion.is_none());
            }
            _ => panic!("expected Move"),
        }
    }

    #[test]
    fn unknown_type_is_reported_distinctly() {
        let err = decode_client_message(r#"{"type":"NOT_A_THING"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(ref t) if t == "NOT_A_THING"));
    }

    #[test]
    fn malformed_envelope_is_invalid_format() {
        let err = decode_client_message("not json").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFormat));
    }

    #[test]
    fn malformed_payload_is_invalid_data() {
        let err = decode_client_message(r#"{"type":"MOVE","data":{"gameId":"abc"}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidData(_)));
    }

    #[test]
    fn server_message_tags_match_wire_contract() {
        let encoded = ServerMessage::Pong.encode().unwrap();
        assert_eq!(encoded, r#"{"type":"PONG"}"#);
        let encoded = ServerMessage::error("SAME_PLAYER", None).encode().unwrap();
        assert!(encoded.starts_with(r#"{"type":"ERROR","data":"#));
    }
}
