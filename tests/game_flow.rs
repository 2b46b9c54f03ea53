mod support;

use support::{connect, recv_json, recv_json_of_type, send};

#[tokio::test]
async fn create_join_and_one_legal_move() {
    let mut alice = connect().await;
    let mut bob = connect().await;

    send(&mut alice, "GAME_CREATE", serde_json::json!({"timeControl": {"initialTime": 300, "increment": 0}})).await;
    let created = recv_json_of_type(&mut alice, "GAME_CREATED").await;
    assert_eq!(created["data"]["color"], "white");
    let game_id = created["data"]["gameId"].as_str().unwrap().to_string();

    send(&mut bob, "GAME_JOIN", serde_json::json!({"gameId": game_id})).await;
    let joined = recv_json_of_type(&mut bob, "GAME_JOINED").await;
    assert_eq!(joined["data"]["color"], "black");

    let alice_started = recv_json_of_type(&mut alice, "GAME_STARTED").await;
    let bob_started = recv_json_of_type(&mut bob, "GAME_STARTED").await;
    let expected_fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    assert_eq!(alice_started["data"]["fen"], expected_fen);
    assert_eq!(bob_started["data"]["fen"], expected_fen);

    send(&mut alice, "MOVE", serde_json::json!({"gameId": game_id, "from": "e2", "to": "e4"})).await;
    let accepted = recv_json_of_type(&mut alice, "MOVE_ACCEPTED").await;
    assert_eq!(accepted["data"]["san"], "e4");
    assert_eq!(accepted["data"]["moveNum"], 1);
    assert_eq!(accepted["data"]["isCheck"], false);

    let opponent_move = recv_json_of_type(&mut bob, "OPPONENT_MOVE").await;
    assert_eq!(opponent_move["data"]["san"], "e4");
}

#[tokio::test]
async fn illegal_move_is_rejected_without_notifying_opponent() {
    let mut alice = connect().await;
    let mut bob = connect().await;

    send(&mut alice, "GAME_CREATE", serde_json::json!({})).await;
    let created = recv_json_of_type(&mut alice, "GAME_CREATED").await;
    let game_id = created["data"]["gameId"].as_str().unwrap().to_string();

    send(&mut bob, "GAME_JOIN", serde_json::json!({"gameId": game_id})).await;
    recv_json_of_type(&mut bob, "GAME_JOINED").await;
    recv_json_of_type(&mut alice, "GAME_STARTED").await;
    recv_json_of_type(&mut bob, "GAME_STARTED").await;

    send(&mut alice, "MOVE", serde_json::json!({"gameId": game_id, "from": "e2", "to": "e5"})).await;
    let rejected = recv_json_of_type(&mut alice, "MOVE_REJECTED").await;
    assert_eq!(rejected["data"]["moveNum"], 1);

    send(&mut bob, "PING", serde_json::json!(null)).await;
    let pong = recv_json(&mut bob).await;
    assert_eq!(pong["type"], "PONG");
}

#[tokio::test]
async fn self_join_is_rejected() {
    let mut alice = connect().await;

    send(&mut alice, "GAME_CREATE", serde_json::json!({})).await;
    let created = recv_json_of_type(&mut alice, "GAME_CREATED").await;
    let game_id = created["data"]["gameId"].as_str().unwrap().to_string();

    send(&mut alice, "GAME_JOIN", serde_json::json!({"gameId": game_id})).await;
    let err = recv_json_of_type(&mut alice, "ERROR").await;
    assert_eq!(err["data"]["code"], "SAME_PLAYER");
}

#[tokio::test]
async fn joining_unknown_game_reports_not_found() {
    let mut alice = connect().await;

    send(&mut alice, "GAME_JOIN", serde_json::json!({"gameId": "0000000000000000"})).await;
    let not_found = recv_json_of_type(&mut alice, "GAME_NOT_FOUND").await;
    assert_eq!(not_found["data"]["gameId"], "0000000000000000");
}

#[tokio::test]
async fn lobby_subscribe_returns_list_then_updates_on_new_game() {
    let mut watcher = connect().await;
    let mut creator = connect().await;

    send(&mut watcher, "LOBBY_SUBSCRIBE", serde_json::json!(null)).await;
    let list = recv_json_of_type(&mut watcher, "LOBBY_LIST").await;
    assert!(list["data"]["games"].is_array());

    send(&mut creator, "GAME_CREATE", serde_json::json!({})).await;
    recv_json_of_type(&mut creator, "GAME_CREATED").await;

    let update = recv_json_of_type(&mut watcher, "LOBBY_UPDATE").await;
    assert_eq!(update["data"]["action"], "added");
}

#[tokio::test]
async fn resign_ends_the_game_for_both_players() {
    let mut alice = connect().await;
    let mut bob = connect().await;

    send(&mut alice, "GAME_CREATE", serde_json::json!({})).await;
    let created = recv_json_of_type(&mut alice, "GAME_CREATED").await;
    let game_id = created["data"]["gameId"].as_str().unwrap().to_string();

    send(&mut bob, "GAME_JOIN", serde_json::json!({"gameId": game_id})).await;
    recv_json_of_type(&mut bob, "GAME_JOINED").await;
    recv_json_of_type(&mut alice, "GAME_STARTED").await;
    recv_json_of_type(&mut bob, "GAME_STARTED").await;

    send(&mut alice, "RESIGN", serde_json::json!({"gameId": game_id})).await;
    let alice_ended = recv_json_of_type(&mut alice, "GAME_ENDED").await;
    let bob_ended = recv_json_of_type(&mut bob, "GAME_ENDED").await;
    assert_eq!(alice_ended["data"]["result"], "black");
    assert_eq!(alice_ended["data"]["reason"], "resignation");
    assert_eq!(bob_ended["data"]["result"], "black");
}

#[tokio::test]
async fn unknown_message_type_yields_unknown_type_error() {
    let mut alice = connect().await;
    send(&mut alice, "NOT_A_REAL_TYPE", serde_json::json!({})).await;
    let err = recv_json_of_type(&mut alice, "ERROR").await;
    assert_eq!(err["data"]["code"], "UNKNOWN_TYPE");
}
