// Shared primitives for one-time server bootstrapping across integration tests.
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use chess_realtime::Config;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

static SERVER_URL: OnceLock<String> = OnceLock::new();
static SERVER_READY: OnceLock<()> = OnceLock::new();

fn test_config(bind_addr: std::net::SocketAddr) -> Config {
    Config {
        bind_addr,
        frontend_origin: "http://localhost:5173".to_string(),
        is_production: false,
        auth_service_url: "http://127.0.0.1:1".to_string(),
        auth_verify_timeout: Duration::from_millis(100),
        database_url: None,
        shutdown_drain: Duration::from_millis(50),
    }
}

// Ensure the test server is running and return the shared base URL (ws://host:port).
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published_url = Arc::new(OnceLock::<String>::new());
        let published_url_thread = Arc::clone(&published_url);
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("ws://{}", addr));
                chess_realtime::run(listener, test_config(addr)).await.expect("server failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL.get().expect("server url should be initialized").as_str()
}

fn wait_for_server_url_and_readiness(published_url: Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url.strip_prefix("ws://").expect("base url should use ws://");

    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}

pub type TestSocket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects a fresh websocket client to the test server's `/ws` endpoint.
pub async fn connect() -> TestSocket {
    let base_url = ensure_server();
    let (socket, _) = tokio_tungstenite::connect_async(format!("{base_url}/ws"))
        .await
        .expect("websocket handshake should succeed");
    socket
}

pub async fn send(socket: &mut TestSocket, msg_type: &str, data: serde_json::Value) {
    let envelope = serde_json::json!({ "type": msg_type, "data": data });
    socket
        .send(Message::Text(envelope.to_string().into()))
        .await
        .expect("send should succeed");
}

/// Reads the next text frame and decodes it as JSON, skipping PING/PONG control frames.
pub async fn recv_json(socket: &mut TestSocket) -> serde_json::Value {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a server frame")
            .expect("socket closed unexpectedly")
            .expect("websocket read error");
        if let Message::Text(text) = next {
            return serde_json::from_str(&text).expect("server frame should be valid JSON");
        }
    }
}

/// Reads frames until one whose `type` matches `expected`, ignoring interleaved message types
/// (useful when another task on the same game might emit e.g. a `TIME_UPDATE` in between).
pub async fn recv_json_of_type(socket: &mut TestSocket, expected: &str) -> serde_json::Value {
    loop {
        let value = recv_json(socket).await;
        if value.get("type").and_then(|t| t.as_str()) == Some(expected) {
            return value;
        }
    }
}
