#[tokio::main]
async fn main() {
    if let Err(err) = chess_realtime::run_with_config().await {
        tracing::error!(%err, "server exited with error");
        std::process::exit(1);
    }
}
