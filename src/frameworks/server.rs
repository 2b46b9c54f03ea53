// Framework bootstrap: wires config, logging, datastore, the hub and its
// background tasks, and the axum router, then runs the server to completion
// with a drained shutdown on SIGINT/SIGTERM (§4.13).

use crate::frameworks::config::Config;
use crate::interface_adapters::clients::auth::AuthClient;
use crate::interface_adapters::datastore::{InMemoryDatastore, PostgresDatastore};
use crate::interface_adapters::http::{healthz, lobby_snapshot};
use crate::interface_adapters::net::ws_handler;
use crate::interface_adapters::state::AppState;
use crate::use_cases::connection_limiter::ConnectionLimiter;
use crate::use_cases::game_registry::{self, GameRegistry};
use crate::use_cases::hub::Hub;
use crate::use_cases::lobby::{self, LobbyBatcher};

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::io::Result;

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

struct Background {
    gc: tokio::task::JoinHandle<()>,
    lobby_batcher: tokio::task::JoinHandle<()>,
    limiter_sweeper: tokio::task::JoinHandle<()>,
}

impl Background {
    fn abort_all(&self) {
        self.gc.abort();
        self.lobby_batcher.abort();
        self.limiter_sweeper.abort();
    }
}

async fn build_state(config: &Config) -> Result<(Arc<AppState>, Background)> {
    let datastore: Arc<dyn crate::domain::ports::Datastore> = match &config.database_url {
        Some(url) => {
            let store = PostgresDatastore::connect(url)
                .await
                .map_err(|e| std::io::Error::other(format!("failed to connect to datastore: {e}")))?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory datastore");
            Arc::new(InMemoryDatastore::new())
        }
    };

    // Rules-engine sanity check: a standard game must be constructible before
    // we start accepting connections.
    let _ = chess::Game::new();

    let registry = Arc::new(GameRegistry::new());
    let (lobby_batcher, lobby_rx) = LobbyBatcher::new();
    let limiter = Arc::new(ConnectionLimiter::new());
    let hub = Arc::new(Hub::new(registry.clone(), lobby_batcher.clone(), limiter.clone(), datastore));

    let gc = game_registry::spawn_gc(registry, lobby_batcher.clone());
    let lobby_batcher_task = lobby::spawn_batcher(lobby_batcher, lobby_rx);
    let limiter_sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.sweep(std::time::Instant::now()).await;
        }
    });

    let auth_client = AuthClient::new(config.auth_service_url.clone(), config.auth_verify_timeout)
        .map_err(|e| std::io::Error::other(format!("failed to initialize auth client: {e}")))?;

    let state = Arc::new(AppState {
        hub,
        auth_client: Arc::new(auth_client),
        frontend_origin: config.frontend_origin.clone(),
        is_production: config.is_production,
    });

    Ok((
        state,
        Background {
            gc,
            lobby_batcher: lobby_batcher_task,
            limiter_sweeper,
        },
    ))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/lobby", get(lobby_snapshot))
        .with_state(state)
}

/// Serves the given listener with a router built from `config`. Exposed
/// separately from `run_with_config` so integration tests can bind an
/// ephemeral port.
pub async fn run(listener: tokio::net::TcpListener, config: Config) -> Result<()> {
    let address = listener.local_addr()?;
    let drain = config.shutdown_drain;
    let (state, background) = build_state(&config).await?;
    let app = router(state);

    tracing::info!(%address, "listening");

    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, "server error");
        });

    tracing::info!(drain_secs = drain.as_secs(), "draining in-flight work before exit");
    tokio::time::sleep(drain).await;
    background.abort_all();

    result
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let config = Config::from_env().map_err(|e| std::io::Error::other(e.to_string()))?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.inspect_err(|e| {
        tracing::error!(address = %config.bind_addr, error = %e, "failed to bind");
    })?;

    run(listener, config).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
