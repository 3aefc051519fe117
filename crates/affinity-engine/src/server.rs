//! Server startup and routing
//!
//! Wires the record store, the engine components and the completion client into one
//! [`UnifiedAppState`], starts the session sweeper and serves the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{MatchedPath, Request},
    http::{header, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    api,
    characters::CharacterCatalog,
    config::{Config, StorageBackend},
    memory_db::{InMemoryRecordStore, RecordStore, SqliteRecordStore},
    metrics,
    shared_state::{SharedState, UnifiedAppState},
    worker_threads::{LLMWorker, SessionSweeper},
};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    metrics::init_metrics();
    cfg.print_config();

    let records = open_record_store(&cfg)?;
    let identity = Arc::new(cfg.token_provider()?);
    info!("Loaded {} API tokens", identity.len());

    let characters = Arc::new(load_character_catalog(&cfg));
    let client = Arc::new(LLMWorker::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.llm_timeout(),
    )?);

    let addr = cfg.api_addr()?;
    let sweep_interval = cfg.sweep_interval();
    let request_timeout = cfg.request_timeout();

    let shared_state = Arc::new(SharedState::new(cfg, records, client, identity, characters));
    let sweeper = SessionSweeper::new(shared_state.sessions.clone(), sweep_interval).spawn();

    let app = build_router(UnifiedAppState::new(shared_state), request_timeout);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

/// Open the configured store. A SQLite failure falls back to memory so the API stays up.
pub fn open_record_store(cfg: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    match cfg.storage_backend {
        StorageBackend::Memory => {
            info!("Using in-memory record store");
            Ok(Arc::new(InMemoryRecordStore::new()))
        }
        StorageBackend::Sqlite => match SqliteRecordStore::new(&cfg.database_path) {
            Ok(store) => {
                info!("Record database initialized at: {}", cfg.database_path.display());
                Ok(Arc::new(store))
            }
            Err(e) => {
                warn!("Failed to initialize record database: {}. Falling back to in-memory.", e);
                Ok(Arc::new(InMemoryRecordStore::new()))
            }
        },
    }
}

/// Load the configured character catalog. An unreadable catalog leaves it empty.
pub fn load_character_catalog(cfg: &Config) -> CharacterCatalog {
    let Some(path) = &cfg.characters_path else {
        info!("No character catalog configured");
        return CharacterCatalog::default();
    };
    CharacterCatalog::load(path).unwrap_or_else(|e| {
        warn!("{:#}. Continuing without a character catalog.", e);
        CharacterCatalog::default()
    })
}

pub fn build_router(state: UnifiedAppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/sessions", post(api::create_session))
        .route("/sessions/:id", get(api::get_session).delete(api::delete_session))
        .route("/sessions/:id/messages", get(api::get_messages).post(api::append_message))
        .route("/sessions/:id/clear", post(api::clear_session))
        .route("/sessions/:id/context", get(api::get_context))
        .route("/user_sessions", get(api::get_user_sessions))
        .route("/latest_session/:character_id", get(api::get_latest_session))
        .route("/history", axum::routing::delete(api::clear_history))
        .route("/intimacy", get(api::get_all_intimacy))
        .route("/intimacy/:character_id", get(api::get_intimacy))
        .route("/intimacy/:character_id/increase", post(api::increase_intimacy))
        .route("/chat", post(api::chat))
        .route("/character_config", get(api::get_all_character_configs))
        .route("/character_config/:id", get(api::get_character_config))
        .route_layer(middleware::from_fn(track_requests))
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(metrics_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    metrics::inc_request(&route, response.status().as_str());
    response
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
