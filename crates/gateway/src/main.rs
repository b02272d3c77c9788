//! Avoda HTTP Gateway
//!
//! The external API surface over the hybrid retrieval core: `/search`,
//! `/rag`, `/health`. Stateless request handlers sharing a DB connection
//! pool, an embedding client, and the LLM gateway's bounded queue.

mod handlers;

use avoda_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    llm::LlmGateway,
    metrics,
};
use avoda_retrieval::Orchestrator;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub llm: Arc<LlmGateway>,
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt().with_max_level(Level::INFO).with_target(true).json().init();

    info!("starting avoda gateway v{}", avoda_common::VERSION);

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    metrics::register_metrics();

    info!("connecting to database");
    let db = match DbPool::new(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "database unreachable at startup");
            std::process::exit(2);
        }
    };

    match Repository::new(db.clone()).sample_embedding_dimension().await {
        Ok(Some(found)) if found != config.embedding.dimension => {
            tracing::warn!(
                configured = config.embedding.dimension,
                found,
                "stored embedding dimension does not match configuration"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "embedding-dimension self-check failed, continuing"),
    }

    let embedder = avoda_common::embeddings::create_embedder(
        &config.embedding.provider,
        &config.embedding.model_repo,
        config.embedding.dimension,
    )
    .await?;

    let llm = Arc::new(LlmGateway::new(config.llm.model_repo.clone(), config.llm.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        embedder,
        llm.clone(),
        config.query.clone(),
        config.total_timeout(),
        config.generate_timeout(),
    ));

    let state = AppState {
        config: config.clone(),
        db,
        llm,
        orchestrator,
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("server shutdown complete");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    Router::new()
        .route("/search", post(handlers::search::search))
        .route("/rag", post(handlers::rag::rag))
        .route("/health", get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting shutdown"),
        _ = terminate => info!("received SIGTERM, starting shutdown"),
    }
}
