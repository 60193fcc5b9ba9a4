use axum::{
    Router,
    routing::{get, post, put},
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::balancer::Balancer;
use crate::outbound::ClientPool;
use crate::scheduler::Scheduler;

pub(crate) mod auth;
mod error;
mod handlers;
mod state;

pub use auth::RateLimiter;
pub use state::AppState;

fn build_app(state: AppState) -> Router {
    let openai_surface = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route(
            "/v1/images/generations",
            post(handlers::images_generations),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/channels",
            get(handlers::list_channels).post(handlers::create_channel),
        )
        .route(
            "/api/channels/{id}",
            get(handlers::get_channel)
                .put(handlers::update_channel)
                .delete(handlers::delete_channel),
        )
        .route(
            "/api/keys",
            get(handlers::list_keys).post(handlers::create_key),
        )
        .route("/api/keys/import", post(handlers::import_keys))
        .route("/api/keys/check-all", post(handlers::check_all_keys))
        .route(
            "/api/keys/{id}",
            get(handlers::get_key)
                .put(handlers::update_key)
                .delete(handlers::delete_key),
        )
        .route("/api/keys/{id}/check", post(handlers::check_key))
        .route(
            "/api/proxies",
            get(handlers::list_proxies).post(handlers::create_proxy),
        )
        .route(
            "/api/proxies/{id}",
            get(handlers::get_proxy)
                .put(handlers::update_proxy)
                .delete(handlers::delete_proxy),
        )
        .route("/api/proxies/{id}/test", post(handlers::test_proxy))
        .route(
            "/api/tokens",
            get(handlers::list_tokens).post(handlers::create_token),
        )
        .route(
            "/api/tokens/{id}",
            put(handlers::update_token).delete(handlers::delete_token),
        )
        .route("/api/stats", get(handlers::dashboard))
        .route("/api/logs", get(handlers::list_logs))
        .route(
            "/api/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .merge(openai_surface)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve_with_listener(
    listener: tokio::net::TcpListener,
    db_path: PathBuf,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let state = AppState {
        listen_addr: addr,
        db_path: Arc::new(db_path),
        clients: Arc::new(ClientPool::new()?),
        balancer: Arc::new(Balancer::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        scheduler: Arc::new(Scheduler::new()),
    };

    state
        .scheduler
        .start(state.clients.clone(), state.db_path());

    let app = build_app(state.clone());
    let result = axum::serve(listener, app).await;
    state.scheduler.stop();
    result.map_err(Into::into)
}

pub async fn serve(addr: SocketAddr, db_path: PathBuf) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_with_listener(listener, db_path).await
}
