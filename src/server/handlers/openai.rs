use axum::Extension;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use crate::models;
use crate::relay::{self, RelayEndpoint, RelayError};
use crate::server::AppState;
use crate::server::auth::AuthToken;
use crate::storage::{self, now_ms};

fn openai_error(status: StatusCode, message: &str, kind: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message, "type": kind } })),
    )
        .into_response()
}

fn relay_error_response(e: RelayError) -> Response {
    match e {
        RelayError::MissingModel => openai_error(
            StatusCode::BAD_REQUEST,
            "model is required",
            "invalid_request_error",
        ),
        RelayError::NoAvailableKey => openai_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "No available API keys for this model",
            "server_error",
        ),
        RelayError::Upstream(msg) => {
            openai_error(StatusCode::INTERNAL_SERVER_ERROR, &msg, "server_error")
        }
        RelayError::Storage(err) => {
            tracing::error!(err = %err, "relay storage error");
            openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
                "server_error",
            )
        }
    }
}

async fn relay(
    state: AppState,
    token: AuthToken,
    endpoint: RelayEndpoint,
    body: Bytes,
) -> Response {
    match relay::forward(
        &state.clients,
        &state.balancer,
        state.db_path(),
        &token.0,
        endpoint,
        body,
    )
    .await
    {
        Ok(resp) => resp.into_response(),
        Err(e) => relay_error_response(e),
    }
}

pub(in crate::server) async fn chat_completions(
    State(state): State<AppState>,
    Extension(token): Extension<AuthToken>,
    body: Bytes,
) -> Response {
    relay(state, token, RelayEndpoint::ChatCompletions, body).await
}

pub(in crate::server) async fn embeddings(
    State(state): State<AppState>,
    Extension(token): Extension<AuthToken>,
    body: Bytes,
) -> Response {
    relay(state, token, RelayEndpoint::Embeddings, body).await
}

pub(in crate::server) async fn images_generations(
    State(state): State<AppState>,
    Extension(token): Extension<AuthToken>,
    body: Bytes,
) -> Response {
    relay(state, token, RelayEndpoint::ImagesGenerations, body).await
}

#[derive(Serialize)]
struct ModelInfo {
    id: &'static str,
    object: &'static str,
    created: i64,
    owned_by: &'static str,
}

#[derive(Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelInfo>,
}

/// Every model from the fixed table that at least one eligible channel
/// (enabled, within the token's scope) can serve.
pub(in crate::server) async fn list_models(
    State(state): State<AppState>,
    Extension(token): Extension<AuthToken>,
) -> Response {
    let channels = match storage::list_channels(state.db_path()).await {
        Ok(channels) => channels,
        Err(e) => {
            tracing::error!(err = %e, "list channels failed");
            return openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
                "server_error",
            );
        }
    };

    let token = &token.0;
    let eligible: Vec<_> = channels
        .into_iter()
        .filter(|c| {
            c.enabled
                && (token.allowed_channels.is_empty() || token.allowed_channels.contains(&c.id))
        })
        .collect();

    let created = now_ms() / 1000;
    let data: Vec<ModelInfo> = models::MODEL_TABLE
        .iter()
        .filter_map(|entry| {
            let channel = eligible
                .iter()
                .find(|c| entry.types.contains(&c.channel_type))?;
            Some(ModelInfo {
                id: entry.name,
                object: "model",
                created,
                owned_by: channel.channel_type.as_str(),
            })
        })
        .collect();

    Json(ModelList {
        object: "list",
        data,
    })
    .into_response()
}
