use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::checker;
use crate::server::AppState;
use crate::server::error::{ApiError, ok_data, ok_message};
use crate::storage;

fn validate_range(name: &str, value: i64) -> Result<(), ApiError> {
    if !(1..=100).contains(&value) {
        return Err(ApiError::BadRequest(format!("{name} 需在 1..=100 之间")));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub(in crate::server) struct ListKeysQuery {
    #[serde(alias = "channelId")]
    channel_id: Option<String>,
}

pub(in crate::server) async fn list_keys(
    State(state): State<AppState>,
    Query(q): Query<ListKeysQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = storage::list_keys(state.db_path(), q.channel_id).await?;
    Ok(ok_data(keys))
}

pub(in crate::server) async fn get_key(
    State(state): State<AppState>,
    axum::extract::Path(key_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(key) = storage::get_key(state.db_path(), key_id).await? else {
        return Err(ApiError::NotFound("key not found".to_string()));
    };
    Ok(ok_data(key))
}

pub(in crate::server) async fn create_key(
    State(state): State<AppState>,
    Json(input): Json<storage::CreateKey>,
) -> Result<impl IntoResponse, ApiError> {
    if input.key.trim().is_empty() {
        return Err(ApiError::BadRequest("key 不能为空".to_string()));
    }
    validate_range("priority", input.priority)?;
    validate_range("weight", input.weight)?;

    let res = storage::create_key(state.db_path(), input).await;
    match res {
        Ok(key) => Ok(ok_data(key)),
        Err(e) if e.to_string().starts_with("channel not found") => {
            Err(ApiError::NotFound("channel not found".to_string()))
        }
        Err(e) => Err(ApiError::Internal(e)),
    }
}

#[derive(Debug, Deserialize)]
pub(in crate::server) struct ImportKeysInput {
    channel_id: String,
    keys: String,
    delimiter: Option<String>,
}

/// Splits the raw blob, trims each entry, drops empties, and creates the
/// remainder in one atomic batch with the stock defaults.
pub(in crate::server) async fn import_keys(
    State(state): State<AppState>,
    Json(input): Json<ImportKeysInput>,
) -> Result<impl IntoResponse, ApiError> {
    let delimiter = input.delimiter.unwrap_or_else(|| "\n".to_string());
    if delimiter.is_empty() {
        return Err(ApiError::BadRequest("delimiter 不能为空".to_string()));
    }

    let inputs: Vec<storage::CreateKey> = input
        .keys
        .split(delimiter.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| storage::CreateKey {
            channel_id: input.channel_id.clone(),
            key: s.to_string(),
            alias: None,
            priority: 50,
            weight: 50,
        })
        .collect();

    if inputs.is_empty() {
        return Err(ApiError::BadRequest("keys 为空".to_string()));
    }

    let res = storage::create_keys(state.db_path(), inputs).await;
    match res {
        Ok(keys) => Ok(ok_data(keys)),
        Err(e) if e.to_string().starts_with("channel not found") => {
            Err(ApiError::NotFound("channel not found".to_string()))
        }
        Err(e) => Err(ApiError::Internal(e)),
    }
}

pub(in crate::server) async fn update_key(
    State(state): State<AppState>,
    axum::extract::Path(key_id): axum::extract::Path<String>,
    Json(input): Json<storage::UpdateKey>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(key) = &input.key
        && key.trim().is_empty()
    {
        return Err(ApiError::BadRequest("key 不能为空".to_string()));
    }
    if let Some(priority) = input.priority {
        validate_range("priority", priority)?;
    }
    if let Some(weight) = input.weight {
        validate_range("weight", weight)?;
    }

    let Some(key) = storage::update_key(state.db_path(), key_id, input).await? else {
        return Err(ApiError::NotFound("key not found".to_string()));
    };
    Ok(ok_data(key))
}

pub(in crate::server) async fn delete_key(
    State(state): State<AppState>,
    axum::extract::Path(key_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !storage::delete_key(state.db_path(), key_id).await? {
        return Err(ApiError::NotFound("key not found".to_string()));
    }
    Ok(ok_message("key deleted"))
}

/// On-demand single probe; the key record is updated before returning.
pub(in crate::server) async fn check_key(
    State(state): State<AppState>,
    axum::extract::Path(key_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(result) = checker::check_one(&state.clients, state.db_path(), key_id).await? else {
        return Err(ApiError::NotFound("key not found".to_string()));
    };
    Ok(ok_data(result))
}

/// Kicks the batched sweep off in the background and returns immediately;
/// callers poll the key records to observe status changes.
pub(in crate::server) async fn check_all_keys(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let clients = state.clients.clone();
    let db_path = state.db_path();
    tokio::spawn(async move {
        if let Err(e) = checker::check_all_batched(&clients, db_path).await {
            tracing::warn!(err = %e, "bulk key check failed");
        }
    });
    Ok(ok_message("key check started"))
}
