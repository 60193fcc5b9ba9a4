use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::server::AppState;
use crate::server::error::{ApiError, ok_data, ok_message};
use crate::storage;

#[derive(Serialize)]
struct TokenCreated {
    #[serde(flatten)]
    record: storage::Token,
    /// The only response that ever carries the raw value.
    token: String,
}

pub(in crate::server) async fn list_tokens(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = storage::list_tokens(state.db_path()).await?;
    Ok(ok_data(tokens))
}

pub(in crate::server) async fn create_token(
    State(state): State<AppState>,
    Json(input): Json<storage::CreateToken>,
) -> Result<impl IntoResponse, ApiError> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name 不能为空".to_string()));
    }
    if let Some(limit) = input.rate_limit
        && limit < 1
    {
        return Err(ApiError::BadRequest("rate_limit 需大于 0".to_string()));
    }

    let record = storage::create_token(state.db_path(), input).await?;
    let token = record.token.clone();
    Ok(ok_data(TokenCreated { record, token }))
}

pub(in crate::server) async fn update_token(
    State(state): State<AppState>,
    axum::extract::Path(token_id): axum::extract::Path<String>,
    Json(input): Json<storage::UpdateToken>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &input.name
        && name.trim().is_empty()
    {
        return Err(ApiError::BadRequest("name 不能为空".to_string()));
    }
    if let Some(Some(limit)) = input.rate_limit
        && limit < 1
    {
        return Err(ApiError::BadRequest("rate_limit 需大于 0".to_string()));
    }

    let Some(token) = storage::update_token(state.db_path(), token_id, input).await? else {
        return Err(ApiError::NotFound("token not found".to_string()));
    };
    Ok(ok_data(token))
}

pub(in crate::server) async fn delete_token(
    State(state): State<AppState>,
    axum::extract::Path(token_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !storage::delete_token(state.db_path(), token_id).await? {
        return Err(ApiError::NotFound("token not found".to_string()));
    }
    Ok(ok_message("token deleted"))
}
