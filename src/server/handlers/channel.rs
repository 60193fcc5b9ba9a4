use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::server::AppState;
use crate::server::error::{ApiError, ok_data, ok_message};
use crate::storage;

fn validate_base_url(base_url: &str) -> Result<(), ApiError> {
    let url = reqwest::Url::parse(base_url.trim())
        .map_err(|e| ApiError::BadRequest(format!("base_url 无效：{e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::BadRequest(
            "base_url 必须是 http/https 地址".to_string(),
        ));
    }
    Ok(())
}

pub(in crate::server) async fn list_channels(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let channels = storage::list_channels(state.db_path()).await?;
    Ok(ok_data(channels))
}

pub(in crate::server) async fn get_channel(
    State(state): State<AppState>,
    axum::extract::Path(channel_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(channel) = storage::get_channel(state.db_path(), channel_id).await? else {
        return Err(ApiError::NotFound("channel not found".to_string()));
    };
    Ok(ok_data(channel))
}

pub(in crate::server) async fn create_channel(
    State(state): State<AppState>,
    Json(input): Json<storage::CreateChannel>,
) -> Result<impl IntoResponse, ApiError> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name 不能为空".to_string()));
    }
    validate_base_url(&input.base_url)?;

    let channel = storage::create_channel(state.db_path(), input).await?;
    Ok(ok_data(channel))
}

pub(in crate::server) async fn update_channel(
    State(state): State<AppState>,
    axum::extract::Path(channel_id): axum::extract::Path<String>,
    Json(input): Json<storage::UpdateChannel>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &input.name
        && name.trim().is_empty()
    {
        return Err(ApiError::BadRequest("name 不能为空".to_string()));
    }
    if let Some(base_url) = &input.base_url {
        validate_base_url(base_url)?;
    }

    let Some(channel) = storage::update_channel(state.db_path(), channel_id, input).await? else {
        return Err(ApiError::NotFound("channel not found".to_string()));
    };
    Ok(ok_data(channel))
}

pub(in crate::server) async fn delete_channel(
    State(state): State<AppState>,
    axum::extract::Path(channel_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !storage::delete_channel(state.db_path(), channel_id).await? {
        return Err(ApiError::NotFound("channel not found".to_string()));
    }
    Ok(ok_message("channel deleted"))
}
