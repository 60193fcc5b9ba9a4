use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::outbound;
use crate::server::AppState;
use crate::server::error::{ApiError, ok_data, ok_message};
use crate::storage;

fn validate_port(port: u16) -> Result<(), ApiError> {
    if port == 0 {
        return Err(ApiError::BadRequest("port 需在 1..=65535 之间".to_string()));
    }
    Ok(())
}

pub(in crate::server) async fn list_proxies(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let proxies = storage::list_proxies(state.db_path()).await?;
    Ok(ok_data(proxies))
}

pub(in crate::server) async fn get_proxy(
    State(state): State<AppState>,
    axum::extract::Path(proxy_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(proxy) = storage::get_proxy(state.db_path(), proxy_id).await? else {
        return Err(ApiError::NotFound("proxy not found".to_string()));
    };
    Ok(ok_data(proxy))
}

pub(in crate::server) async fn create_proxy(
    State(state): State<AppState>,
    Json(input): Json<storage::CreateProxy>,
) -> Result<impl IntoResponse, ApiError> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name 不能为空".to_string()));
    }
    if input.host.trim().is_empty() {
        return Err(ApiError::BadRequest("host 不能为空".to_string()));
    }
    validate_port(input.port)?;

    let proxy = storage::create_proxy(state.db_path(), input).await?;
    Ok(ok_data(proxy))
}

pub(in crate::server) async fn update_proxy(
    State(state): State<AppState>,
    axum::extract::Path(proxy_id): axum::extract::Path<String>,
    Json(input): Json<storage::UpdateProxy>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &input.name
        && name.trim().is_empty()
    {
        return Err(ApiError::BadRequest("name 不能为空".to_string()));
    }
    if let Some(port) = input.port {
        validate_port(port)?;
    }

    let Some(proxy) = storage::update_proxy(state.db_path(), proxy_id, input).await? else {
        return Err(ApiError::NotFound("proxy not found".to_string()));
    };
    Ok(ok_data(proxy))
}

/// Also clears `proxy_id` on every channel that referenced it.
pub(in crate::server) async fn delete_proxy(
    State(state): State<AppState>,
    axum::extract::Path(proxy_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !storage::delete_proxy(state.db_path(), proxy_id).await? {
        return Err(ApiError::NotFound("proxy not found".to_string()));
    }
    Ok(ok_message("proxy deleted"))
}

pub(in crate::server) async fn test_proxy(
    State(state): State<AppState>,
    axum::extract::Path(proxy_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(proxy) = storage::get_proxy(state.db_path(), proxy_id).await? else {
        return Err(ApiError::NotFound("proxy not found".to_string()));
    };
    let result = outbound::test_proxy(&proxy).await;
    Ok(ok_data(result))
}
