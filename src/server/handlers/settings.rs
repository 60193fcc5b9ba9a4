use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::server::AppState;
use crate::server::error::{ApiError, ok_data};
use crate::storage;

pub(in crate::server) async fn get_settings(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = storage::get_settings(state.db_path()).await?;
    Ok(ok_data(settings))
}

/// The scheduler re-reads the interval on its next round, so no restart is
/// needed for a change to take effect.
pub(in crate::server) async fn update_settings(
    State(state): State<AppState>,
    Json(input): Json<storage::SettingsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(v) = input.check_interval_ms
        && v < 60_000
    {
        return Err(ApiError::BadRequest(
            "check_interval_ms 不能小于 60000".to_string(),
        ));
    }
    if let Some(v) = input.max_logs_retention_ms
        && v < 1
    {
        return Err(ApiError::BadRequest(
            "max_logs_retention_ms 需大于 0".to_string(),
        ));
    }

    let settings = storage::update_settings(state.db_path(), input).await?;
    Ok(ok_data(settings))
}
