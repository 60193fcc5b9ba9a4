use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::server::AppState;
use crate::server::error::{ApiError, ok_data};
use crate::storage;

#[derive(Debug, Deserialize)]
pub(in crate::server) struct LogsQuery {
    #[serde(alias = "channelId")]
    channel_id: Option<String>,
    status: Option<i64>,
    #[serde(alias = "startTime")]
    start_time: Option<i64>,
    #[serde(alias = "endTime")]
    end_time: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub(in crate::server) async fn list_logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let result = storage::query_logs(
        state.db_path(),
        storage::LogQuery {
            channel_id: q.channel_id,
            status: q.status,
            start_ms: q.start_time,
            end_ms: q.end_time,
            limit: q.limit,
            offset: q.offset,
        },
    )
    .await?;
    Ok(ok_data(result))
}
