use axum::extract::State;
use axum::response::IntoResponse;

use crate::server::AppState;
use crate::server::error::{ApiError, ok_data};
use crate::storage;

fn local_midnight_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let start_local = now.to_offset(offset).replace_time(time::Time::MIDNIGHT);
    (start_local
        .to_offset(time::UtcOffset::UTC)
        .unix_timestamp_nanos()
        / 1_000_000) as i64
}

/// Entity counts plus today's request summary.
pub(in crate::server) async fn dashboard(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = storage::dashboard_stats(state.db_path(), local_midnight_ms()).await?;
    Ok(ok_data(stats))
}
