use axum::Json;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::storage::now_ms;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

pub(in crate::server) async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: now_ms(),
    })
}
