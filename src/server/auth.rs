use axum::Json;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::server::AppState;
use crate::storage::{self, Token, now_ms};

const WINDOW_MS: i64 = 60_000;

/// Per-token fixed 60 s windows, process-local by design: counts reset on
/// restart and are not shared between instances.
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, (i64, i64)>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false once the window's count exceeds `limit`.
    pub fn check(&self, token_id: &str, limit: i64, now_ms: i64) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            return true;
        };
        let entry = windows
            .entry(token_id.to_string())
            .or_insert((0, now_ms + WINDOW_MS));
        if now_ms >= entry.1 {
            *entry = (0, now_ms + WINDOW_MS);
        }
        entry.0 += 1;
        entry.0 <= limit
    }
}

/// The validated token, stashed on the request for the relay handlers.
#[derive(Clone)]
pub(crate) struct AuthToken(pub(crate) Arc<Token>);

fn auth_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn openai_error(status: StatusCode, message: &str, kind: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message, "type": kind } })),
    )
        .into_response()
}

/// Gate in front of every `/v1/*` handler: bearer parse, token lookup,
/// enabled check, best-effort last_used touch, then the rate limit.
pub(crate) async fn require_token(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string());

    let Some(value) = bearer.filter(|v| !v.is_empty()) else {
        return auth_error(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        );
    };

    let token = match storage::token_by_value(state.db_path(), value).await {
        Ok(Some(t)) => t,
        Ok(None) => return auth_error(StatusCode::UNAUTHORIZED, "Invalid token"),
        Err(e) => {
            tracing::error!(err = %e, "token lookup failed");
            return openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
                "server_error",
            );
        }
    };

    if !token.enabled {
        return auth_error(StatusCode::FORBIDDEN, "Token is disabled");
    }

    {
        let db_path = state.db_path();
        let token_id = token.id.clone();
        tokio::spawn(async move {
            let _ = storage::touch_token_last_used(db_path, token_id).await;
        });
    }

    if let Some(limit) = token.rate_limit
        && !state.rate_limiter.check(&token.id, limit, now_ms())
    {
        return openai_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
            "rate_limit_error",
        );
    }

    req.extensions_mut().insert(AuthToken(Arc::new(token)));
    next.run(req).await
}
